//! Error types for the reconciler

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed at {field}: {message}")]
    Validation {
        field: String,
        message: String,
        suggestion: Option<String>,
    },

    #[error("policy blocked: {reason} (use {unblock_flag} to override)")]
    Policy {
        reason: String,
        unblock_flag: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("apply failed for {action}: {message}")]
    Apply { action: String, message: String },

    #[error("failed to write state ({what}): {message}")]
    StateUpdate { what: String, message: String },

    #[error("manifest error in layer {layer}: {message}")]
    Manifest { layer: String, message: String },

    #[error("control plane request failed: {0}")]
    ControlPlane(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("toml parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn validation_with_suggestion(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn policy(reason: impl Into<String>, unblock_flag: impl Into<String>) -> Self {
        Self::Policy {
            reason: reason.into(),
            unblock_flag: unblock_flag.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn apply(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Apply {
            action: action.into(),
            message: message.into(),
        }
    }
}
