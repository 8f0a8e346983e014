//! Identifier key: the only stable identity key in the system.
//!
//! Grammar: `org:<org-slug>:<type>:<handle>` where `org-slug` matches
//! `[a-z][a-z0-9-]{1,31}`, `type` is one of `user`/`service`/`team`, and
//! `handle` matches `[a-z0-9][a-z0-9_-]{1,63}`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IdentityType {
    User,
    Service,
    Team,
}

impl IdentityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityType::User => "user",
            IdentityType::Service => "service",
            IdentityType::Team => "team",
        }
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdentityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(IdentityType::User),
            "service" => Ok(IdentityType::Service),
            "team" => Ok(IdentityType::Team),
            other => Err(Error::validation(
                "identifier_key.type",
                format!("unknown identity type '{other}'"),
            )),
        }
    }
}

/// A validated `org:<org-slug>:<type>:<handle>` string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct IdentifierKey {
    org_slug: String,
    identity_type: IdentityType,
    handle: String,
}

fn is_org_slug(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes.len() > 32 {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_handle(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || bytes.len() > 64 {
        return false;
    }
    if !(bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit()) {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

impl IdentifierKey {
    pub fn new(
        org_slug: impl Into<String>,
        identity_type: IdentityType,
        handle: impl Into<String>,
    ) -> Result<Self> {
        let org_slug = org_slug.into();
        let handle = handle.into();
        if !is_org_slug(&org_slug) {
            return Err(Error::validation_with_suggestion(
                "identifier_key.org_slug",
                format!("'{org_slug}' does not match [a-z][a-z0-9-]{{1,31}}"),
                "use lowercase letters, digits, and hyphens, starting with a letter",
            ));
        }
        if !is_handle(&handle) {
            return Err(Error::validation_with_suggestion(
                "identifier_key.handle",
                format!("'{handle}' does not match [a-z0-9][a-z0-9_-]{{1,63}}"),
                "use lowercase letters, digits, underscores, and hyphens",
            ));
        }
        Ok(Self {
            org_slug,
            identity_type,
            handle,
        })
    }

    pub fn org_slug(&self) -> &str {
        &self.org_slug
    }

    pub fn identity_type(&self) -> IdentityType {
        self.identity_type
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "org:{}:{}:{}",
            self.org_slug, self.identity_type, self.handle
        )
    }
}

impl FromStr for IdentifierKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 || parts[0] != "org" {
            return Err(Error::validation_with_suggestion(
                "identifier_key",
                format!("'{s}' is not a valid identifier key"),
                "expected org:<org-slug>:<type>:<handle>",
            ));
        }
        let identity_type: IdentityType = parts[2].parse()?;
        IdentifierKey::new(parts[1], identity_type, parts[3])
    }
}

impl TryFrom<String> for IdentifierKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IdentifierKey> for String {
    fn from(value: IdentifierKey) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_key() {
        let key: IdentifierKey = "org:acme:user:paul_bettner".parse().unwrap();
        assert_eq!(key.org_slug(), "acme");
        assert_eq!(key.identity_type(), IdentityType::User);
        assert_eq!(key.handle(), "paul_bettner");
        assert_eq!(key.to_string(), "org:acme:user:paul_bettner");
    }

    #[test]
    fn rejects_bad_org_slug() {
        assert!("org:Acme:user:paul".parse::<IdentifierKey>().is_err());
        assert!("org:9acme:user:paul".parse::<IdentifierKey>().is_err());
    }

    #[test]
    fn rejects_bad_type() {
        assert!("org:acme:admin:paul".parse::<IdentifierKey>().is_err());
    }

    #[test]
    fn rejects_malformed_shape() {
        assert!("acme:user:paul".parse::<IdentifierKey>().is_err());
        assert!("org:acme:user:paul:extra".parse::<IdentifierKey>().is_err());
    }

    #[test]
    fn minimum_and_maximum_handle_length() {
        assert!(IdentifierKey::new("ab", IdentityType::User, "ab").is_ok());
        let max_handle = "a".repeat(64);
        assert!(IdentifierKey::new("ab", IdentityType::User, max_handle).is_ok());
        let too_long = "a".repeat(65);
        assert!(IdentifierKey::new("ab", IdentityType::User, too_long).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let key: IdentifierKey = "org:acme:service:ci-bot".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"org:acme:service:ci-bot\"");
        let back: IdentifierKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
