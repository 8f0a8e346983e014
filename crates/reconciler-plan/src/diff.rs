//! Drift detection per kind (spec.md §4.3).

use crate::action::FieldChange;
use crate::json::schemas_equal;
use reconciler_core::{BlockSpec, RemoteBlock, RemoteTool, ToolSpec};

/// Drift found on a managed block: the raw field changes plus whether the
/// label itself was renamed (tracked separately since a rename is always
/// breaking, unlike a plain value/description change).
#[derive(Debug, Default)]
pub struct BlockDrift {
    pub changes: Vec<FieldChange>,
    pub label_renamed: bool,
}

impl BlockDrift {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.label_renamed
    }

    /// A rename, or any change outside `{value, description}` (e.g. `limit`),
    /// is a structural change to the block and therefore breaking.
    pub fn is_breaking(&self) -> bool {
        self.label_renamed
            || self
                .changes
                .iter()
                .any(|c| c.field != "value" && c.field != "description")
    }
}

pub fn diff_block(description: &str, spec: &BlockSpec, observed: &RemoteBlock) -> BlockDrift {
    let mut drift = BlockDrift::default();

    if observed.label != spec.label {
        drift.label_renamed = true;
    }
    if observed.value != spec.value {
        drift.changes.push(FieldChange::new("value", observed.value.clone(), spec.value.clone()));
    }
    let observed_description = observed.description.clone().unwrap_or_default();
    if observed_description != description {
        drift.changes.push(FieldChange::new("description", observed_description, description.to_string()));
    }
    if let Some(limit) = spec.limit {
        if observed.limit != Some(limit) {
            drift.changes.push(FieldChange::new(
                "limit",
                observed.limit.map(|l| l.to_string()).unwrap_or_default(),
                limit.to_string(),
            ));
        }
    }

    drift
}

#[derive(Debug, Default)]
pub struct ToolDrift {
    pub changes: Vec<FieldChange>,
}

impl ToolDrift {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Only `source_code`/`description` changes are backward-compatible;
    /// anything else (here: `json_schema`) is a structural, breaking change.
    pub fn is_breaking(&self) -> bool {
        self.changes.iter().any(|c| c.field != "source_code" && c.field != "description")
    }
}

pub fn diff_tool(description: &str, spec: &ToolSpec, observed: &RemoteTool) -> ToolDrift {
    let mut drift = ToolDrift::default();

    if observed.source_code != spec.source_code {
        drift
            .changes
            .push(FieldChange::new("source_code", observed.source_code.clone(), spec.source_code.clone()));
    }
    let observed_description = observed.description.clone().unwrap_or_default();
    if observed_description != description {
        drift.changes.push(FieldChange::new("description", observed_description, description.to_string()));
    }
    if !schemas_equal(&observed.json_schema, &spec.json_schema) {
        drift.changes.push(FieldChange::new(
            "json_schema",
            observed.json_schema.to_string(),
            spec.json_schema.to_string(),
        ));
    }

    drift
}
