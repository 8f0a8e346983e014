//! The `Action` and `Plan` types: what the Plan Builder produces and what
//! the Apply Engine consumes.

use chrono::{DateTime, Utc};
use reconciler_core::Kind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attach,
    Update,
    Detach,
    Adopt,
    Skip,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Attach => "attach",
            ActionKind::Update => "update",
            ActionKind::Detach => "detach",
            ActionKind::Adopt => "adopt",
            ActionKind::Skip => "skip",
        };
        write!(f, "{s}")
    }
}

/// `{block, tool, folder, identity, agent}` — the resource side of the
/// action cross-product. `Agent` is carried in the type for completeness
/// with spec.md's cross-product but is not emitted by this revision's
/// Plan Builder (agent-level tag/record updates are Apply Engine phases 3
/// and 4, not diff-driven actions).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Block,
    Tool,
    Folder,
    Identity,
    Agent,
}

impl From<Kind> for ResourceKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Block => ResourceKind::Block,
            Kind::Tool => ResourceKind::Tool,
            Kind::Folder => ResourceKind::Folder,
            Kind::Identity => ResourceKind::Identity,
            other => panic!("{other} has no ResourceKind mapping; Plan Builder only handles plannable kinds"),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Block => "block",
            ResourceKind::Tool => "tool",
            ResourceKind::Folder => "folder",
            ResourceKind::Identity => "identity",
            ResourceKind::Agent => "agent",
        };
        write!(f, "{s}")
    }
}

impl ResourceKind {
    /// Inverse of `From<Kind>`. `Agent` has no manifest `Kind` counterpart.
    pub fn to_manifest_kind(self) -> Option<Kind> {
        match self {
            ResourceKind::Block => Some(Kind::Block),
            ResourceKind::Tool => Some(Kind::Tool),
            ResourceKind::Folder => Some(Kind::Folder),
            ResourceKind::Identity => Some(Kind::Identity),
            ResourceKind::Agent => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Kind-specific payload carried by an `Action`, internally tagged so the
/// wire form stays self-describing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum ActionPayload {
    Block {
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        changes: Vec<FieldChange>,
    },
    Tool {
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        changes: Vec<FieldChange>,
    },
    Folder {
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
    Identity {
        identifier: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
}

impl ActionPayload {
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            ActionPayload::Block { resource_id, .. }
            | ActionPayload::Tool { resource_id, .. }
            | ActionPayload::Folder { resource_id, .. }
            | ActionPayload::Identity { resource_id, .. } => resource_id.as_deref(),
        }
    }

    pub fn changes(&self) -> &[FieldChange] {
        match self {
            ActionPayload::Block { changes, .. } | ActionPayload::Tool { changes, .. } => changes,
            _ => &[],
        }
    }
}

/// One planned change against one named resource on one agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub action_kind: ActionKind,
    pub resource_kind: ResourceKind,
    pub name: String,
    pub breaking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub payload: ActionPayload,
}

impl Action {
    pub fn is_safe(&self) -> bool {
        !self.breaking && self.action_kind != ActionKind::Skip
    }
}

/// A flattened, display-oriented view of an action — the "changes" view
/// spec.md §4.3 asks the Plan Builder to produce alongside the action list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChangeDescription {
    pub resource_kind: ResourceKind,
    pub name: String,
    pub action_kind: ActionKind,
    pub breaking: bool,
    pub summary: String,
}

impl From<&Action> for ChangeDescription {
    fn from(action: &Action) -> Self {
        let summary = match (&action.action_kind, &action.payload) {
            (ActionKind::Skip, _) => action
                .reason
                .clone()
                .unwrap_or_else(|| format!("skipped {} {}", action.resource_kind, action.name)),
            (_, ActionPayload::Block { changes, .. }) | (_, ActionPayload::Tool { changes, .. }) if !changes.is_empty() => {
                let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                format!("{} {} {}: {}", action.action_kind, action.resource_kind, action.name, fields.join(", "))
            }
            _ => format!("{} {} {}", action.action_kind, action.resource_kind, action.name),
        };
        ChangeDescription {
            resource_kind: action.resource_kind,
            name: action.name.clone(),
            action_kind: action.action_kind,
            breaking: action.breaking,
            summary,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanSummary {
    pub attach: usize,
    pub update: usize,
    pub detach: usize,
    pub adopt: usize,
    pub skip: usize,
    pub safe_changes: usize,
    pub breaking_changes: usize,
}

impl PlanSummary {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut summary = PlanSummary::default();
        for action in actions {
            match action.action_kind {
                ActionKind::Attach => summary.attach += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Detach => summary.detach += 1,
                ActionKind::Adopt => summary.adopt += 1,
                ActionKind::Skip => summary.skip += 1,
            }
            if action.action_kind == ActionKind::Skip {
                continue;
            }
            if action.breaking {
                summary.breaking_changes += 1;
            } else {
                summary.safe_changes += 1;
            }
        }
        summary
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<Action>,
    pub summary: PlanSummary,
    pub requires_confirmation: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Plan {
    pub fn changes(&self) -> Vec<ChangeDescription> {
        self.actions.iter().map(ChangeDescription::from).collect()
    }
}
