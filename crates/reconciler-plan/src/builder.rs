//! The Plan Builder (spec.md §4.3): turns one agent's observed + desired
//! state, plus its ownership classification, into an ordered `Plan`.

use crate::action::{Action, ActionKind, ActionPayload, Plan, PlanSummary, ResourceKind};
use crate::diff::{diff_block, diff_tool};
use crate::resolve;
use chrono::{DateTime, Utc};
use reconciler_core::entity::EntitySpec;
use reconciler_core::{DesiredState, IdentityType, Kind, ManifestEntity, ObservedAgentState, PackageLayer, ReleaseChannel};
use reconciler_ownership::{Classification, ClassifiedResource};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Options governing classification, independent of `ApplyOptions` (which
/// governs execution): only `force_breaking` feeds back into action
/// classification here, per spec.md's "drives preview modes" note.
#[derive(Clone, Debug, Default)]
pub struct PlanOptions {
    /// Target version per layer, used only to compare against the
    /// `managed_state` record for the package-version-drift warning.
    pub target_version: HashMap<PackageLayer, String>,
    pub force_breaking: bool,
}

pub fn build_plan(
    agent_id: &str,
    observed: &ObservedAgentState,
    desired: &DesiredState,
    classified: &HashMap<(Kind, String), ClassifiedResource>,
    channel: ReleaseChannel,
    options: &PlanOptions,
    now: DateTime<Utc>,
) -> Plan {
    let mut actions = Vec::new();

    for kind in [Kind::Block, Kind::Tool, Kind::Folder, Kind::Identity] {
        for name in desired.names(kind) {
            let entity = desired.get(kind, name).expect("name came from desired.names for this kind");
            let key = (kind, name.to_string());
            match classified.get(&key) {
                None => actions.push(attach_action(kind, name, entity)),
                Some(ClassifiedResource { classification: Classification::Adopted, resource_id }) => {
                    actions.push(adopt_action(kind, name, entity, resource_id.clone()));
                }
                Some(ClassifiedResource { classification: Classification::Managed, resource_id }) => {
                    if let Some(action) = update_action_if_drifted(kind, name, entity, observed, resource_id) {
                        actions.push(action);
                    }
                }
                // A name present in desired state can't classify Orphaned
                // (that requires absence) or Foreign (that requires a
                // cross-kind conflict `desired.get` above already resolved).
                Some(_) => {}
            }
        }
    }

    for ((kind, name), resource) in classified {
        if kind.is_plannable() && resource.classification == Classification::Orphaned {
            actions.push(detach_action(*kind, name, resource.resource_id.clone()));
        }
    }

    if options.force_breaking {
        for action in &mut actions {
            if action.action_kind != ActionKind::Skip {
                action.breaking = true;
            }
        }
    }

    let summary = PlanSummary::from_actions(&actions);
    let mut warnings = Vec::new();

    if channel.is_pinned() && summary.safe_changes > 0 {
        warnings.push(format!(
            "channel is pinned but {} safe change(s) are pending; upgrades require an explicit override",
            summary.safe_changes
        ));
    }

    if let Some(managed_state) = &observed.managed_state {
        for (layer, target_version) in &options.target_version {
            if let Some(applied) = managed_state.applied_packages.get(layer) {
                if &applied.version != target_version {
                    warnings.push(format!(
                        "package version drift on layer {layer}: applied {} but target is {target_version}",
                        applied.version
                    ));
                }
            }
        }
    }

    Plan {
        id: format!("plan-{}", Uuid::new_v4()),
        agent_id: agent_id.to_string(),
        created_at: now,
        requires_confirmation: summary.breaking_changes > 0,
        summary,
        actions,
        warnings,
        errors: Vec::new(),
    }
}

fn validate_identity_type(identity_type: &str) -> Result<(), String> {
    IdentityType::from_str(identity_type)
        .map(|_| ())
        .map_err(|e| format!("invalid identity_type '{identity_type}': {e}"))
}

fn attach_action(kind: Kind, name: &str, entity: &ManifestEntity) -> Action {
    let resource_kind = ResourceKind::from(kind);
    match &entity.spec {
        EntitySpec::Block(spec) => Action {
            action_kind: ActionKind::Attach,
            resource_kind,
            name: name.to_string(),
            breaking: false,
            reason: None,
            payload: ActionPayload::Block { label: spec.label.clone(), resource_id: None, changes: Vec::new() },
        },
        EntitySpec::Tool(_) => Action {
            action_kind: ActionKind::Attach,
            resource_kind,
            name: name.to_string(),
            breaking: false,
            reason: None,
            payload: ActionPayload::Tool { resource_id: None, changes: Vec::new() },
        },
        EntitySpec::Folder(_) => Action {
            action_kind: ActionKind::Attach,
            resource_kind,
            name: name.to_string(),
            breaking: false,
            reason: None,
            payload: ActionPayload::Folder { resource_id: None },
        },
        EntitySpec::Identity(spec) => match validate_identity_type(&spec.identity_type) {
            Ok(()) => Action {
                action_kind: ActionKind::Attach,
                resource_kind,
                name: name.to_string(),
                breaking: false,
                reason: None,
                payload: ActionPayload::Identity { identifier: spec.identifier.clone(), resource_id: None },
            },
            Err(reason) => Action {
                action_kind: ActionKind::Skip,
                resource_kind,
                name: name.to_string(),
                breaking: false,
                reason: Some(reason),
                payload: ActionPayload::Identity { identifier: spec.identifier.clone(), resource_id: None },
            },
        },
        other => unreachable!("{} is not a plannable kind", other.kind()),
    }
}

fn adopt_action(kind: Kind, name: &str, entity: &ManifestEntity, resource_id: String) -> Action {
    let resource_kind = ResourceKind::from(kind);
    let payload = match &entity.spec {
        EntitySpec::Block(spec) => ActionPayload::Block { label: spec.label.clone(), resource_id: Some(resource_id), changes: Vec::new() },
        EntitySpec::Tool(_) => ActionPayload::Tool { resource_id: Some(resource_id), changes: Vec::new() },
        EntitySpec::Folder(_) => ActionPayload::Folder { resource_id: Some(resource_id) },
        EntitySpec::Identity(spec) => ActionPayload::Identity { identifier: spec.identifier.clone(), resource_id: Some(resource_id) },
        other => unreachable!("{} is not a plannable kind", other.kind()),
    };
    Action { action_kind: ActionKind::Adopt, resource_kind, name: name.to_string(), breaking: false, reason: None, payload }
}

fn update_action_if_drifted(
    kind: Kind,
    name: &str,
    entity: &ManifestEntity,
    observed: &ObservedAgentState,
    resource_id: &str,
) -> Option<Action> {
    let resource_kind = ResourceKind::from(kind);
    match &entity.spec {
        EntitySpec::Block(spec) => {
            let remote = resolve::block_by_id(observed, resource_id)?;
            let drift = diff_block(&entity.description, spec, remote);
            if drift.is_empty() {
                return None;
            }
            Some(Action {
                action_kind: ActionKind::Update,
                resource_kind,
                name: name.to_string(),
                breaking: drift.is_breaking(),
                reason: None,
                payload: ActionPayload::Block {
                    label: spec.label.clone(),
                    resource_id: Some(resource_id.to_string()),
                    changes: drift.changes,
                },
            })
        }
        EntitySpec::Tool(spec) => {
            let remote = resolve::tool_by_id(observed, resource_id)?;
            let drift = diff_tool(&entity.description, spec, remote);
            if drift.is_empty() {
                return None;
            }
            Some(Action {
                action_kind: ActionKind::Update,
                resource_kind,
                name: name.to_string(),
                breaking: drift.is_breaking(),
                reason: None,
                payload: ActionPayload::Tool { resource_id: Some(resource_id.to_string()), changes: drift.changes },
            })
        }
        // Existence-only: no drift, so never an update action.
        EntitySpec::Folder(_) | EntitySpec::Identity(_) => None,
        other => unreachable!("{} is not a plannable kind", other.kind()),
    }
}

fn detach_action(kind: Kind, name: &str, resource_id: String) -> Action {
    let resource_kind = ResourceKind::from(kind);
    let payload = match kind {
        Kind::Block => ActionPayload::Block { label: name.to_string(), resource_id: Some(resource_id), changes: Vec::new() },
        Kind::Tool => ActionPayload::Tool { resource_id: Some(resource_id), changes: Vec::new() },
        Kind::Folder => ActionPayload::Folder { resource_id: Some(resource_id) },
        Kind::Identity => ActionPayload::Identity { identifier: name.to_string(), resource_id: Some(resource_id) },
        other => unreachable!("{other} is not a plannable kind"),
    };
    Action { action_kind: ActionKind::Detach, resource_kind, name: name.to_string(), breaking: true, reason: None, payload }
}
