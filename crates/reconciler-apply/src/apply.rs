//! The Apply Engine (spec.md §4.4): the four-phase protocol that turns a
//! `Plan` into control-plane writes.

use crate::tags::{rebuild_agent_tags, AgentTagFields};
use chrono::{DateTime, Utc};
use reconciler_core::entity::EntitySpec;
use reconciler_core::{
    AgentPatch, AgentRole, BlockPatch, ControlPlane, DesiredState, Error, Kind, ListFilter, ManagedState, ObservedAgentState,
    PackageLayer, ReleaseChannel, ResourceMarker, Result, ToolPatch, UpgradeType, MANAGED_STATE_LABEL, RECONCILER_VERSION,
};
use reconciler_plan::{Action, ActionKind, ActionPayload, Plan, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Inputs the Apply Engine needs beyond the plan itself: the policy gate
/// flags, the package versions being applied this run (fed into both the
/// resource markers and the `managed_state` record), and the desired state
/// to pull exact spec content from for attach/update/adopt actions.
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub force: bool,
    pub allow_delete: bool,
    pub package_version: HashMap<PackageLayer, String>,
    pub package_paths: HashMap<PackageLayer, String>,
    pub desired_state: DesiredState,
    pub org: Option<String>,
    pub project: Option<String>,
    pub auto_create_policy: crate::identity::AutoCreatePolicy,
    /// Caller-supplied cancellation signal (spec.md §5): checked at every
    /// suspension point (each action's control-plane call). A fresh,
    /// never-cancelled token by default — callers that want to cancel a
    /// run pass their own token in and call `.cancel()` on it from
    /// elsewhere (e.g. a ctrl-c handler).
    pub cancellation: CancellationToken,
}

impl ApplyOptions {
    pub fn new(desired_state: DesiredState) -> Self {
        Self {
            dry_run: false,
            force: false,
            allow_delete: false,
            package_version: HashMap::new(),
            package_paths: HashMap::new(),
            desired_state,
            org: None,
            project: None,
            auto_create_policy: crate::identity::AutoCreatePolicy::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub action: Action,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApplyResult {
    pub success: bool,
    pub outcomes: Vec<ActionOutcome>,
    pub skipped_breaking: Vec<Action>,
    /// Actions that were never started because cancellation fired mid-apply
    /// (spec.md §5: "stops starting new actions and returns a partial
    /// result"). Disjoint from `skipped_breaking` — a breaking skip is a
    /// policy decision, a cancelled skip is the caller pulling the plug.
    pub skipped_cancelled: Vec<Action>,
    pub cancelled: bool,
    pub errors: Vec<String>,
    pub managed_state: Option<ManagedState>,
}

fn execution_rank(kind: ActionKind) -> u8 {
    match kind {
        ActionKind::Attach => 0,
        ActionKind::Update => 1,
        ActionKind::Adopt => 2,
        ActionKind::Detach => 3,
        ActionKind::Skip => 4,
    }
}

fn treat_conflict_as_success(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::Conflict(_)) => Ok(()),
        other => other,
    }
}

fn build_marker(layer: PackageLayer, options: &ApplyOptions, now: DateTime<Utc>) -> ResourceMarker {
    let mut marker = ResourceMarker::new(layer, now);
    marker.org = options.org.clone();
    marker.project = options.project.clone();
    marker.package_version = options.package_version.get(&layer).cloned();
    marker
}

/// Run the policy gate (phase 1), execute actions in fixed order (phase 2),
/// rebuild agent tags (phase 3), and update the `managed_state` record
/// (phase 4). A failed record update does not overturn a successful
/// data-plane apply — it is surfaced as an error but doesn't flip `success`.
#[allow(clippy::too_many_arguments)]
pub async fn apply_plan(
    control_plane: &dyn ControlPlane,
    plan: &Plan,
    observed: &ObservedAgentState,
    role: AgentRole,
    channel: ReleaseChannel,
    options: &ApplyOptions,
    now: DateTime<Utc>,
) -> Result<ApplyResult> {
    if channel.is_pinned() && !options.force {
        return Err(Error::policy("channel is pinned; apply requires an explicit force override", "force"));
    }

    let mut executable = Vec::new();
    let mut skipped_breaking = Vec::new();
    for action in &plan.actions {
        if action.action_kind == ActionKind::Skip {
            continue;
        }
        let detach_needs_allow = action.action_kind == ActionKind::Detach && !options.allow_delete;
        let breaking_needs_force = action.breaking && !options.force;
        if detach_needs_allow || breaking_needs_force {
            skipped_breaking.push(action.clone());
        } else {
            executable.push(action.clone());
        }
    }
    executable.sort_by_key(|a| execution_rank(a.action_kind));

    let mut outcomes = Vec::new();
    let mut skipped_cancelled = Vec::new();
    let mut cancelled = false;
    if options.dry_run {
        outcomes = executable.into_iter().map(|action| ActionOutcome { action, success: true, error: None }).collect();
    } else {
        let mut remaining = executable.into_iter();
        for action in remaining.by_ref() {
            if options.cancellation.is_cancelled() {
                cancelled = true;
                skipped_cancelled.push(action);
                break;
            }

            let span = tracing::info_span!(
                "apply_action",
                action_kind = %action.action_kind,
                resource_kind = %action.resource_kind,
                name = %action.name,
            );
            let outcome = tokio::select! {
                result = execute_action(control_plane, &plan.agent_id, &action, options, now).instrument(span) => {
                    match result {
                        Ok(()) => ActionOutcome { action, success: true, error: None },
                        Err(e) => {
                            tracing::warn!(error = %e, "action failed");
                            ActionOutcome { action, success: false, error: Some(e.to_string()) }
                        }
                    }
                }
                _ = options.cancellation.cancelled() => {
                    cancelled = true;
                    ActionOutcome { action, success: false, error: Some("cancelled".to_string()) }
                }
            };
            outcomes.push(outcome);
        }
        if cancelled {
            skipped_cancelled.extend(remaining);
        }
    }

    let data_plane_success = outcomes.iter().all(|o| o.success);
    let mut errors: Vec<String> = outcomes.iter().filter_map(|o| o.error.clone()).collect();

    // A cancellation mid-action-loop stops here too: tag rebuild and the
    // managed_state write are themselves suspension points, and spec.md §5
    // only promises "the next apply converges" — it never promises this one
    // finishes the remaining phases once cancellation has fired.
    let tags_updated = if options.dry_run || cancelled {
        options.dry_run
    } else {
        match rebuild_and_write_tags(control_plane, &plan.agent_id, role, channel, options, now).await {
            Ok(()) => true,
            Err(e) => {
                errors.push(format!("tag update failed: {e}"));
                false
            }
        }
    };

    let new_managed_state = build_managed_state(observed, options, channel, now);
    if !options.dry_run && !cancelled {
        if let Err(e) = write_managed_state_record(control_plane, &plan.agent_id, observed, &new_managed_state).await {
            errors.push(format!("managed_state record update failed: {e}"));
        }
    }

    Ok(ApplyResult {
        success: data_plane_success && tags_updated && !cancelled,
        outcomes,
        skipped_breaking,
        skipped_cancelled,
        cancelled,
        errors,
        managed_state: Some(new_managed_state),
    })
}

async fn execute_action(cp: &dyn ControlPlane, agent_id: &str, action: &Action, options: &ApplyOptions, now: DateTime<Utc>) -> Result<()> {
    match action.action_kind {
        ActionKind::Attach => attach_resource(cp, agent_id, action, options, now).await,
        ActionKind::Update => update_resource(cp, action, options).await,
        ActionKind::Adopt => adopt_resource(cp, action, options, now).await,
        ActionKind::Detach => detach_resource(cp, agent_id, action).await,
        ActionKind::Skip => Ok(()),
    }
}

fn entity_layer(options: &ApplyOptions, kind: Kind, name: &str) -> PackageLayer {
    options.desired_state.get(kind, name).and_then(|e| e.layer).unwrap_or(PackageLayer::Base)
}

async fn attach_resource(cp: &dyn ControlPlane, agent_id: &str, action: &Action, options: &ApplyOptions, now: DateTime<Utc>) -> Result<()> {
    match action.resource_kind {
        ResourceKind::Block => {
            let entity = options.desired_state.get(Kind::Block, &action.name).ok_or_else(|| Error::not_found("block entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Block(s) => s,
                _ => return Err(Error::Internal("block entity has non-block spec".into())),
            };
            let layer = entity_layer(options, Kind::Block, &action.name);
            let marker = build_marker(layer, options, now);
            let mut metadata = reconciler_core::marker_to_metadata(&marker);
            metadata.insert("source".to_string(), action.name.clone());

            let existing = cp.list_blocks(agent_id, ListFilter { name: Some(spec.label.clone()) }).await?;
            let block = match existing.into_iter().find(|b| b.label == spec.label && b.metadata.get("source").map(String::as_str) == Some(action.name.as_str())) {
                Some(found) => found,
                None => cp.create_block(spec, metadata).await?,
            };
            treat_conflict_as_success(cp.attach_block(agent_id, &block.id).await)
        }
        ResourceKind::Tool => {
            let entity = options.desired_state.get(Kind::Tool, &action.name).ok_or_else(|| Error::not_found("tool entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Tool(s) => s,
                _ => return Err(Error::Internal("tool entity has non-tool spec".into())),
            };
            let layer = entity_layer(options, Kind::Tool, &action.name);
            let marker = build_marker(layer, options, now);
            let tags = reconciler_core::marker_to_tags(&marker);

            let existing = cp.list_tools(agent_id, ListFilter { name: Some(action.name.clone()) }).await?;
            let tool = match existing.into_iter().find(|t| t.name == action.name) {
                Some(found) => found,
                None => cp.create_tool(&action.name, spec, tags).await?,
            };
            treat_conflict_as_success(cp.attach_tool(agent_id, &tool.id).await)
        }
        ResourceKind::Folder => {
            let layer = entity_layer(options, Kind::Folder, &action.name);
            let marker = build_marker(layer, options, now);
            let mut metadata = reconciler_core::marker_to_metadata(&marker);
            metadata.insert("source".to_string(), action.name.clone());

            let existing = cp.list_folders(agent_id, ListFilter { name: Some(action.name.clone()) }).await?;
            let folder = match existing.into_iter().find(|f| f.name == action.name) {
                Some(found) => found,
                None => cp.create_folder(&action.name, metadata).await?,
            };
            treat_conflict_as_success(cp.attach_folder(agent_id, &folder.id).await)
        }
        ResourceKind::Identity => {
            let identifier = match &action.payload {
                ActionPayload::Identity { identifier, .. } => identifier.as_str(),
                _ => return Err(Error::Internal("attach identity action carries a non-identity payload".into())),
            };
            let identity_type = crate::identity::entity_identity_type(&options.desired_state, &action.name)?;
            let default_org = options.org.clone().unwrap_or_else(|| "default".to_string());
            crate::identity::attach_one(cp, agent_id, identifier, &default_org, identity_type, &options.auto_create_policy, now).await
        }
        ResourceKind::Agent => Err(Error::apply("attach", "agent-level attach has no execution path")),
    }
}

async fn update_resource(cp: &dyn ControlPlane, action: &Action, options: &ApplyOptions) -> Result<()> {
    match (&action.payload, action.resource_kind) {
        (ActionPayload::Block { resource_id: Some(id), .. }, ResourceKind::Block) => {
            let entity = options.desired_state.get(Kind::Block, &action.name).ok_or_else(|| Error::not_found("block entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Block(s) => s,
                _ => return Err(Error::Internal("block entity has non-block spec".into())),
            };
            cp.update_block(id, &BlockPatch { value: Some(spec.value.clone()), description: Some(entity.description.clone()), limit: spec.limit, metadata: None })
                .await
                .map(|_| ())
        }
        (ActionPayload::Tool { resource_id: Some(id), .. }, ResourceKind::Tool) => {
            let entity = options.desired_state.get(Kind::Tool, &action.name).ok_or_else(|| Error::not_found("tool entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Tool(s) => s,
                _ => return Err(Error::Internal("tool entity has non-tool spec".into())),
            };
            cp.update_tool(id, &ToolPatch { source_code: Some(spec.source_code.clone()), description: Some(entity.description.clone()), json_schema: Some(spec.json_schema.clone()), tags: None })
                .await
                .map(|_| ())
        }
        _ => Err(Error::apply("update", format!("no execution path for {} update", action.resource_kind))),
    }
}

async fn adopt_resource(cp: &dyn ControlPlane, action: &Action, options: &ApplyOptions, now: DateTime<Utc>) -> Result<()> {
    let resource_id = action.payload.resource_id().map(str::to_string);
    match action.resource_kind {
        ResourceKind::Block => {
            let id = resource_id.ok_or_else(|| Error::Internal("adopt action missing resource_id".into()))?;
            let entity = options.desired_state.get(Kind::Block, &action.name).ok_or_else(|| Error::not_found("block entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Block(s) => s,
                _ => return Err(Error::Internal("block entity has non-block spec".into())),
            };
            let layer = entity_layer(options, Kind::Block, &action.name);
            let marker = build_marker(layer, options, now).adopted(now, action.name.clone());
            let mut metadata = reconciler_core::marker_to_metadata(&marker);
            metadata.insert("source".to_string(), action.name.clone());
            cp.update_block(&id, &BlockPatch { value: Some(spec.value.clone()), description: Some(entity.description.clone()), limit: spec.limit, metadata: Some(metadata) })
                .await
                .map(|_| ())
        }
        ResourceKind::Tool => {
            let id = resource_id.ok_or_else(|| Error::Internal("adopt action missing resource_id".into()))?;
            let entity = options.desired_state.get(Kind::Tool, &action.name).ok_or_else(|| Error::not_found("tool entity", &action.name))?;
            let spec = match &entity.spec {
                EntitySpec::Tool(s) => s,
                _ => return Err(Error::Internal("tool entity has non-tool spec".into())),
            };
            let layer = entity_layer(options, Kind::Tool, &action.name);
            let marker = build_marker(layer, options, now).adopted(now, action.name.clone());
            let tags = reconciler_core::marker_to_tags(&marker);
            cp.update_tool(&id, &ToolPatch { source_code: Some(spec.source_code.clone()), description: Some(entity.description.clone()), json_schema: Some(spec.json_schema.clone()), tags: Some(tags) })
                .await
                .map(|_| ())
        }
        ResourceKind::Folder => {
            let id = resource_id.ok_or_else(|| Error::Internal("adopt action missing resource_id".into()))?;
            let layer = entity_layer(options, Kind::Folder, &action.name);
            let marker = build_marker(layer, options, now).adopted(now, action.name.clone());
            let mut metadata = reconciler_core::marker_to_metadata(&marker);
            metadata.insert("source".to_string(), action.name.clone());
            cp.update_folder(&id, metadata).await.map(|_| ())
        }
        // Identities have no "adopt in place" step: ensure/attach already
        // converges an unmanaged-but-matching identity onto the desired one.
        ResourceKind::Identity | ResourceKind::Agent => Ok(()),
    }
}

async fn detach_resource(cp: &dyn ControlPlane, agent_id: &str, action: &Action) -> Result<()> {
    match (&action.payload, action.resource_kind) {
        (ActionPayload::Block { resource_id: Some(id), .. }, ResourceKind::Block) => treat_conflict_as_success(cp.detach_block(agent_id, id).await),
        (ActionPayload::Tool { resource_id: Some(id), .. }, ResourceKind::Tool) => treat_conflict_as_success(cp.detach_tool(agent_id, id).await),
        (ActionPayload::Folder { resource_id: Some(id), .. }, ResourceKind::Folder) => treat_conflict_as_success(cp.detach_folder(agent_id, id).await),
        (ActionPayload::Identity { resource_id: Some(id), .. }, ResourceKind::Identity) => {
            crate::identity::detach_many(cp, agent_id, std::slice::from_ref(id)).await
        }
        _ => Err(Error::apply("detach", format!("no execution path for {} detach", action.resource_kind))),
    }
}

async fn rebuild_and_write_tags(cp: &dyn ControlPlane, agent_id: &str, role: AgentRole, channel: ReleaseChannel, options: &ApplyOptions, now: DateTime<Utc>) -> Result<()> {
    let agent = cp.retrieve_agent(agent_id).await?;
    let fields = AgentTagFields { role, channel, package_versions: options.package_version.clone().into_iter().collect(), last_synced: now };
    let tags = rebuild_agent_tags(&agent.tags, &fields);
    cp.update_agent(agent_id, &AgentPatch { tags: Some(tags), ..Default::default() }).await.map(|_| ())
}

fn build_managed_state(observed: &ObservedAgentState, options: &ApplyOptions, channel: ReleaseChannel, now: DateTime<Utc>) -> ManagedState {
    let is_initial = observed.managed_state.is_none();
    let mut state = observed.managed_state.clone().unwrap_or_else(|| ManagedState {
        applied_packages: Default::default(),
        reconciler_version: RECONCILER_VERSION.to_string(),
        last_upgrade_type: UpgradeType::Initial,
        upgrade_channel: channel,
        last_upgrade_at: now,
    });

    let upgrade_type = if is_initial {
        UpgradeType::Initial
    } else if options.force {
        UpgradeType::BreakingManual
    } else {
        UpgradeType::SafeAuto
    };

    for (layer, version) in &options.package_version {
        let package_path = options.package_paths.get(layer).cloned().unwrap_or_default();
        state.record_application(*layer, version.clone(), package_path, now, upgrade_type, channel);
    }
    state.reconciler_version = RECONCILER_VERSION.to_string();
    state
}

async fn write_managed_state_record(cp: &dyn ControlPlane, agent_id: &str, observed: &ObservedAgentState, state: &ManagedState) -> Result<()> {
    let text = state.serialize()?;
    let existing = observed
        .blocks
        .iter()
        .find(|b| b.label == MANAGED_STATE_LABEL && b.metadata.get("source").map(String::as_str) == Some(agent_id));

    match existing {
        Some(block) => {
            cp.update_block(&block.id, &BlockPatch { value: Some(text), ..Default::default() }).await?;
        }
        None => {
            let spec = reconciler_core::BlockSpec { label: MANAGED_STATE_LABEL.to_string(), value: text, limit: None, read_only: true };
            let mut metadata = HashMap::new();
            metadata.insert("source".to_string(), agent_id.to_string());
            let block = cp.create_block(&spec, metadata).await?;
            cp.attach_block(agent_id, &block.id).await?;
        }
    }
    Ok(())
}
