//! The Upgrade Controller (spec.md §4.5): the happy-path flow for one agent.

use chrono::{DateTime, Utc};
use reconciler_apply::{apply_plan, ApplyOptions, ApplyResult};
use reconciler_core::{ControlPlane, DesiredState, Error, Kind, ListFilter, ManagedState, ObservedAgentState, PackageLayer, Result};
use reconciler_ownership::classify_agent;
use reconciler_plan::{build_plan, Plan, PlanOptions};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Fetch one agent's observed state: its tags/identity set plus every
/// currently attached block/tool/folder/identity, and the `managed_state`
/// record if one is present among its blocks.
pub async fn fetch_observed(control_plane: &dyn ControlPlane, agent_id: &str) -> Result<ObservedAgentState> {
    let agent = control_plane.retrieve_agent(agent_id).await?;
    let blocks = control_plane.list_agent_blocks(agent_id).await?;
    let tools = control_plane.list_tools(agent_id, ListFilter::default()).await?;
    let folders = control_plane.list_folders(agent_id, ListFilter::default()).await?;

    let all_identities = control_plane.list_identities(ListFilter::default()).await?;
    let identities = all_identities.into_iter().filter(|i| agent.identity_ids.contains(&i.id)).collect();

    let managed_state = blocks
        .iter()
        .find(|b| b.label == reconciler_core::MANAGED_STATE_LABEL && b.metadata.get("source").map(String::as_str) == Some(agent_id))
        .map(|b| ManagedState::parse(&b.value))
        .transpose()?;

    Ok(ObservedAgentState {
        agent_id: agent_id.to_string(),
        blocks,
        tools,
        folders,
        identities,
        tags: agent.tags,
        managed_state,
    })
}

/// Whether a single upgrade run should preview (dry-run) or actually apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeMode {
    Preview,
    Apply,
}

#[derive(Clone, Debug)]
pub struct UpgradeOptions {
    pub mode: UpgradeMode,
    pub force: bool,
    pub allow_delete: bool,
    pub force_breaking_preview: bool,
    pub package_version: HashMap<PackageLayer, String>,
    pub package_paths: HashMap<PackageLayer, String>,
    pub org: Option<String>,
    pub project: Option<String>,
    pub auto_create_policy: reconciler_apply::AutoCreatePolicy,
    /// Caller-supplied cancellation signal, threaded through to the Apply
    /// Engine (spec.md §5). A fresh, never-cancelled token by default.
    pub cancellation: CancellationToken,
}

impl UpgradeOptions {
    /// One version stamped uniformly across every layer that has a
    /// `packagePaths` entry, matching the "repository's current git
    /// short-SHA" this step uses as the target version per layer.
    pub fn with_git_sha(git_short_sha: impl Into<String>, package_paths: HashMap<PackageLayer, String>, mode: UpgradeMode) -> Self {
        let sha = git_short_sha.into();
        let package_version = package_paths.keys().map(|layer| (*layer, sha.clone())).collect();
        Self {
            mode,
            force: false,
            allow_delete: false,
            force_breaking_preview: false,
            package_version,
            package_paths,
            org: None,
            project: None,
            auto_create_policy: reconciler_apply::AutoCreatePolicy::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

#[derive(serde::Serialize)]
pub struct UpgradeOutcome {
    pub plan: Plan,
    pub apply_result: Option<ApplyResult>,
    /// Mirrors `apply_result.cancelled`; always `false` in `Preview` mode,
    /// since there is no apply phase for cancellation to interrupt.
    pub cancelled: bool,
}

/// Drive one agent through load → fetch → classify → plan → (preview | apply).
/// The caller has already loaded `desired` once (the Manifest Loader is
/// agent-independent); this function does the per-agent remainder.
pub async fn upgrade_agent(
    control_plane: &dyn ControlPlane,
    agent_id: &str,
    desired: &DesiredState,
    opts: &UpgradeOptions,
    now: DateTime<Utc>,
) -> Result<UpgradeOutcome> {
    let observed = fetch_observed(control_plane, agent_id).await?;
    let role = observed.role();
    let channel = observed.channel();

    let classified = classify_agent(&observed, desired);
    let plan_options = PlanOptions {
        target_version: opts.package_version.clone(),
        force_breaking: opts.force_breaking_preview,
    };
    let plan = build_plan(agent_id, &observed, desired, &classified, channel, &plan_options, now);

    let apply_result = match opts.mode {
        UpgradeMode::Preview => None,
        UpgradeMode::Apply => {
            let mut apply_options = ApplyOptions::new(desired.clone());
            apply_options.dry_run = false;
            apply_options.force = opts.force;
            apply_options.allow_delete = opts.allow_delete;
            apply_options.package_version = opts.package_version.clone();
            apply_options.package_paths = opts.package_paths.clone();
            apply_options.org = opts.org.clone();
            apply_options.project = opts.project.clone();
            apply_options.auto_create_policy = opts.auto_create_policy;
            apply_options.cancellation = opts.cancellation.clone();
            Some(apply_plan(control_plane, &plan, &observed, role, channel, &apply_options, now).await?)
        }
    };

    let cancelled = apply_result.as_ref().is_some_and(|r| r.cancelled);
    Ok(UpgradeOutcome { plan, apply_result, cancelled })
}

/// `validateAgentIdentities`'s raw-input source: every `Identity` entity's
/// declared identifier string in the desired state, for the caller that
/// wants to sanity-check manifests without touching the control plane.
pub fn desired_identity_inputs(desired: &DesiredState) -> Vec<String> {
    desired
        .names(Kind::Identity)
        .into_iter()
        .filter_map(|name| desired.get(Kind::Identity, name))
        .filter_map(|entity| match &entity.spec {
            reconciler_core::EntitySpec::Identity(spec) => Some(spec.identifier.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod support;
