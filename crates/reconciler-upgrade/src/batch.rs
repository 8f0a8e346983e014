//! Batch mode (spec.md §4.5, §5.1): partition a selection of agents into
//! concurrency-bounded batches and run per-agent upgrades under a
//! `Semaphore`-gated `JoinSet`, mirroring
//! `agenticlaw_tools::registry::ToolRegistry::execute_cancellable`'s use of
//! `tokio` primitives in place of a hand-rolled thread pool.

use crate::controller::{upgrade_agent, UpgradeOptions};
use chrono::Utc;
use reconciler_core::{AgentRole, ControlPlane, DesiredState, ReleaseChannel};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// `{managedOnly, roles?, channels?, project?, org?}` (spec.md §4.5).
/// `project`/`org` match against plain `org:`/`project:` tags a caller may
/// have set on the agent for selection purposes — the reconciler's own tag
/// rebuild (see `reconciler-apply::tags`) never writes those, so this is
/// purely a selection-time convenience, not a managed field.
#[derive(Clone, Debug, Default)]
pub struct BatchSelection {
    pub managed_only: bool,
    pub roles: Option<HashSet<AgentRole>>,
    pub channels: Option<HashSet<ReleaseChannel>>,
    pub project: Option<String>,
    pub org: Option<String>,
}

impl BatchSelection {
    fn matches_tags(&self, tags: &[String]) -> bool {
        if let Some(project) = &self.project {
            let found = tags.iter().any(|t| t.strip_prefix("project:").is_some_and(|v| v == project));
            if !found {
                return false;
            }
        }
        if let Some(org) = &self.org {
            let found = tags.iter().any(|t| t.strip_prefix("org:").is_some_and(|v| v == org));
            if !found {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct AgentUpgradeResult {
    pub agent_id: String,
    pub success: bool,
    pub safe_changes: usize,
    pub breaking_changes: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl AgentUpgradeResult {
    fn skipped_by_selection(agent_id: String) -> Self {
        Self { agent_id, success: true, safe_changes: 0, breaking_changes: 0, warnings: Vec::new(), errors: Vec::new() }
    }

    fn failed(agent_id: String, message: String) -> Self {
        Self { agent_id, success: false, safe_changes: 0, breaking_changes: 0, warnings: Vec::new(), errors: vec![message] }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<AgentUpgradeResult>,
}

/// Run `upgrade_agent` for every candidate agent id, filtering first by
/// `selection` against each agent's fetched tags. Every candidate is
/// spawned as its own `tokio` task onto `tasks`, gated by a `Semaphore`
/// permit acquired before spawn and dropped on task completion so no more
/// than `concurrency` upgrades run at once; there is no batch-boundary
/// barrier beyond that bound. `fail_fast` stops spawning further tasks (the
/// ones already in flight still run to completion) on the first failure.
pub async fn upgrade_batch(
    control_plane: Arc<dyn ControlPlane>,
    candidate_agent_ids: &[String],
    selection: &BatchSelection,
    desired: &DesiredState,
    opts: &UpgradeOptions,
    concurrency: usize,
    fail_fast: bool,
) -> BatchSummary {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let desired = Arc::new(desired.clone());
    let opts = Arc::new(opts.clone());
    let mut tasks = JoinSet::new();
    let mut summary = BatchSummary::default();
    let mut halted = false;

    for agent_id in candidate_agent_ids {
        // `opts.cancellation` is shared with every in-flight task (the
        // token clones point at the same underlying state), so a caller
        // cancelling it mid-batch stops new spawns here exactly the way
        // `fail_fast` does, per spec.md §5's "stops starting new actions".
        if halted || opts.cancellation.is_cancelled() {
            halted = true;
            summary.skipped += 1;
            continue;
        }

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore is never closed while tasks are outstanding");
        let control_plane = control_plane.clone();
        let selection = selection.clone();
        let desired = desired.clone();
        let opts = opts.clone();
        let agent_id = agent_id.clone();
        let now = Utc::now();

        tasks.spawn(async move {
            let _permit = permit;
            run_one(control_plane.as_ref(), agent_id, selection, desired.as_ref(), opts.as_ref(), now).await
        });

        // Draining completed tasks as we go (rather than waiting for every
        // spawn to land first) is what lets fail_fast observe an early
        // failure before the whole candidate list has even been queued.
        while let Some(result) = tasks.try_join_next() {
            record(&mut summary, &mut halted, result, fail_fast);
        }
    }

    while let Some(result) = tasks.join_next().await {
        record(&mut summary, &mut halted, result, fail_fast);
    }

    summary
}

fn record(summary: &mut BatchSummary, halted: &mut bool, joined: Result<AgentUpgradeResult, tokio::task::JoinError>, fail_fast: bool) {
    summary.total += 1;
    let result = match joined {
        Ok(result) => result,
        Err(e) => AgentUpgradeResult::failed("unknown".to_string(), format!("task join error: {e}")),
    };
    if result.success {
        summary.succeeded += 1;
    } else {
        summary.failed += 1;
        if fail_fast {
            *halted = true;
        }
    }
    summary.results.push(result);
}

async fn run_one(
    control_plane: &dyn ControlPlane,
    agent_id: String,
    selection: BatchSelection,
    desired: &DesiredState,
    opts: &UpgradeOptions,
    now: chrono::DateTime<Utc>,
) -> AgentUpgradeResult {
    let observed = match crate::controller::fetch_observed(control_plane, &agent_id).await {
        Ok(o) => o,
        Err(e) => return AgentUpgradeResult::failed(agent_id, e.to_string()),
    };

    if selection.managed_only && observed.managed_state.is_none() {
        return AgentUpgradeResult::skipped_by_selection(agent_id);
    }
    if let Some(roles) = &selection.roles {
        if !roles.contains(&observed.role()) {
            return AgentUpgradeResult::skipped_by_selection(agent_id);
        }
    }
    if let Some(channels) = &selection.channels {
        if !channels.contains(&observed.channel()) {
            return AgentUpgradeResult::skipped_by_selection(agent_id);
        }
    }
    if !selection.matches_tags(&observed.tags) {
        return AgentUpgradeResult::skipped_by_selection(agent_id);
    }

    match upgrade_agent(control_plane, &agent_id, desired, opts, now).await {
        Ok(outcome) => {
            let mut errors = Vec::new();
            let mut success = true;
            if let Some(result) = &outcome.apply_result {
                success = result.success;
                errors.extend(result.errors.clone());
            }
            AgentUpgradeResult {
                agent_id,
                success,
                safe_changes: outcome.plan.summary.safe_changes,
                breaking_changes: outcome.plan.summary.breaking_changes,
                warnings: outcome.plan.warnings.clone(),
                errors,
            }
        }
        Err(e) => AgentUpgradeResult::failed(agent_id, e.to_string()),
    }
}

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod support;
