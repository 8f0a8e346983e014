//! reconciler-upgrade — the Upgrade Controller (spec.md §4.5): drives one
//! agent, or a selected batch of agents, through load → fetch → classify →
//! plan → preview-or-apply.

pub mod batch;
pub mod controller;

pub use batch::{upgrade_batch, AgentUpgradeResult, BatchSelection, BatchSummary};
pub use controller::{desired_identity_inputs, fetch_observed, upgrade_agent, UpgradeMode, UpgradeOptions, UpgradeOutcome};
