//! Desired state (merged manifests) and observed agent state (control plane).

use crate::control_plane::{RemoteBlock, RemoteFolder, RemoteIdentity, RemoteTool};
use crate::entity::{Kind, ManifestEntity};
use crate::layer::{AgentRole, PackageLayer, ReleaseChannel};
use crate::managed_state::ManagedState;
use std::collections::HashMap;

/// Which layer each surviving entity in the desired state came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerTags(pub HashMap<(Kind, String), PackageLayer>);

impl LayerTags {
    pub fn get(&self, kind: Kind, name: &str) -> Option<PackageLayer> {
        self.0.get(&(kind, name.to_string())).copied()
    }
}

/// The outcome of merging all layer manifests: one map per kind, keyed by
/// canonical name, plus the effective layer tag of each survivor.
#[derive(Clone, Debug, Default)]
pub struct DesiredState {
    pub entities: HashMap<Kind, HashMap<String, ManifestEntity>>,
    pub layer_tags: LayerTags,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: Kind, name: &str) -> Option<&ManifestEntity> {
        self.entities.get(&kind)?.get(name)
    }

    pub fn kind_map(&self, kind: Kind) -> Option<&HashMap<String, ManifestEntity>> {
        self.entities.get(&kind)
    }

    pub fn names(&self, kind: Kind) -> Vec<&str> {
        self.entities
            .get(&kind)
            .map(|m| m.keys().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, entity: ManifestEntity) {
        let kind = entity.kind();
        let layer = entity.layer.expect("entity must carry a layer before merge");
        self.layer_tags.0.insert((kind, entity.name.clone()), layer);
        self.entities
            .entry(kind)
            .or_default()
            .insert(entity.name.clone(), entity);
    }
}

/// What the control plane reports for one agent: currently attached
/// resources, tags, and (if previously reconciled) the managed_state record.
#[derive(Clone, Debug, Default)]
pub struct ObservedAgentState {
    pub agent_id: String,
    pub blocks: Vec<RemoteBlock>,
    pub tools: Vec<RemoteTool>,
    pub folders: Vec<RemoteFolder>,
    pub identities: Vec<RemoteIdentity>,
    pub tags: Vec<String>,
    pub managed_state: Option<ManagedState>,
}

impl ObservedAgentState {
    pub fn role(&self) -> AgentRole {
        for tag in &self.tags {
            if let Some(value) = tag.strip_prefix("role:") {
                return AgentRole::from_tag(value);
            }
        }
        AgentRole::LaneDev
    }

    pub fn channel(&self) -> ReleaseChannel {
        for tag in &self.tags {
            if let Some(value) = tag.strip_prefix("channel:") {
                return ReleaseChannel::from_tag(value);
            }
        }
        ReleaseChannel::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_from_tags_with_historical_fallback() {
        let mut observed = ObservedAgentState::default();
        observed.tags = vec!["role:agent".to_string()];
        assert_eq!(observed.role(), AgentRole::LaneDev);

        observed.tags = vec!["role:supervisor".to_string()];
        assert_eq!(observed.role(), AgentRole::Supervisor);
    }

    #[test]
    fn channel_defaults_to_stable_when_untagged() {
        let observed = ObservedAgentState::default();
        assert_eq!(observed.channel(), ReleaseChannel::Stable);
    }
}
