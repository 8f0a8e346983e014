//! Apply Engine phase 3: rebuild an agent's tag set, preserving anything the
//! user added by hand and overwriting only the fields this system owns.

use chrono::{DateTime, Utc};
use reconciler_core::{AgentRole, PackageLayer, ReleaseChannel, SYSTEM_NAME};
use std::collections::BTreeMap;

const RESERVED_PREFIXES: &[&str] = &["managed_by=", "layer=", "role:", "channel:", "last_synced=", "package_version:"];

#[derive(Clone, Debug)]
pub struct AgentTagFields {
    pub role: AgentRole,
    pub channel: ReleaseChannel,
    pub package_versions: BTreeMap<PackageLayer, String>,
    pub last_synced: DateTime<Utc>,
}

/// `layer=` is stamped with the highest-precedence layer actively carrying a
/// package version this run — `Project` overrides `Org` overrides `Base`,
/// the same precedence ordering the manifest merge uses.
fn primary_layer(package_versions: &BTreeMap<PackageLayer, String>) -> Option<PackageLayer> {
    package_versions.keys().next_back().copied()
}

pub fn rebuild_agent_tags(existing: &[String], fields: &AgentTagFields) -> Vec<String> {
    let mut tags: Vec<String> = existing.iter().filter(|t| !RESERVED_PREFIXES.iter().any(|p| t.starts_with(p))).cloned().collect();

    tags.push(format!("managed_by={SYSTEM_NAME}"));
    if let Some(layer) = primary_layer(&fields.package_versions) {
        tags.push(format!("layer={layer}"));
    }
    tags.push(format!("role:{}", fields.role));
    tags.push(format!("channel:{}", fields.channel));
    tags.push(format!("last_synced={}", fields.last_synced.to_rfc3339()));
    for (layer, version) in &fields.package_versions {
        tags.push(format!("package_version:{layer}={version}"));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_tags_survive_rebuild() {
        let existing = vec!["team=payments".to_string(), "managed_by=someone-else".to_string()];
        let mut package_versions = BTreeMap::new();
        package_versions.insert(PackageLayer::Base, "abc1234".to_string());
        let fields = AgentTagFields { role: AgentRole::LaneDev, channel: ReleaseChannel::Stable, package_versions, last_synced: Utc::now() };

        let tags = rebuild_agent_tags(&existing, &fields);
        assert!(tags.contains(&"team=payments".to_string()));
        assert!(tags.contains(&format!("managed_by={SYSTEM_NAME}")));
        assert!(!tags.iter().any(|t| t == "managed_by=someone-else"));
    }

    #[test]
    fn package_version_is_stamped_per_layer() {
        let mut package_versions = BTreeMap::new();
        package_versions.insert(PackageLayer::Base, "aaa1111".to_string());
        package_versions.insert(PackageLayer::Project, "bbb2222".to_string());
        let fields = AgentTagFields { role: AgentRole::Supervisor, channel: ReleaseChannel::Beta, package_versions, last_synced: Utc::now() };

        let tags = rebuild_agent_tags(&[], &fields);
        assert!(tags.contains(&"package_version:base=aaa1111".to_string()));
        assert!(tags.contains(&"package_version:project=bbb2222".to_string()));
        assert!(tags.contains(&"layer=project".to_string()));
    }

    #[test]
    fn rebuild_is_idempotent_on_already_managed_tags() {
        let mut package_versions = BTreeMap::new();
        package_versions.insert(PackageLayer::Base, "aaa1111".to_string());
        let fields = AgentTagFields { role: AgentRole::LaneDev, channel: ReleaseChannel::Stable, package_versions, last_synced: Utc::now() };

        let first = rebuild_agent_tags(&[], &fields);
        let second = rebuild_agent_tags(&first, &fields);
        let mut a = first.clone();
        let mut b = second.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
