//! The system's ownership marker, carried in tags (for tagged resources) or
//! metadata (for untagged ones).

use crate::layer::PackageLayer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name this system identifies itself by in `managed_by` markers.
pub const SYSTEM_NAME: &str = "letta-sync";

/// The reserved label for the `managed_state` block attached to every
/// reconciled agent.
pub const MANAGED_STATE_LABEL: &str = "managed_state";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResourceMarker {
    pub managed_by: String,
    pub layer: PackageLayer,
    pub last_synced: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

impl ResourceMarker {
    pub fn new(layer: PackageLayer, now: DateTime<Utc>) -> Self {
        Self {
            managed_by: SYSTEM_NAME.to_string(),
            layer,
            last_synced: now,
            org: None,
            project: None,
            package_version: None,
            adopted_at: None,
            original_name: None,
        }
    }

    pub fn is_ours(&self) -> bool {
        self.managed_by == SYSTEM_NAME
    }

    pub fn adopted(mut self, now: DateTime<Utc>, original_name: impl Into<String>) -> Self {
        self.adopted_at = Some(now);
        self.original_name = Some(original_name.into());
        self
    }
}

/// Where an observed resource's marker was found: tags (tools, agents) or a
/// metadata map (blocks, folders — resources whose wire type carries no tags).
#[derive(Clone, Debug, Default)]
pub struct MarkerSource {
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl MarkerSource {
    pub fn from_tags(tags: Vec<String>) -> Self {
        Self {
            tags,
            metadata: HashMap::new(),
        }
    }

    pub fn from_metadata(metadata: HashMap<String, String>) -> Self {
        Self {
            tags: Vec::new(),
            metadata,
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        for tag in &self.tags {
            if let Some(value) = tag.strip_prefix(&format!("{key}=")) {
                return Some(value.to_string());
            }
        }
        self.metadata.get(key).cloned()
    }

    /// Parse a marker out of tags/metadata, if this system's marker is present.
    pub fn parse_marker(&self) -> Option<ResourceMarker> {
        let managed_by = self.get("managed_by")?;
        if managed_by != SYSTEM_NAME {
            return None;
        }
        let layer = match self.get("layer")?.as_str() {
            "base" => PackageLayer::Base,
            "org" => PackageLayer::Org,
            "project" => PackageLayer::Project,
            _ => return None,
        };
        let last_synced = self
            .get("last_synced")
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|v| v.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(ResourceMarker {
            managed_by,
            layer,
            last_synced,
            org: self.get("org"),
            project: self.get("project"),
            package_version: self.get("package_version"),
            adopted_at: self
                .get("adopted_at")
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|v| v.with_timezone(&Utc)),
            original_name: self.get("original_name"),
        })
    }

    /// Whether *any* marker (ours or foreign) is present.
    pub fn has_any_marker(&self) -> bool {
        self.get("managed_by").is_some()
    }
}

/// Render a marker into tag strings (`key=value`), for resource kinds whose
/// wire type carries tags.
pub fn marker_to_tags(marker: &ResourceMarker) -> Vec<String> {
    let mut tags = vec![
        format!("managed_by={}", marker.managed_by),
        format!("layer={}", marker.layer),
        format!("last_synced={}", marker.last_synced.to_rfc3339()),
    ];
    if let Some(org) = &marker.org {
        tags.push(format!("org={org}"));
    }
    if let Some(project) = &marker.project {
        tags.push(format!("project={project}"));
    }
    if let Some(version) = &marker.package_version {
        tags.push(format!("package_version={version}"));
    }
    if let Some(adopted_at) = &marker.adopted_at {
        tags.push(format!("adopted_at={}", adopted_at.to_rfc3339()));
    }
    if let Some(original_name) = &marker.original_name {
        tags.push(format!("original_name={original_name}"));
    }
    tags
}

/// Render a marker into a metadata map, for resource kinds without tags.
pub fn marker_to_metadata(marker: &ResourceMarker) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("managed_by".to_string(), marker.managed_by.clone());
    metadata.insert("layer".to_string(), marker.layer.to_string());
    metadata.insert("last_synced".to_string(), marker.last_synced.to_rfc3339());
    if let Some(org) = &marker.org {
        metadata.insert("org".to_string(), org.clone());
    }
    if let Some(project) = &marker.project {
        metadata.insert("project".to_string(), project.clone());
    }
    if let Some(version) = &marker.package_version {
        metadata.insert("package_version".to_string(), version.clone());
    }
    if let Some(adopted_at) = &marker.adopted_at {
        metadata.insert("adopted_at".to_string(), adopted_at.to_rfc3339());
    }
    if let Some(original_name) = &marker.original_name {
        metadata.insert("original_name".to_string(), original_name.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrips_through_tags() {
        let now = Utc::now();
        let marker = ResourceMarker::new(PackageLayer::Org, now).adopted(now, "old-name");
        let tags = marker_to_tags(&marker);
        let source = MarkerSource::from_tags(tags);
        let parsed = source.parse_marker().unwrap();
        assert_eq!(parsed.managed_by, SYSTEM_NAME);
        assert_eq!(parsed.layer, PackageLayer::Org);
        assert_eq!(parsed.original_name.as_deref(), Some("old-name"));
    }

    #[test]
    fn foreign_marker_is_not_ours() {
        let tags = vec!["managed_by=someone-else".to_string(), "layer=base".to_string()];
        let source = MarkerSource::from_tags(tags);
        assert!(source.parse_marker().is_none());
        assert!(source.has_any_marker());
    }

    #[test]
    fn no_marker_present() {
        let source = MarkerSource::from_tags(vec!["color=blue".to_string()]);
        assert!(source.parse_marker().is_none());
        assert!(!source.has_any_marker());
    }
}
