//! reconciler-ownership — partitions observed resources into
//! {managed, adopted, orphaned, foreign}.

use reconciler_core::{DesiredState, Kind, MarkerSource, ObservedAgentState, ResourceMarker};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Carries the marker and appears in desired state under the same kind.
    Managed,
    /// Carries the marker but is absent from desired state (or the desired
    /// entity under the same name exists only under a conflicting kind).
    Orphaned,
    /// No marker, but its canonical name appears in desired state.
    Adopted,
    /// Neither marker nor manifest presence; never touched.
    Foreign,
}

/// Classify one observed resource given its marker (if any, already parsed
/// from its tags/metadata) and the desired state for the whole agent.
///
/// Tie-break: a resource carrying this system's marker whose canonical name
/// exists in desired state only under a *different* kind is treated as
/// foreign, not orphaned — a name collision across kinds is not evidence
/// this particular resource is still wanted.
pub fn classify(kind: Kind, name: &str, marker_source: &MarkerSource, desired: &DesiredState) -> Classification {
    let marker: Option<ResourceMarker> = marker_source.parse_marker();
    let desired_here = desired.get(kind, name).is_some();

    match marker {
        Some(_) if desired_here => Classification::Managed,
        Some(_) => {
            if exists_under_other_kind(kind, name, desired) {
                Classification::Foreign
            } else {
                Classification::Orphaned
            }
        }
        None if desired_here => Classification::Adopted,
        None => Classification::Foreign,
    }
}

fn exists_under_other_kind(kind: Kind, name: &str, desired: &DesiredState) -> bool {
    const ALL_KINDS: [Kind; 7] = [
        Kind::Block,
        Kind::Tool,
        Kind::Folder,
        Kind::Identity,
        Kind::McpServer,
        Kind::Template,
        Kind::Policy,
    ];
    ALL_KINDS
        .iter()
        .filter(|&&k| k != kind)
        .any(|&k| desired.get(k, name).is_some())
}

/// One observed resource's classification plus its control-plane id, so
/// callers (the Plan Builder) don't need to re-derive the match.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedResource {
    pub classification: Classification,
    pub resource_id: String,
}

/// Canonical name a resource is known to the manifest world by. Tools and
/// folders are matched purely by their own `name` (spec.md §4.3: "the name
/// is the primary key"); blocks and identities carry a `source` metadata
/// key recording the manifest entity name once we manage them, since their
/// control-plane identity field (`label`, `identifier_key`) may legitimately
/// diverge from it (rename, normalization).
fn canonical_name(metadata: &HashMap<String, String>, fallback: &str) -> String {
    metadata.get("source").cloned().unwrap_or_else(|| fallback.to_string())
}

/// Insert a (kind, name) -> classification entry, keeping only the
/// deterministic first candidate (lowest control-plane id) when more than
/// one observed resource shares a canonical name. Spec.md §4.3: "if
/// multiple candidates exist the first deterministic match is chosen and
/// the others are ignored (pruning is a separate operation)".
fn insert_first_by_id(
    result: &mut HashMap<(Kind, String), ClassifiedResource>,
    key: (Kind, String),
    resource_id: String,
    classification: Classification,
) {
    match result.get(&key) {
        Some(existing) if existing.resource_id <= resource_id => {}
        _ => {
            result.insert(key, ClassifiedResource { classification, resource_id });
        }
    }
}

/// Classify every resource the control plane reports for one agent against
/// its desired state, across all four plannable kinds. This is the
/// aggregate the Upgrade Controller calls once per agent before handing the
/// result to the Plan Builder.
pub fn classify_agent(observed: &ObservedAgentState, desired: &DesiredState) -> HashMap<(Kind, String), ClassifiedResource> {
    let mut result = HashMap::new();

    for block in &observed.blocks {
        let name = canonical_name(&block.metadata, &block.label);
        let marker_source = MarkerSource::from_metadata(block.metadata.clone());
        let classification = classify(Kind::Block, &name, &marker_source, desired);
        insert_first_by_id(&mut result, (Kind::Block, name), block.id.clone(), classification);
    }

    for tool in &observed.tools {
        let marker_source = MarkerSource::from_tags(tool.tags.clone());
        let classification = classify(Kind::Tool, &tool.name, &marker_source, desired);
        insert_first_by_id(&mut result, (Kind::Tool, tool.name.clone()), tool.id.clone(), classification);
    }

    for folder in &observed.folders {
        let marker_source = MarkerSource::from_metadata(folder.metadata.clone());
        let classification = classify(Kind::Folder, &folder.name, &marker_source, desired);
        insert_first_by_id(&mut result, (Kind::Folder, folder.name.clone()), folder.id.clone(), classification);
    }

    for identity in &observed.identities {
        let name = canonical_name(&identity.metadata, &identity.identifier_key);
        let marker_source = MarkerSource::from_metadata(identity.metadata.clone());
        let classification = classify(Kind::Identity, &name, &marker_source, desired);
        insert_first_by_id(&mut result, (Kind::Identity, name), identity.id.clone(), classification);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reconciler_core::entity::{BlockSpec, EntitySpec, ToolSpec};
    use reconciler_core::{ManifestEntity, PackageLayer};

    fn desired_with_block(name: &str) -> DesiredState {
        let mut state = DesiredState::new();
        state.insert(
            ManifestEntity {
                name: name.to_string(),
                description: "d".to_string(),
                layer: None,
                spec: EntitySpec::Block(BlockSpec {
                    label: name.to_string(),
                    value: "v".to_string(),
                    limit: None,
                    read_only: false,
                }),
            }
            .with_layer(PackageLayer::Base),
        );
        state
    }

    fn desired_with_tool(name: &str) -> DesiredState {
        let mut state = DesiredState::new();
        state.insert(
            ManifestEntity {
                name: name.to_string(),
                description: "d".to_string(),
                layer: None,
                spec: EntitySpec::Tool(ToolSpec {
                    source_type: "python".to_string(),
                    source_code: "pass".to_string(),
                    json_schema: serde_json::json!({}),
                    tool_type: None,
                }),
            }
            .with_layer(PackageLayer::Base),
        );
        state
    }

    fn ours_marker() -> MarkerSource {
        let marker = ResourceMarker::new(PackageLayer::Base, Utc::now());
        MarkerSource::from_tags(reconciler_core::marker_to_tags(&marker))
    }

    #[test]
    fn managed_when_marker_and_present_in_desired() {
        let desired = desired_with_block("persona");
        let result = classify(Kind::Block, "persona", &ours_marker(), &desired);
        assert_eq!(result, Classification::Managed);
    }

    #[test]
    fn orphaned_when_marker_but_absent_from_desired() {
        let desired = DesiredState::new();
        let result = classify(Kind::Block, "retired", &ours_marker(), &desired);
        assert_eq!(result, Classification::Orphaned);
    }

    #[test]
    fn adopted_when_no_marker_but_present_in_desired() {
        let desired = desired_with_block("persona");
        let no_marker = MarkerSource::from_tags(vec![]);
        let result = classify(Kind::Block, "persona", &no_marker, &desired);
        assert_eq!(result, Classification::Adopted);
    }

    #[test]
    fn foreign_when_neither_marker_nor_desired() {
        let desired = DesiredState::new();
        let no_marker = MarkerSource::from_tags(vec![]);
        let result = classify(Kind::Block, "notes", &no_marker, &desired);
        assert_eq!(result, Classification::Foreign);
    }

    #[test]
    fn conflicting_kind_tie_break_is_foreign_not_orphaned() {
        // Desired has a Tool named "persona", but the observed resource is a
        // Block named "persona" carrying our marker.
        let desired = desired_with_tool("persona");
        let result = classify(Kind::Block, "persona", &ours_marker(), &desired);
        assert_eq!(result, Classification::Foreign);
    }

    #[test]
    fn classify_agent_covers_every_kind() {
        use reconciler_core::marker_to_metadata;
        use reconciler_core::{RemoteBlock, RemoteFolder, RemoteIdentity, RemoteTool};

        let desired = desired_with_block("persona");
        let marker = ResourceMarker::new(PackageLayer::Base, Utc::now());

        let mut metadata = marker_to_metadata(&marker);
        metadata.insert("source".to_string(), "persona".to_string());

        let observed = ObservedAgentState {
            agent_id: "agent-1".to_string(),
            blocks: vec![RemoteBlock {
                id: "block-1".to_string(),
                label: "persona".to_string(),
                value: "v".to_string(),
                description: None,
                limit: None,
                metadata,
            }],
            tools: vec![RemoteTool {
                id: "tool-1".to_string(),
                name: "orphan-tool".to_string(),
                source_code: "pass".to_string(),
                description: None,
                json_schema: serde_json::json!({}),
                tags: marker_to_tags_for_test(&marker),
            }],
            folders: vec![RemoteFolder {
                id: "folder-1".to_string(),
                name: "untouched".to_string(),
                metadata: HashMap::new(),
            }],
            identities: vec![RemoteIdentity {
                id: "identity-1".to_string(),
                identifier_key: "org:acme:user:paul".to_string(),
                display_name: "Paul".to_string(),
                metadata: HashMap::new(),
            }],
            tags: vec![],
            managed_state: None,
        };

        let result = classify_agent(&observed, &desired);
        assert_eq!(
            result[&(Kind::Block, "persona".to_string())].classification,
            Classification::Managed
        );
        assert_eq!(
            result[&(Kind::Tool, "orphan-tool".to_string())].classification,
            Classification::Orphaned
        );
        assert_eq!(
            result[&(Kind::Folder, "untouched".to_string())].classification,
            Classification::Foreign
        );
        assert_eq!(
            result[&(Kind::Identity, "org:acme:user:paul".to_string())].classification,
            Classification::Foreign
        );
    }

    fn marker_to_tags_for_test(marker: &ResourceMarker) -> Vec<String> {
        reconciler_core::marker_to_tags(marker)
    }
}
