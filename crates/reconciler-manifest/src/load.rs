//! Per-layer manifest file discovery and parsing.

use reconciler_core::entity::EntitySpec;
use reconciler_core::{ManifestEntity, PackageLayer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ManifestWarning {
    pub layer: PackageLayer,
    pub file: PathBuf,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    description: String,
    #[serde(flatten)]
    spec: EntitySpec,
}

#[derive(Debug, Deserialize)]
struct RawManifestFile {
    #[serde(default)]
    entity: Vec<RawEntity>,
}

/// Find manifest files (`*.toml`) under a layer directory, recursively.
fn find_manifest_files(layer_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(layer_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    files
}

/// Load every manifest file under one layer directory.
///
/// Parse failures produce a warning for that *file*; the rest of the layer
/// still loads. This mirrors the spec's "failures in one layer produce a
/// warning and that layer is dropped" at the level the core actually
/// controls — a malformed single file shouldn't silently drop sibling files,
/// so failures are attributed per-file and the caller (merge) decides
/// whether an empty/partial layer is acceptable.
pub fn load_layer(layer_dir: &Path, layer: PackageLayer) -> (Vec<ManifestEntity>, Vec<ManifestWarning>) {
    let mut entities = Vec::new();
    let mut warnings = Vec::new();

    if !layer_dir.is_dir() {
        return (entities, warnings);
    }

    for file in find_manifest_files(layer_dir) {
        let content = match std::fs::read_to_string(&file) {
            Ok(c) => c,
            Err(e) => {
                warnings.push(ManifestWarning {
                    layer,
                    file: file.clone(),
                    message: format!("read error: {e}"),
                });
                continue;
            }
        };

        match toml::from_str::<RawManifestFile>(&content) {
            Ok(parsed) => {
                for raw in parsed.entity {
                    entities.push(
                        ManifestEntity {
                            name: raw.name,
                            description: raw.description,
                            layer: None,
                            spec: raw.spec,
                        }
                        .with_layer(layer),
                    );
                }
            }
            Err(e) => {
                warnings.push(ManifestWarning {
                    layer,
                    file: file.clone(),
                    message: format!("parse error: {e}"),
                });
            }
        }
    }

    (entities, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_core::Kind;
    use tempfile::tempdir;

    #[test]
    fn loads_block_entity_from_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("persona.toml"),
            r#"
[[entity]]
name = "persona"
description = "Core identity block"
kind = "Block"
label = "persona"
value = "You are helpful."
limit = 5000
"#,
        )
        .unwrap();

        let (entities, warnings) = load_layer(dir.path(), PackageLayer::Base);
        assert!(warnings.is_empty());
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "persona");
        assert_eq!(entities[0].kind(), Kind::Block);
        assert_eq!(entities[0].layer, Some(PackageLayer::Base));
    }

    #[test]
    fn malformed_file_produces_warning_others_still_load() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "not valid toml [[[").unwrap();
        std::fs::write(
            dir.path().join("good.toml"),
            r#"
[[entity]]
name = "tools-folder"
description = "Shared tools folder"
kind = "Folder"
"#,
        )
        .unwrap();

        let (entities, warnings) = load_layer(dir.path(), PackageLayer::Base);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("parse error"));
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "tools-folder");
    }

    #[test]
    fn missing_layer_directory_is_not_an_error() {
        let dir = tempdir().unwrap();
        let (entities, warnings) = load_layer(&dir.path().join("does-not-exist"), PackageLayer::Org);
        assert!(entities.is_empty());
        assert!(warnings.is_empty());
    }
}
