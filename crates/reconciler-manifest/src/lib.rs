//! reconciler-manifest — repo-root discovery, manifest location resolution,
//! per-layer loading, canonical-name merge, and registry validation.

pub mod load;
pub mod location;
pub mod merge;
pub mod registry;
pub mod root;

pub use load::{load_layer, ManifestWarning};
pub use location::{locate_manifest_root, ManifestLocation};
pub use merge::{merge_layers, MergeWarning};
pub use registry::{validate_registry, Registry, RegistryValidationOptions};
pub use root::discover_repo_root;

use reconciler_core::{DesiredState, PackageLayer, Result};
use std::path::{Path, PathBuf};

/// A fully loaded desired state plus every non-fatal warning collected
/// along the way.
#[derive(Debug)]
pub struct LoadedManifests {
    pub desired_state: DesiredState,
    pub manifest_root: PathBuf,
    pub warnings: Vec<String>,
}

/// Discover the repo root from `start`, locate the manifest directory,
/// load every layer, merge them, and (if present) validate the registry.
pub fn load_manifests(start: &Path) -> Result<LoadedManifests> {
    let repo_root = discover_repo_root(start)?;
    let (location, location_warning) = locate_manifest_root(&repo_root)?;

    let mut warnings: Vec<String> = location_warning.into_iter().collect();
    let mut layers = Vec::new();

    for layer in PackageLayer::ORDER {
        let dir = layer_directory(&location, layer);
        let (entities, layer_warnings) = load_layer(&dir, layer);
        warnings.extend(layer_warnings.into_iter().map(|w| {
            format!("{}: {}: {}", w.layer, w.file.display(), w.message)
        }));
        layers.push((layer, entities));
    }

    let (desired_state, merge_warnings) = merge_layers(&layers);
    warnings.extend(merge_warnings.into_iter().map(|w| w.message));

    let registry_path = location.root.join("registry.toml");
    if registry_path.is_file() {
        match Registry::load(&registry_path) {
            Ok(registry) => {
                let opts = RegistryValidationOptions {
                    check_paths_exist: true,
                    manifest_root: Some(location.root.clone()),
                };
                validate_registry(&registry, &opts)?;
            }
            Err(e) => {
                warnings.push(format!("registry.toml: {e}"));
            }
        }
    }

    Ok(LoadedManifests {
        desired_state,
        manifest_root: location.root.clone(),
        warnings,
    })
}

/// Resolve one layer's directory under the preferred or legacy layout.
///
/// The legacy layout uses `org-<slug>`/`project-<slug>` wildcards; since the
/// loader has no single slug to substitute without a selection context, the
/// legacy org/project layer directory is resolved by picking the first
/// directory entry matching the prefix (stable, sorted order) — this
/// matches the common case of a single active org/project per repo clone.
fn layer_directory(location: &ManifestLocation, layer: PackageLayer) -> PathBuf {
    if !location.legacy || layer == PackageLayer::Base {
        return location.root.join(location::layer_dir_name(location, layer));
    }

    let prefix = match layer {
        PackageLayer::Org => "org-",
        PackageLayer::Project => "project-",
        PackageLayer::Base => unreachable!(),
    };

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(&location.root)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| location.root.join(format!("{prefix}_missing")))
}
