//! Manifest directory location: preferred vs legacy layout.

use reconciler_core::{Error, Result};
use std::path::{Path, PathBuf};

pub const PREFERRED_SUBPATH: &str = ".letta/manifests";
pub const LEGACY_SUBPATH: &str = "packages/examples";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestLocation {
    pub root: PathBuf,
    pub legacy: bool,
}

/// From the repo root, prefer `<root>/.letta/manifests`; fall back to
/// `<root>/packages/examples` with a deprecation warning. Fails if neither
/// exists, naming both candidates.
pub fn locate_manifest_root(repo_root: &Path) -> Result<(ManifestLocation, Option<String>)> {
    let preferred = repo_root.join(PREFERRED_SUBPATH);
    if preferred.is_dir() {
        return Ok((
            ManifestLocation {
                root: preferred,
                legacy: false,
            },
            None,
        ));
    }

    let legacy = repo_root.join(LEGACY_SUBPATH);
    if legacy.is_dir() {
        let warning = format!(
            "using deprecated manifest location {} — migrate to {}",
            legacy.display(),
            preferred.display()
        );
        return Ok((
            ManifestLocation {
                root: legacy,
                legacy: true,
            },
            Some(warning),
        ));
    }

    Err(Error::not_found(
        "manifest_root",
        format!(
            "neither {} nor {} exists",
            preferred.display(),
            legacy.display()
        ),
    ))
}

/// Layer directory names for a given location style.
pub fn layer_dir_name(location: &ManifestLocation, layer: reconciler_core::PackageLayer) -> String {
    use reconciler_core::PackageLayer::*;
    if location.legacy {
        match layer {
            Base => "base".to_string(),
            Org => "org-*".to_string(),
            Project => "project-*".to_string(),
        }
    } else {
        match layer {
            Base => "base".to_string(),
            Org => "org".to_string(),
            Project => "project".to_string(),
        }
    }
}
