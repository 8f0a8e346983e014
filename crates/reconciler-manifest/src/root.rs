//! Repository root discovery.

use reconciler_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Walk upward from `start` looking for a directory containing `.letta`
/// (preferred) or `.git`. Stops at the filesystem root.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start
        .canonicalize()
        .unwrap_or_else(|_| start.to_path_buf());

    loop {
        if dir.join(".letta").is_dir() || dir.join(".git").is_dir() {
            return Ok(dir);
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => {
                return Err(Error::not_found(
                    "repo_root",
                    format!("no .letta or .git directory found above {}", start.display()),
                ))
            }
        }
    }
}
