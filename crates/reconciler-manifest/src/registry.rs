//! Registry validation: org/project uniqueness and the acyclic include graph.

use reconciler_core::{Error, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct OrgEntry {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub key: String,
    pub package_path: String,
    /// Org key this project includes. The base layer is always implicitly
    /// included beneath it; only org→project and project→project links are
    /// modeled explicitly here.
    pub includes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub org: Vec<OrgEntry>,
    #[serde(default)]
    pub project: Vec<ProjectEntry>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(Error::from)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryValidationOptions {
    pub check_paths_exist: bool,
    pub manifest_root: Option<std::path::PathBuf>,
}

/// Validate: unique org/project keys, every project package path referenced
/// by exactly one project, referenced paths exist (if checking is on), and
/// the implicit include graph is acyclic.
pub fn validate_registry(registry: &Registry, opts: &RegistryValidationOptions) -> Result<()> {
    let mut org_keys = HashSet::new();
    for org in &registry.org {
        if !org_keys.insert(org.key.as_str()) {
            return Err(Error::validation("registry.org.key", format!("duplicate org key '{}'", org.key)));
        }
    }

    let mut project_keys = HashSet::new();
    let mut package_paths: HashMap<&str, &str> = HashMap::new();
    for project in &registry.project {
        if !project_keys.insert(project.key.as_str()) {
            return Err(Error::validation(
                "registry.project.key",
                format!("duplicate project key '{}'", project.key),
            ));
        }
        if let Some(existing) = package_paths.insert(project.package_path.as_str(), project.key.as_str()) {
            return Err(Error::validation(
                "registry.project.package_path",
                format!(
                    "package path '{}' referenced by both '{}' and '{}'",
                    project.package_path, existing, project.key
                ),
            ));
        }
    }

    if opts.check_paths_exist {
        if let Some(root) = &opts.manifest_root {
            for project in &registry.project {
                let full = root.join(&project.package_path);
                if !full.exists() {
                    return Err(Error::validation(
                        "registry.project.package_path",
                        format!("package path '{}' does not exist under {}", project.package_path, root.display()),
                    ));
                }
            }
        }
    }

    detect_include_cycle(registry)?;

    Ok(())
}

fn detect_include_cycle(registry: &Registry) -> Result<()> {
    // Build an edge map: project key -> included key (org or another project).
    let project_keys: HashSet<&str> = registry.project.iter().map(|p| p.key.as_str()).collect();
    let edges: HashMap<&str, &str> = registry
        .project
        .iter()
        .map(|p| (p.key.as_str(), p.includes.as_str()))
        .collect();

    #[derive(PartialEq, Clone, Copy)]
    enum Visit {
        InStack,
        Done,
    }
    let mut state: HashMap<&str, Visit> = HashMap::new();

    for start in registry.project.iter().map(|p| p.key.as_str()) {
        if state.get(start) == Some(&Visit::Done) {
            continue;
        }
        let mut stack = Vec::new();
        let mut node = start;
        loop {
            match state.get(node) {
                Some(Visit::InStack) => {
                    let cycle_start = stack.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<&str> = stack[cycle_start..].to_vec();
                    cycle.push(node);
                    return Err(Error::validation(
                        "registry.project.includes",
                        format!("include cycle detected: {}", cycle.join(" -> ")),
                    ));
                }
                Some(Visit::Done) => break,
                None => {}
            }
            state.insert(node, Visit::InStack);
            stack.push(node);

            match edges.get(node) {
                // Only keep walking if the included key is itself a project
                // (an org key is a terminal, non-cyclic leaf).
                Some(next) if project_keys.contains(next) => {
                    node = next;
                }
                _ => break,
            }
        }
        for n in stack {
            state.insert(n, Visit::Done);
        }
    }

    Ok(())
}
