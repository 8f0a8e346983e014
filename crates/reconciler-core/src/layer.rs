//! Package layers, release channels, and agent roles.

use serde::{Deserialize, Serialize};

/// Manifest precedence slot. Later layers override earlier ones when merging.
///
/// `Lane` is a fourth, quasi-layer value (see below): it is never a key in
/// `ManagedState::applied_packages` and never appears in manifests, but the
/// type exists so callers recording provenance outside the three real layers
/// (e.g. a lane-scoped working override that never gets committed to a
/// manifest) have a typed value to reach for instead of a bare string.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PackageLayer {
    Base,
    Org,
    Project,
}

impl PackageLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageLayer::Base => "base",
            PackageLayer::Org => "org",
            PackageLayer::Project => "project",
        }
    }

    /// Ordered layers, lowest precedence first.
    pub const ORDER: [PackageLayer; 3] = [
        PackageLayer::Base,
        PackageLayer::Org,
        PackageLayer::Project,
    ];
}

impl std::fmt::Display for PackageLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `lane` quasi-layer, internal to `managed_state` only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Lane,
}

/// Release track controlling auto-apply policy.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Beta,
    /// Disables auto-apply entirely; every change requires explicit override.
    Pinned,
}

impl ReleaseChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseChannel::Stable => "stable",
            ReleaseChannel::Beta => "beta",
            ReleaseChannel::Pinned => "pinned",
        }
    }

    pub fn from_tag(value: &str) -> Self {
        match value {
            "beta" => ReleaseChannel::Beta,
            "pinned" => ReleaseChannel::Pinned,
            _ => ReleaseChannel::Stable,
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self, ReleaseChannel::Pinned)
    }
}

impl std::fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent persona influencing default channel and tool bundle selection.
///
/// Upgrade policy itself depends only on channel and change classification;
/// roles are otherwise advisory metadata carried through to tags.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    LaneDev,
    RepoCurator,
    OrgCurator,
    Supervisor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::LaneDev => "lane-dev",
            AgentRole::RepoCurator => "repo-curator",
            AgentRole::OrgCurator => "org-curator",
            AgentRole::Supervisor => "supervisor",
        }
    }

    /// Historical tag values are tolerated by mapping unknown roles to `lane-dev`.
    pub fn from_tag(value: &str) -> Self {
        match value {
            "repo-curator" => AgentRole::RepoCurator,
            "org-curator" => AgentRole::OrgCurator,
            "supervisor" => AgentRole::Supervisor,
            "lane-dev" => AgentRole::LaneDev,
            _ => AgentRole::LaneDev,
        }
    }
}

impl Default for AgentRole {
    fn default() -> Self {
        AgentRole::LaneDev
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
