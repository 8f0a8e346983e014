//! The `managed_state` record: ground truth for "what was applied last",
//! persisted as a single text block attached to each reconciled agent.

use crate::error::{Error, Result};
use crate::layer::{PackageLayer, ReleaseChannel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeType {
    Initial,
    SafeAuto,
    BreakingManual,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppliedPackage {
    pub version: String,
    pub applied_at: DateTime<Utc>,
    pub package_path: String,
    pub manifest_sha: String,
}

impl AppliedPackage {
    /// `manifestSha` is always the first seven hex characters of `version`.
    pub fn new(version: impl Into<String>, package_path: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        let version = version.into();
        let manifest_sha = version.chars().take(7).collect();
        Self {
            version,
            applied_at,
            package_path: package_path.into(),
            manifest_sha,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManagedState {
    pub applied_packages: BTreeMap<PackageLayer, AppliedPackage>,
    pub reconciler_version: String,
    pub last_upgrade_type: UpgradeType,
    pub upgrade_channel: ReleaseChannel,
    pub last_upgrade_at: DateTime<Utc>,
}

impl ManagedState {
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::from)
    }

    /// Update this record in place with a fresh application, never duplicating it.
    pub fn record_application(
        &mut self,
        layer: PackageLayer,
        version: impl Into<String>,
        package_path: impl Into<String>,
        now: DateTime<Utc>,
        upgrade_type: UpgradeType,
        channel: ReleaseChannel,
    ) {
        self.applied_packages
            .insert(layer, AppliedPackage::new(version, package_path, now));
        self.last_upgrade_type = upgrade_type;
        self.upgrade_channel = channel;
        self.last_upgrade_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    fn sample() -> ManagedState {
        let now = DateTime::<Utc>::from_str("2026-01-01T00:00:00Z").unwrap();
        let mut applied_packages = BTreeMap::new();
        applied_packages.insert(
            PackageLayer::Base,
            AppliedPackage::new("abc1234def", "packages/base", now),
        );
        ManagedState {
            applied_packages,
            reconciler_version: "0.1.0".to_string(),
            last_upgrade_type: UpgradeType::Initial,
            upgrade_channel: ReleaseChannel::Stable,
            last_upgrade_at: now,
        }
    }

    #[test]
    fn round_trips_field_for_field() {
        let record = sample();
        let text = record.serialize().unwrap();
        let back = ManagedState::parse(&text).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn manifest_sha_is_first_seven_chars_of_version() {
        let record = sample();
        let base = &record.applied_packages[&PackageLayer::Base];
        assert_eq!(base.manifest_sha, "abc1234");
        assert_eq!(&base.version[..7], base.manifest_sha);
    }

    #[test]
    fn record_application_updates_in_place() {
        let mut record = sample();
        assert_eq!(record.applied_packages.len(), 1);
        let now = Utc::now();
        record.record_application(
            PackageLayer::Base,
            "fff0000111",
            "packages/base",
            now,
            UpgradeType::SafeAuto,
            ReleaseChannel::Stable,
        );
        assert_eq!(record.applied_packages.len(), 1, "update, not duplicate");
        assert_eq!(record.applied_packages[&PackageLayer::Base].manifest_sha, "fff0000");
        assert_eq!(record.last_upgrade_type, UpgradeType::SafeAuto);
    }
}
