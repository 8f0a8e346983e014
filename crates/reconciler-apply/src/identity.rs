//! Identity Sub-reconciler (spec.md §4.6): resolving arbitrary input strings
//! to `IdentifierKey`s, ensuring they exist on the control plane, and
//! attaching/detaching them from agents.

use chrono::{DateTime, Utc};
use reconciler_core::entity::EntitySpec;
use reconciler_core::{
    ControlPlane, DesiredState, Error, IdentifierKey, IdentityType, Kind, ListFilter, RemoteAgent, RemoteIdentity, Result,
    SYSTEM_NAME,
};
use std::collections::HashMap;
use std::str::FromStr;

/// Which identity types may be auto-created without an explicit override.
/// `user` is on by default; `service` and `team` require the caller to opt
/// in, since an unexpected service/team identity is much more likely to be
/// a misconfiguration than a legitimate first sighting.
#[derive(Clone, Copy, Debug)]
pub struct AutoCreatePolicy {
    pub allow_user: bool,
    pub allow_service: bool,
    pub allow_team: bool,
}

impl Default for AutoCreatePolicy {
    fn default() -> Self {
        Self {
            allow_user: true,
            allow_service: false,
            allow_team: false,
        }
    }
}

impl AutoCreatePolicy {
    fn allows(&self, identity_type: IdentityType) -> bool {
        match identity_type {
            IdentityType::User => self.allow_user,
            IdentityType::Service => self.allow_service,
            IdentityType::Team => self.allow_team,
        }
    }
}

/// Lowercase, strip an email domain / provider prefix, collapse separators,
/// drop anything outside `[a-z0-9_-]`, then pad until the result is a legal
/// `IdentifierKey` handle. Applied only when `raw` doesn't already parse as
/// a full `org:<slug>:<type>:<handle>` key.
fn normalize_handle(raw: &str) -> String {
    let mut s = raw.to_lowercase();
    if let Some(at) = s.find('@') {
        s.truncate(at);
    }
    if let Some(colon) = s.rfind(':') {
        s = s[colon + 1..].to_string();
    }

    let mut out = String::new();
    for ch in s.chars() {
        if ch == '.' || ch.is_whitespace() {
            out.push('_');
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        }
    }

    if !out.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        out = format!("u_{out}");
    }
    if out.chars().count() < 2 {
        out = format!("user_{out}");
    }
    out.chars().take(64).collect()
}

/// Resolve any of a full identifier key, an email, a provider-prefixed value,
/// or a raw handle into a validated `IdentifierKey`.
pub fn resolve_identifier(raw: &str, default_org: &str, default_type: IdentityType) -> Result<IdentifierKey> {
    if let Ok(key) = raw.parse::<IdentifierKey>() {
        return Ok(key);
    }
    let handle = normalize_handle(raw);
    IdentifierKey::new(default_org, default_type, handle)
}

/// The `identity_type` an `Identity` manifest entity declares, parsed.
pub fn entity_identity_type(desired: &DesiredState, name: &str) -> Result<IdentityType> {
    let entity = desired.get(Kind::Identity, name).ok_or_else(|| Error::not_found("identity entity", name))?;
    match &entity.spec {
        EntitySpec::Identity(spec) => IdentityType::from_str(&spec.identity_type),
        _ => Err(Error::Internal(format!("entity '{name}' is not an identity"))),
    }
}

pub struct EnsureResult {
    pub identity: RemoteIdentity,
    pub created: bool,
}

fn derive_display_name(key: &IdentifierKey) -> String {
    match key.identity_type() {
        IdentityType::Service => key
            .handle()
            .split(|c| c == '_' || c == '-')
            .filter(|word| !word.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" "),
        IdentityType::User | IdentityType::Team => key.handle().to_string(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Look up an identity by its exact key; if absent, create it subject to
/// `policy`, stamping audit metadata onto the new record.
pub async fn ensure_identity(
    control_plane: &dyn ControlPlane,
    key: &IdentifierKey,
    policy: &AutoCreatePolicy,
    now: DateTime<Utc>,
    created_by: &str,
) -> Result<EnsureResult> {
    let key_string = key.to_string();
    let existing = control_plane
        .list_identities(ListFilter { name: Some(key_string.clone()) })
        .await?;
    if let Some(identity) = existing.into_iter().find(|i| i.identifier_key == key_string) {
        return Ok(EnsureResult { identity, created: false });
    }

    if !policy.allows(key.identity_type()) {
        return Err(Error::policy(
            format!("identity '{key_string}' does not exist and auto-create is not allowed for type '{}'", key.identity_type()),
            "allow_auto_create",
        ));
    }

    let mut metadata = HashMap::new();
    metadata.insert("managed_by".to_string(), SYSTEM_NAME.to_string());
    metadata.insert("auto_created".to_string(), "true".to_string());
    metadata.insert("created_at".to_string(), now.to_rfc3339());
    metadata.insert("created_by".to_string(), created_by.to_string());

    let display_name = derive_display_name(key);
    let identity = control_plane.upsert_identity(&key_string, &display_name, metadata).await?;
    Ok(EnsureResult { identity, created: true })
}

/// Resolve + ensure one identity, then add it to `agent`'s identity set if
/// it isn't already there. A no-op if the identity is already attached.
pub async fn attach_one(
    control_plane: &dyn ControlPlane,
    agent_id: &str,
    raw: &str,
    default_org: &str,
    default_type: IdentityType,
    policy: &AutoCreatePolicy,
    now: DateTime<Utc>,
) -> Result<()> {
    let key = resolve_identifier(raw, default_org, default_type)?;
    let ensured = ensure_identity(control_plane, &key, policy, now, SYSTEM_NAME).await?;

    let agent = control_plane.retrieve_agent(agent_id).await?;
    if agent.identity_ids.contains(&ensured.identity.id) {
        return Ok(());
    }
    let mut identity_ids = agent.identity_ids;
    identity_ids.push(ensured.identity.id);
    update_identity_ids(control_plane, agent_id, identity_ids).await
}

/// Resolve + ensure every input, union them onto the agent's current
/// identity set in one update. Individual resolve/ensure failures are
/// reported per-identity; the agent update only runs if at least one
/// resolved, and a failed agent update fails the whole call.
pub async fn attach_many(
    control_plane: &dyn ControlPlane,
    agent_id: &str,
    raw_inputs: &[String],
    default_org: &str,
    default_type: IdentityType,
    policy: &AutoCreatePolicy,
    now: DateTime<Utc>,
) -> (Vec<String>, Vec<(String, Error)>) {
    let mut resolved_ids = Vec::new();
    let mut failures = Vec::new();
    for raw in raw_inputs {
        match resolve_identifier(raw, default_org, default_type) {
            Ok(key) => match ensure_identity(control_plane, &key, policy, now, SYSTEM_NAME).await {
                Ok(ensured) => resolved_ids.push(ensured.identity.id),
                Err(e) => failures.push((raw.clone(), e)),
            },
            Err(e) => failures.push((raw.clone(), e)),
        }
    }

    if resolved_ids.is_empty() {
        return (resolved_ids, failures);
    }

    match control_plane.retrieve_agent(agent_id).await {
        Ok(agent) => {
            let mut identity_ids = agent.identity_ids;
            for id in &resolved_ids {
                if !identity_ids.contains(id) {
                    identity_ids.push(id.clone());
                }
            }
            if let Err(e) = update_identity_ids(control_plane, agent_id, identity_ids).await {
                failures.push((agent_id.to_string(), e));
                return (Vec::new(), failures);
            }
        }
        Err(e) => {
            failures.push((agent_id.to_string(), e));
            return (Vec::new(), failures);
        }
    }

    (resolved_ids, failures)
}

/// Remove `identifier_ids` from the agent's identity set (set difference).
pub async fn detach_many(control_plane: &dyn ControlPlane, agent_id: &str, identifier_ids: &[String]) -> Result<()> {
    let agent = control_plane.retrieve_agent(agent_id).await?;
    let identity_ids: Vec<String> = agent.identity_ids.into_iter().filter(|id| !identifier_ids.contains(id)).collect();
    update_identity_ids(control_plane, agent_id, identity_ids).await
}

async fn update_identity_ids(control_plane: &dyn ControlPlane, agent_id: &str, identity_ids: Vec<String>) -> Result<()> {
    control_plane
        .update_agent(
            agent_id,
            &reconciler_core::AgentPatch { identity_ids: Some(identity_ids), ..Default::default() },
        )
        .await?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub enum IdentityFinding {
    MissingUserIdentity,
    OrphanedIdentityId(String),
    InvalidIdentifierKey { raw: String, message: String },
}

/// spec.md §4.6's `validateAgentIdentities`: a missing user identity or an
/// orphaned identity id is a warning (the agent still functions); a
/// malformed identifier key among the desired inputs is an error (the
/// manifest itself is broken).
pub fn validate_agent_identities(
    agent: &RemoteAgent,
    known_identities: &[RemoteIdentity],
    desired_raw_inputs: &[String],
) -> Vec<IdentityFinding> {
    let mut findings = Vec::new();

    let attached: Vec<&RemoteIdentity> = known_identities.iter().filter(|i| agent.identity_ids.contains(&i.id)).collect();
    let has_user = attached
        .iter()
        .any(|i| i.identifier_key.parse::<IdentifierKey>().map(|k| k.identity_type() == IdentityType::User).unwrap_or(false));
    if !has_user {
        findings.push(IdentityFinding::MissingUserIdentity);
    }

    let known_ids: std::collections::HashSet<&str> = known_identities.iter().map(|i| i.id.as_str()).collect();
    for id in &agent.identity_ids {
        if !known_ids.contains(id.as_str()) {
            findings.push(IdentityFinding::OrphanedIdentityId(id.clone()));
        }
    }

    for raw in desired_raw_inputs {
        if raw.starts_with("org:") {
            if let Err(e) = raw.parse::<IdentifierKey>() {
                findings.push(IdentityFinding::InvalidIdentifierKey { raw: raw.clone(), message: e.to_string() });
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized_to_local_part() {
        assert_eq!(normalize_handle("Paul.Bettner@Acme.com"), "paul_bettner");
    }

    #[test]
    fn provider_prefix_is_stripped() {
        assert_eq!(normalize_handle("github:paul-bettner"), "paul-bettner");
    }

    #[test]
    fn punctuation_outside_allowed_set_is_dropped() {
        assert_eq!(normalize_handle("paul!! bettner??"), "paul_bettner");
    }

    #[test]
    fn non_alnum_first_character_gets_prefixed() {
        assert_eq!(normalize_handle("_private"), "u__private");
    }

    #[test]
    fn short_result_gets_alnum_prefix_only_if_still_short() {
        // Stripped to empty, then the alnum-first fix alone brings it to
        // length 2, so the separate length-floor fix never triggers.
        assert_eq!(normalize_handle("@"), "u_");
    }

    #[test]
    fn single_char_handle_gets_user_prefix() {
        // "9" is alnum-first already, so only the length floor applies.
        assert_eq!(normalize_handle("9"), "user_9");
    }

    #[test]
    fn overlong_handle_is_truncated_to_64() {
        let raw = "a".repeat(100);
        assert_eq!(normalize_handle(&raw).chars().count(), 64);
    }

    #[test]
    fn full_identifier_key_bypasses_normalization() {
        let key = resolve_identifier("org:acme:service:ci-bot", "default", IdentityType::User).unwrap();
        assert_eq!(key.org_slug(), "acme");
        assert_eq!(key.identity_type(), IdentityType::Service);
        assert_eq!(key.handle(), "ci-bot");
    }

    #[test]
    fn raw_handle_is_composed_with_default_org_and_type() {
        let key = resolve_identifier("paul@acme.com", "acme", IdentityType::User).unwrap();
        assert_eq!(key.to_string(), "org:acme:user:paul");
    }

    #[test]
    fn service_display_name_is_title_cased() {
        let key = IdentifierKey::new("acme", IdentityType::Service, "billing-worker").unwrap();
        assert_eq!(derive_display_name(&key), "Billing Worker");
    }

    #[test]
    fn user_display_name_is_verbatim_handle() {
        let key = IdentifierKey::new("acme", IdentityType::User, "paul_bettner").unwrap();
        assert_eq!(derive_display_name(&key), "paul_bettner");
    }

    #[test]
    fn validate_flags_missing_user_and_orphaned_ids() {
        let agent = RemoteAgent {
            id: "agent-1".to_string(),
            tags: Vec::new(),
            identity_ids: vec!["missing-id".to_string()],
            system: None,
        };
        let findings = validate_agent_identities(&agent, &[], &[]);
        assert!(findings.contains(&IdentityFinding::MissingUserIdentity));
        assert!(findings.contains(&IdentityFinding::OrphanedIdentityId("missing-id".to_string())));
    }

    #[test]
    fn validate_passes_with_attached_user_identity() {
        let identity = RemoteIdentity {
            id: "id-1".to_string(),
            identifier_key: "org:acme:user:paul".to_string(),
            display_name: "paul".to_string(),
            metadata: HashMap::new(),
        };
        let agent = RemoteAgent { id: "agent-1".to_string(), tags: Vec::new(), identity_ids: vec!["id-1".to_string()], system: None };
        let findings = validate_agent_identities(&agent, &[identity], &[]);
        assert!(!findings.contains(&IdentityFinding::MissingUserIdentity));
        assert!(findings.is_empty());
    }

    #[test]
    fn validate_flags_malformed_full_key_input() {
        let agent = RemoteAgent { id: "agent-1".to_string(), tags: Vec::new(), identity_ids: Vec::new(), system: None };
        let findings = validate_agent_identities(&agent, &[], &["org:Bad-Slug:user:paul".to_string()]);
        assert!(findings.iter().any(|f| matches!(f, IdentityFinding::InvalidIdentifierKey { .. })));
    }
}
