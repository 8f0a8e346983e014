//! Credential and endpoint resolution (spec.md §6).
//!
//! `LETTA_BASE_URL`/`LETTA_API_URL` select the control-plane endpoint
//! (default: cloud). `LETTA_SERVER_PASSWORD` authenticates against
//! self-hosted endpoints and is ignored against cloud. `LETTA_API_KEY` is
//! the fallback and the cloud default. An external-helper command may
//! supersede `LETTA_API_KEY`. A local settings file is the final fallback.

use std::path::PathBuf;
use std::process::Command;

const DEFAULT_CLOUD_URL: &str = "https://api.letta.com";

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// Bearer token, talking to the hosted cloud control plane.
    ApiKey(String),
    /// Basic-auth-style server password, talking to a self-hosted endpoint.
    ServerPassword(String),
    /// No credential could be resolved from any source.
    None,
}

#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub auth: AuthMode,
    pub is_self_hosted: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn local_settings_path() -> PathBuf {
    std::env::var("LETTA_SETTINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| expand_tilde("~/.letta/settings.json"))
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct LocalSettings {
    api_key: Option<String>,
    server_password: Option<String>,
    base_url: Option<String>,
}

fn load_local_settings() -> LocalSettings {
    std::fs::read_to_string(local_settings_path())
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

/// Run an external credential helper: a command plus either JSON-encoded
/// args or whitespace-split args. The helper's stdout is trimmed and used
/// verbatim as the credential value.
fn run_credential_helper(spec: &str) -> Option<String> {
    let mut parts: Vec<String> = match serde_json::from_str::<Vec<String>>(spec) {
        Ok(args) => args,
        Err(_) => spec.split_whitespace().map(str::to_string).collect(),
    };
    if parts.is_empty() {
        return None;
    }
    let program = parts.remove(0);
    let output = Command::new(program).args(parts).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Resolve the endpoint and credential to use, following the precedence
/// order laid out in spec.md §6.
pub fn resolve_endpoint() -> ResolvedEndpoint {
    let base_url = std::env::var("LETTA_BASE_URL")
        .or_else(|_| std::env::var("LETTA_API_URL"))
        .ok()
        .or_else(|| load_local_settings().base_url)
        .unwrap_or_else(|| DEFAULT_CLOUD_URL.to_string());
    let is_self_hosted = base_url != DEFAULT_CLOUD_URL;

    if is_self_hosted {
        if let Ok(password) = std::env::var("LETTA_SERVER_PASSWORD") {
            return ResolvedEndpoint { base_url, auth: AuthMode::ServerPassword(password), is_self_hosted };
        }
    }

    if let Ok(helper_spec) = std::env::var("LETTA_CREDENTIAL_HELPER") {
        if let Some(token) = run_credential_helper(&helper_spec) {
            return ResolvedEndpoint { base_url, auth: AuthMode::ApiKey(token), is_self_hosted };
        }
        tracing::warn!(helper = %helper_spec, "credential helper produced no usable output");
    }

    if let Ok(api_key) = std::env::var("LETTA_API_KEY") {
        return ResolvedEndpoint { base_url, auth: AuthMode::ApiKey(api_key), is_self_hosted };
    }

    let settings = load_local_settings();
    if is_self_hosted {
        if let Some(password) = settings.server_password {
            return ResolvedEndpoint { base_url, auth: AuthMode::ServerPassword(password), is_self_hosted };
        }
    }
    if let Some(api_key) = settings.api_key {
        return ResolvedEndpoint { base_url, auth: AuthMode::ApiKey(api_key), is_self_hosted };
    }

    ResolvedEndpoint { base_url, auth: AuthMode::None, is_self_hosted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in ["LETTA_BASE_URL", "LETTA_API_URL", "LETTA_SERVER_PASSWORD", "LETTA_API_KEY", "LETTA_CREDENTIAL_HELPER", "LETTA_SETTINGS_PATH"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_to_cloud_with_no_credential() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LETTA_SETTINGS_PATH", "/nonexistent/settings.json");
        let resolved = resolve_endpoint();
        assert_eq!(resolved.base_url, DEFAULT_CLOUD_URL);
        assert!(!resolved.is_self_hosted);
        assert_eq!(resolved.auth, AuthMode::None);
        clear_env();
    }

    #[test]
    fn api_key_wins_on_cloud() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LETTA_SETTINGS_PATH", "/nonexistent/settings.json");
        std::env::set_var("LETTA_API_KEY", "sk-test");
        let resolved = resolve_endpoint();
        assert_eq!(resolved.auth, AuthMode::ApiKey("sk-test".to_string()));
        clear_env();
    }

    #[test]
    fn server_password_used_for_self_hosted_endpoint() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LETTA_SETTINGS_PATH", "/nonexistent/settings.json");
        std::env::set_var("LETTA_BASE_URL", "http://localhost:8283");
        std::env::set_var("LETTA_SERVER_PASSWORD", "hunter2");
        std::env::set_var("LETTA_API_KEY", "sk-ignored");
        let resolved = resolve_endpoint();
        assert!(resolved.is_self_hosted);
        assert_eq!(resolved.auth, AuthMode::ServerPassword("hunter2".to_string()));
        clear_env();
    }

    #[test]
    fn server_password_ignored_against_cloud() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LETTA_SETTINGS_PATH", "/nonexistent/settings.json");
        std::env::set_var("LETTA_SERVER_PASSWORD", "hunter2");
        std::env::set_var("LETTA_API_KEY", "sk-cloud");
        let resolved = resolve_endpoint();
        assert!(!resolved.is_self_hosted);
        assert_eq!(resolved.auth, AuthMode::ApiKey("sk-cloud".to_string()));
        clear_env();
    }

    #[test]
    fn credential_helper_supersedes_api_key() {
        let _g = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LETTA_SETTINGS_PATH", "/nonexistent/settings.json");
        std::env::set_var("LETTA_API_KEY", "sk-static");
        std::env::set_var("LETTA_CREDENTIAL_HELPER", "echo sk-from-helper");
        let resolved = resolve_endpoint();
        assert_eq!(resolved.auth, AuthMode::ApiKey("sk-from-helper".to_string()));
        clear_env();
    }
}
