//! Registry authentication
//!
//! Credentials for the four images a run may touch (target, run image,
//! cache image, previous image) are collected from the environment and
//! serialized into the single env var the lifecycle binaries read (§6).
//! Every credential value is registered with the global secret redaction
//! registry as soon as it is loaded, so it never reaches a log line.

use crate::redaction::add_global_secret;
use serde::Serialize;
use std::collections::HashMap;
use std::env;

/// Credentials for one registry host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryCredentials {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// The four image roles a run authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    Target,
    RunImage,
    CacheImage,
    PreviousImage,
}

impl ImageRole {
    fn env_prefix(&self) -> &'static str {
        match self {
            ImageRole::Target => "CNB_TARGET",
            ImageRole::RunImage => "CNB_RUN_IMAGE",
            ImageRole::CacheImage => "CNB_CACHE_IMAGE",
            ImageRole::PreviousImage => "CNB_PREVIOUS_IMAGE",
        }
    }
}

/// Load credentials for one role from the environment. Looks for
/// `{PREFIX}_REGISTRY_TOKEN` first (bearer), then
/// `{PREFIX}_REGISTRY_USERNAME`/`{PREFIX}_REGISTRY_PASSWORD` (basic), and
/// falls back to [`RegistryCredentials::None`] if neither is set.
pub fn load_credentials(role: ImageRole) -> RegistryCredentials {
    let prefix = role.env_prefix();

    if let Ok(token) = env::var(format!("{prefix}_REGISTRY_TOKEN")) {
        add_global_secret(&token);
        return RegistryCredentials::Bearer { token };
    }

    let username = env::var(format!("{prefix}_REGISTRY_USERNAME")).ok();
    let password = env::var(format!("{prefix}_REGISTRY_PASSWORD")).ok();
    if let (Some(username), Some(password)) = (username, password) {
        add_global_secret(&password);
        return RegistryCredentials::Basic { username, password };
    }

    RegistryCredentials::None
}

/// Build the full auth map for a run and serialize it to the single JSON
/// string the lifecycle binaries expect on `CNB_REGISTRY_AUTH`.
pub fn build_registry_auth_env(roles: &[(ImageRole, String)]) -> Result<String, serde_json::Error> {
    let mut by_reference: HashMap<String, RegistryCredentials> = HashMap::new();
    for (role, reference) in roles {
        by_reference.entry(reference.clone()).or_insert_with(|| load_credentials(*role));
    }
    serde_json::to_string(&by_reference)
}

/// `(name, value)` for the `CNB_REGISTRY_AUTH` env var a publishing phase
/// needs, covering every image role in play for that phase. A serialization
/// failure (should not happen; the value is a plain string map) degrades to
/// an empty auth map rather than failing the run.
pub fn registry_auth_env(roles: &[(ImageRole, String)]) -> (String, String) {
    let value = build_registry_auth_env(roles).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to serialize registry auth env, publishing without credentials");
        "{}".to_string()
    });
    ("CNB_REGISTRY_AUTH".to_string(), value)
}
