// ⚙️ Configuration - Pin environments loaded from YAML
//
// Example:
//
//   default_environment: test
//   environments:
//     test:
//       host: test-api.pinpayments.com
//       secret_env: PIN_TEST_SECRET
//     live:
//       host: api.pinpayments.com
//       secret_env: PIN_LIVE_SECRET
//
// `secret_env` holds the NAME of an environment variable, read each time the
// environment is resolved. A literal `secret` is accepted too and wins when
// both are present.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_ENVIRONMENT: &str = "test";

fn default_environment_name() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

// ============================================================================
// ENVIRONMENT ENTRY
// ============================================================================

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,

    /// Name of the process environment variable holding the secret
    #[serde(default)]
    pub secret_env: Option<String>,
}

impl EnvironmentConfig {
    pub fn new(host: &str, secret: &str) -> Self {
        EnvironmentConfig {
            host: Some(host.to_string()),
            secret: Some(secret.to_string()),
            secret_env: None,
        }
    }

    /// Secret value, looked up now. Empty strings count as missing.
    pub fn secret_value(&self) -> Option<String> {
        if let Some(secret) = self.secret.as_ref().filter(|s| !s.is_empty()) {
            return Some(secret.clone());
        }

        self.secret_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|s| !s.is_empty())
    }

    pub fn host_value(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }
}

impl std::fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("host", &self.host)
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .field("secret_env", &self.secret_env)
            .finish()
    }
}

// ============================================================================
// PIN CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinConfig {
    #[serde(default = "default_environment_name")]
    pub default_environment: String,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            default_environment: default_environment_name(),
            environments: BTreeMap::new(),
        }
    }
}

impl PinConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Builder-style helper, mostly for tests and embedding
    pub fn with_environment(mut self, name: &str, entry: EnvironmentConfig) -> Self {
        self.environments.insert(name.to_string(), entry);
        self
    }

    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.keys().map(|k| k.as_str()).collect()
    }
}
