// 🌏 Environment Resolver - named environment → (secret, host)

use crate::config::PinConfig;
use crate::error::{PinError, Result};

/// A fully resolved environment, ready for authenticated calls
#[derive(Clone, PartialEq, Eq)]
pub struct PinEnvironment {
    pub name: String,
    pub secret: String,
    pub host: String,
}

impl PinEnvironment {
    /// API root, e.g. `https://test-api.pinpayments.com/1`
    pub fn base_url(&self) -> String {
        format!("https://{}/1", self.host)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl std::fmt::Debug for PinEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinEnvironment")
            .field("name", &self.name)
            .field("secret", &"<REDACTED>")
            .field("host", &self.host)
            .finish()
    }
}

pub struct EnvironmentResolver {
    config: PinConfig,
}

impl EnvironmentResolver {
    pub fn new(config: PinConfig) -> Self {
        EnvironmentResolver { config }
    }

    pub fn config(&self) -> &PinConfig {
        &self.config
    }

    pub fn default_name(&self) -> &str {
        &self.config.default_environment
    }

    /// Environment name to use for `name`, falling back to the default
    pub fn effective_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        match name {
            Some(n) if !n.is_empty() => n,
            _ => self.default_name(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.config.environments.contains_key(name)
    }

    /// Resolve an environment. Reads the configuration on every call, so a
    /// rotated `secret_env` variable is picked up without a restart.
    pub fn resolve(&self, name: Option<&str>) -> Result<PinEnvironment> {
        if self.config.environments.is_empty() {
            return Err(PinError::Config("no Pin environments configured".to_string()));
        }

        let name = self.effective_name(name);
        let entry = self.config.environments.get(name).ok_or_else(|| {
            PinError::Config(format!("Pin environment '{}' does not exist", name))
        })?;

        let secret = entry.secret_value();
        let host = entry.host_value().map(|h| h.to_string());

        match (secret, host) {
            (Some(secret), Some(host)) => Ok(PinEnvironment {
                name: name.to_string(),
                secret,
                host,
            }),
            (None, None) => Err(PinError::Config(format!(
                "Pin environment '{}' has neither a secret nor a host",
                name
            ))),
            (None, Some(_)) => Err(PinError::Config(format!(
                "Pin environment '{}' has no secret",
                name
            ))),
            (Some(_), None) => Err(PinError::Config(format!(
                "Pin environment '{}' has no host",
                name
            ))),
        }
    }
}
