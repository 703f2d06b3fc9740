use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub registry_url: String,
    pub auth_url: String,
    pub auth_service: String,
    pub timeout_secs: u64,
    pub default_tag: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_owned(),
            auth_url: DEFAULT_AUTH_URL.to_owned(),
            auth_service: DEFAULT_AUTH_SERVICE.to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_tag: DEFAULT_TAG.to_owned(),
        }
    }
}

impl RegistryConfig {
    pub fn new(registry_url: &str, auth_url: &str) -> Self {
        Self {
            registry_url: registry_url.trim_end_matches('/').to_owned(),
            auth_url: auth_url.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build an HTTP agent whose every request is bounded by the configured timeout.
    pub fn agent(&self) -> ureq::Agent {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout()))
            .build();
        ureq::Agent::new_with_config(config)
    }

    /// Load `~/.config/skiff/config.toml` (or `$XDG_CONFIG_HOME/skiff/config.toml`).
    /// A missing file yields the defaults.
    pub fn load_default() -> Result<Self, RegistryError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RegistryError::Config(format!("invalid config {}: {e}", path.display())))?;
        Ok(config.normalized())
    }

    /// Apply `SKIFF_REGISTRY`, `SKIFF_AUTH_URL`, `SKIFF_AUTH_SERVICE` and `SKIFF_TIMEOUT`.
    pub fn apply_env(self) -> Result<Self, RegistryError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RegistryError> {
        if let Some(url) = lookup("SKIFF_REGISTRY") {
            self.registry_url = url;
        }
        if let Some(url) = lookup("SKIFF_AUTH_URL") {
            self.auth_url = url;
        }
        if let Some(service) = lookup("SKIFF_AUTH_SERVICE") {
            self.auth_service = service;
        }
        if let Some(raw) = lookup("SKIFF_TIMEOUT") {
            self.timeout_secs = raw
                .trim()
                .parse()
                .map_err(|_| RegistryError::Config(format!("SKIFF_TIMEOUT is not a number: {raw}")))?;
        }
        Ok(self.normalized())
    }

    fn normalized(mut self) -> Self {
        self.registry_url = self.registry_url.trim_end_matches('/').to_owned();
        self.timeout_secs = self.timeout_secs.max(1);
        self
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("skiff/config.toml"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config/skiff/config.toml"))
}
