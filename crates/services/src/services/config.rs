//! Storefront client configuration: defaults, optional TOML file, then environment.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ENV_DATABASE_URL: &str = "STOREFRONT_DATABASE_URL";
pub const ENV_REMOTE_TIMEOUT_MS: &str = "STOREFRONT_REMOTE_TIMEOUT_MS";
pub const ENV_CACHE_DIR: &str = "STOREFRONT_CACHE_DIR";
pub const ENV_CACHE_ENABLED: &str = "STOREFRONT_CACHE_ENABLED";

const APP_DIR: &str = "storefront";
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    /// Upper bound for a single remote store call
    pub remote_timeout_ms: u64,
    pub cache_enabled: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let db_path = dirs::data_local_dir()
            .map(|dir| dir.join(APP_DIR).join("storefront.db"))
            .unwrap_or_else(|| PathBuf::from("storefront.db"));

        Self {
            database_url: format!("sqlite://{}", db_path.display()),
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            cache_enabled: true,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `path` when given, overlaid by `STOREFRONT_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from `lookup`, keyed by the `ENV_*` names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(raw) = lookup(ENV_REMOTE_TIMEOUT_MS) {
            self.remote_timeout_ms = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_REMOTE_TIMEOUT_MS} must be an integer, got '{raw}'"))
            })?;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_CACHE_ENABLED) {
            self.cache_enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{ENV_CACHE_ENABLED} must be a boolean, got '{raw}'"
                    )));
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "remote_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url is empty".to_string()));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Directory for the local wishlist cache, or `None` when caching is off.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        if !self.cache_enabled {
            return None;
        }
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join(APP_DIR)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        assert!(config.database_url.starts_with("sqlite://"));
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            remote_timeout_ms = 2500
            cache_dir = "/tmp/storefront-cache"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote_timeout_ms, 2500);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/storefront-cache")));
        assert_eq!(config.database_url, Config::default().database_url);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DATABASE_URL, "sqlite::memory:"),
            (ENV_REMOTE_TIMEOUT_MS, "750"),
            (ENV_CACHE_ENABLED, "off"),
        ]);
        let mut config = Config::default();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.remote_timeout(), Duration::from_millis(750));
        assert!(config.resolved_cache_dir().is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == ENV_REMOTE_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::from_toml_str("remote_timeout_ms = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            Config::from_toml_str("remote_timeout_ms = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
