//! Configuration file loading.
//!
//! ```toml
//! data_dir = "./storage"
//! listen = "127.0.0.1:8080"
//! delete_after_days = 30
//!
//! [[profiles]]
//! name = "default"
//! store_headers = "*"
//! ```

use crate::error::ConfigError;
use crate::headers::HeaderPolicy;
use crate::prune::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A named webhook profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    #[serde(default)]
    pub store_headers: HeaderPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Kept raw so `retention()` can reject values of the wrong type
    /// instead of failing the whole file.
    #[serde(default)]
    pub delete_after_days: Option<toml::Value>,
    #[serde(default)]
    pub profiles: Vec<WebhookConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::DuplicateProfile(profile.name.clone()));
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&WebhookConfig, ConfigError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    pub fn retention(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::from_setting(self.delete_after_days.as_ref())
    }

    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}
