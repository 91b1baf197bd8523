//! Configuration file support for treino.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/treino/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub user: UserConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Identity used to key plans and remote commits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

/// Retry and timeout parameters for the sync queue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failures before an entry is parked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Extra random delay, as a fraction of the backoff delay
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    #[serde(default = "default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_retry_delay_secs: default_base_retry_delay_secs(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            jitter_ratio: default_jitter_ratio(),
            commit_timeout_secs: default_commit_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }

    /// Reject settings the backoff math cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("sync.max_attempts must be at least 1".into()));
        }
        if self.max_retry_delay_secs < self.base_retry_delay_secs {
            return Err(Error::Config(
                "sync.max_retry_delay_secs must not be below sync.base_retry_delay_secs".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(Error::Config("sync.jitter_ratio must be within 0.0-1.0".into()));
        }
        if self.commit_timeout_secs == 0 {
            return Err(Error::Config("sync.commit_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Workout session defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rest used for exercises that don't specify one
    #[serde(default = "default_rest_seconds")]
    pub default_rest_seconds: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_rest_seconds: default_rest_seconds(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("treino")
}

fn default_user_id() -> String {
    "local".into()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_retry_delay_secs() -> u64 {
    1
}

fn default_max_retry_delay_secs() -> u64 {
    300
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_commit_timeout_secs() -> u64 {
    15
}

fn default_rest_seconds() -> u32 {
    60
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.sync.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("treino").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.user.user_id, "local");
        assert_eq!(config.sync.max_attempts, 10);
        assert_eq!(config.sync.max_retry_delay_secs, 300);
        assert_eq!(config.session.default_rest_seconds, 60);
        assert!(config.sync.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[sync]
base_retry_delay_secs = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.base_retry_delay_secs, 5);
        assert_eq!(config.sync.commit_timeout_secs, 15); // default
        assert_eq!(config.user.user_id, "local");
    }

    #[test]
    fn test_invalid_sync_settings_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\njitter_ratio = 3.0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.user.user_id = "athlete-7".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.user.user_id, "athlete-7");
        assert_eq!(loaded.data.data_dir, config.data.data_dir);
    }
}
