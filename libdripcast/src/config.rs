//! Configuration management for Dripcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub post_api: Option<PostApiConfig>,
    pub device: Option<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Processor tuning. Every field has a default so a config file can omit
/// the whole `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    100
}

fn default_inter_item_delay_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
        }
    }
}

/// External post API endpoint. The key lives in its own file, not in the
/// config, so the config can be checked into dotfiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostApiConfig {
    pub base_url: String,
    pub api_key_file: String,
}

/// Local device-automation bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_base_url")]
    pub base_url: String,
    #[serde(default = "default_device_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_device_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_device_timeout_secs() -> u64 {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: default_device_base_url(),
            timeout_secs: default_device_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, applying env overrides
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;
        if let Ok(db_path) = std::env::var("DRIPCAST_DB_PATH") {
            config.database.path = db_path;
        }
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration. The database lands under the
    /// platform data directory.
    pub fn default_config() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                path: default_db_path()?,
            },
            queue: QueueConfig::default(),
            post_api: Some(PostApiConfig {
                base_url: "https://api.upload-post.com".to_string(),
                api_key_file: "~/.config/dripcast/api.key".to_string(),
            }),
            device: Some(DeviceConfig::default()),
        })
    }
}

fn default_db_path() -> Result<String> {
    Ok(resolve_data_path()?.join("queue.db").display().to_string())
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Dripcast configuration

[database]
path = "{db_path}"

[queue]
# Seconds between processing passes.
poll_interval = 60
# Items claimed per pass.
batch_size = 100
# Pause between items within a pass, in milliseconds.
inter_item_delay_ms = 1000

# External post API. Remove this section to disable API posting.
[post_api]
base_url = "https://api.upload-post.com"
api_key_file = "~/.config/dripcast/api.key"

# Local device-automation bridge, used by device-paired accounts.
[device]
base_url = "http://127.0.0.1:3000"
timeout_secs = 10
"#;

/// Write a commented starter configuration to `path`, creating parent
/// directories as needed. The database path is resolved for this
/// machine. Overwrites nothing; callers check for an existing file
/// first.
pub fn generate_default_config(path: &PathBuf) -> Result<()> {
    let content = DEFAULT_CONFIG_TEMPLATE.replace("{db_path}", &default_db_path()?);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::WriteError)?;
    }
    std::fs::write(path, content).map_err(ConfigError::WriteError)?;
    Ok(())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("DRIPCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("dripcast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("dripcast"))
}
