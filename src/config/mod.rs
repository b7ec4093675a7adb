//! Configuration module
//!
//! Handles loading and saving pipboy configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{DEFAULT_LANG, DEFAULT_VERSION, MAX_FRAME_SIZE, TCP_PORT, UDP_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// What the server announces about itself
    #[serde(default)]
    pub server: ServerConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log filter directive, e.g. "info" or "pipboy=debug"
    pub log_level: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Heartbeat interval in ms
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Largest accepted frame payload
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_port() -> u16 {
    TCP_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    1000
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP discovery port
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Where discovery requests are sent
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// How long to wait for replies, in ms
    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,
    /// Machine type the responder announces
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    /// Whether the responder reports itself busy
    #[serde(default)]
    pub is_busy: bool,
}

fn default_discovery_port() -> u16 {
    UDP_PORT
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_discovery_timeout() -> u64 {
    5000
}

fn default_machine_type() -> String {
    "PC".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            timeout_ms: default_discovery_timeout(),
            machine_type: default_machine_type(),
            is_busy: false,
        }
    }
}

/// Server announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            version: default_version(),
        }
    }
}

impl From<&ServerConfig> for crate::protocol::ServerInfo {
    fn from(config: &ServerConfig) -> Self {
        Self {
            lang: config.lang.clone(),
            version: config.version.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pipboy/config.toml")),
            Some(PathBuf::from("./pipboy.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            log_level: Some("info".to_string()),
        },
        discovery: DiscoveryConfig {
            broadcast_address: "192.168.1.255".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
