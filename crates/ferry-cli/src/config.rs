//! Configuration system for the ferry CLI.

use ferry_core::RelayConfig;
use ferry_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for `ferry serve`
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Relay URL used by `ferry send`
    #[serde(default = "default_connect_url")]
    pub connect_url: String,
    /// Maximum concurrently open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upload storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory completed uploads are written to
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Public path prefix of download links
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Seconds without chunks before a session expires (0 disables expiry)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Chunk size in bytes for `ferry send`
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seconds `ferry send` waits for each relay reply
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_connect_url() -> String {
    "ws://127.0.0.1:5000".to_string()
}

fn default_max_connections() -> usize {
    GatewayConfig::default().max_connections
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from(ferry_files::DEFAULT_UPLOAD_DIR)
}

fn default_public_prefix() -> String {
    ferry_files::DEFAULT_PUBLIC_PREFIX.to_string()
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    ferry_core::DEFAULT_CHUNK_SIZE
}

fn default_reply_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_url: default_connect_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            public_prefix: default_public_prefix(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            chunk_size: default_chunk_size(),
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ferry/config.toml")
    }

    /// Load config from default path, or fall back to defaults if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config cannot be read.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Engine settings derived from the `[transfer]` section
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            idle_timeout: match self.transfer.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sweep_interval: Duration::from_secs(self.transfer.sweep_interval_secs),
        }
    }

    /// Gateway settings derived from the `[server]` section
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_connections: self.server.max_connections,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        if !self.server.connect_url.starts_with("ws://")
            && !self.server.connect_url.starts_with("wss://")
        {
            anyhow::bail!(
                "Invalid connect URL: {} (expected ws:// or wss://)",
                self.server.connect_url
            );
        }

        if self.server.max_connections == 0 {
            anyhow::bail!("Max connections must be at least 1");
        }

        if !self.storage.public_prefix.starts_with('/') {
            anyhow::bail!(
                "Public prefix must start with '/': {}",
                self.storage.public_prefix
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        if self.transfer.reply_timeout_secs == 0 {
            anyhow::bail!("Reply timeout must be at least 1 second");
        }

        if self.transfer.idle_timeout_secs > 0 && self.transfer.sweep_interval_secs == 0 {
            anyhow::bail!("Sweep interval must be at least 1 second when idle expiry is enabled");
        }

        Ok(())
    }
}
