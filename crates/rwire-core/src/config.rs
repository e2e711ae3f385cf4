use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RWIRE_CONFIG";

/// Top-level wire configuration, loaded from rwire.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Capacity of each command buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Fragment size used by the channel transport
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,
    /// Largest command a chunked receiver accepts
    #[serde(default = "default_max_command_size")]
    pub max_command_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Largest range a read map may return in a single reply
    #[serde(default = "default_max_read_map_size")]
    pub max_read_map_size: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            fragment_size: default_fragment_size(),
            max_command_size: default_max_command_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_read_map_size: default_max_read_map_size(),
        }
    }
}

impl WireConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: WireConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring config {}: {}", path, e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        let t = &self.transport;
        if t.buffer_size == 0 || t.fragment_size == 0 {
            return Err(CoreError::ConfigError(
                "buffer_size and fragment_size must be non-zero".to_string(),
            ));
        }
        if t.max_command_size < t.buffer_size {
            return Err(CoreError::ConfigError(format!(
                "max_command_size ({}) is smaller than buffer_size ({})",
                t.max_command_size, t.buffer_size
            )));
        }
        Ok(())
    }
}

/// Returns the config file path: `$RWIRE_CONFIG` if set, else `./rwire.toml`.
pub fn default_config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| "rwire.toml".to_string())
}

fn default_buffer_size() -> usize {
    1_000_000
}

fn default_fragment_size() -> usize {
    4096
}

fn default_max_command_size() -> usize {
    1_000_000
}

fn default_max_read_map_size() -> u64 {
    256 * 1024 * 1024
}
