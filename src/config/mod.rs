//! Configuration module for the packet bridge
//!
//! This module handles the bridge configuration file:
//! - Loading from TOML (default) or JSON (by `.json` extension)
//! - Saving the effective configuration back to disk
//! - Validating values the pipeline relies on
//!
//! # Config Location
//!
//! Without an explicit `--config` path the bridge looks in the
//! platform-appropriate configuration directory under `packet-bridge`:
//! - **Linux**: `~/.config/packet-bridge/bridge.toml`
//! - **macOS**: `~/Library/Application Support/packet-bridge/bridge.toml`
//! - **Windows**: `%APPDATA%\packet-bridge\bridge.toml`
//!
//! # Example
//!
//! ```ignore
//! use packet_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::load("bridge.toml")?;
//! config.validate()?;
//! println!("publishing to {} on {}", config.sink.topic, config.sink.address());
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "packet-bridge";

/// Default config filename
pub const CONFIG_FILE: &str = "bridge.toml";

/// Get the platform configuration directory for the bridge
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Serialized format of a config file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

// ==================== Bridge Config ====================

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Transport source selection and settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Publish sink (broker) settings
    #[serde(default)]
    pub sink: SinkConfig,

    /// Queue and timing settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl BridgeConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&content, ConfigFormat::for_path(path)).map_err(|e| {
            BridgeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a configuration file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::parse(content, ConfigFormat::Toml)
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| BridgeError::Serialization(e.to_string()))
            }
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| BridgeError::Serialization(e.to_string())),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    /// Save the configuration to disk, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BridgeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match ConfigFormat::for_path(path) {
            ConfigFormat::Toml => self.to_toml_string()?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| BridgeError::Serialization(e.to_string()))?,
        };

        std::fs::write(path, content).map_err(|e| {
            BridgeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check the values the pipeline and sink depend on
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.queue_capacity == 0 {
            return Err(BridgeError::Config(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }
        if pipeline.poll_interval_ms == 0 {
            return Err(BridgeError::Config(
                "pipeline.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let sink = &self.sink;
        if sink.host.trim().is_empty() {
            return Err(BridgeError::Config("sink.host must not be empty".to_string()));
        }
        if sink.port == 0 {
            return Err(BridgeError::Config("sink.port must not be 0".to_string()));
        }
        if sink.topic.is_empty() || sink.topic.contains(['+', '#']) {
            return Err(BridgeError::Config(format!(
                "sink.topic '{}' is not a valid publish topic",
                sink.topic
            )));
        }
        if sink.qos > 1 {
            return Err(BridgeError::Config(format!(
                "sink.qos {} is not supported (use 0 or 1)",
                sink.qos
            )));
        }
        if sink.password.is_some() && sink.username.is_none() {
            return Err(BridgeError::Config(
                "sink.password requires sink.username".to_string(),
            ));
        }

        if self.source.kind == SourceKind::Serial && self.source.serial.max_packet_len == 0 {
            return Err(BridgeError::Config(
                "source.serial.max_packet_len must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [source]
            kind = "mock"

            [sink]
            host = "broker.local"
            port = 1883
            client_id = "bridge-1"
            topic = "field/radio"
            qos = 0
            keep_alive_secs = 30
            clean_session = true

            [sink.tls]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.source.kind, SourceKind::Mock);
        assert_eq!(config.sink.address(), "broker.local:1883");
        assert!(!config.sink.tls.enabled);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.source.radio, RadioConfig::default());
    }

    #[test]
    fn test_tls_options_parse() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [sink]
            host = "192.168.1.99"
            port = 8883
            client_id = "Test"
            topic = "test/topic"
            qos = 1
            keep_alive_secs = 20
            clean_session = true

            [sink.tls]
            tls_version = "tls12"
            ca_file = "/etc/bridge/ca.crt"
            cipher_suite = "ECDHE-ECDSA-AES128-GCM-SHA256"
            key_exchange_group = "X25519"
            "#,
        )
        .unwrap();

        let tls = &config.sink.tls;
        assert!(tls.enabled);
        assert_eq!(tls.tls_version, Some(TlsVersion::Tls12));
        assert_eq!(tls.ca_file.as_deref(), Some(Path::new("/etc/bridge/ca.crt")));
        assert_eq!(tls.key_exchange_group.as_deref(), Some("X25519"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = BridgeConfig::default();
        config.pipeline.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_qos2_and_wildcards() {
        let mut config = BridgeConfig::default();
        config.sink.qos = 2;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.sink.topic = "sensors/#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_password_without_user() {
        let mut config = BridgeConfig::default();
        config.sink.password = Some("secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_format_by_extension() {
        assert_eq!(ConfigFormat::for_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::for_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::for_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::for_path(Path::new("bridge")), ConfigFormat::Toml);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BridgeConfig::default();
        config.sink.tls.cipher_suite = Some("TLS13_AES_128_GCM_SHA256".to_string());
        let text = config.to_toml_string().unwrap();
        let parsed = BridgeConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.sink.tls, config.sink.tls);
        assert_eq!(parsed.pipeline, config.pipeline);
    }
}
