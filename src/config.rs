//! Bridge configuration
//!
//! Defaults match a typical deployment so the bridge runs without a file;
//! a TOML file can override any section. The configuration is loaded once
//! at startup and stays immutable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_shared::{serial, timing};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::connection::SupervisorConfig;
use crate::session::SessionParams;
use crate::transport::Credentials;

/// Errors that can occur while loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error while reading configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error while reading configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BridgeConfig {
    #[validate(nested)]
    pub device: DeviceConfig,
    #[validate(nested)]
    pub serial: SerialConfig,
    #[validate(nested)]
    pub network: NetworkConfig,
    #[validate(nested)]
    pub mqtt: MqttConfig,
    #[validate(nested)]
    pub logger: LoggerConfig,
}

/// Identity and loop timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name carried in every envelope
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Period of the main loop
    #[validate(range(min = 1, max = 1000))]
    pub tick_interval_ms: u64,
    /// Period of the status report
    #[validate(range(min = 1000))]
    pub status_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "uart-bridge-01".into(),
            tick_interval_ms: 10,
            status_interval_ms: timing::STATUS_INTERVAL_MS,
        }
    }
}

/// Serial line parameters (always 8N1, no flow control)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path (e.g., "/dev/ttyUSB0" or "/dev/serial0")
    #[validate(length(min = 1))]
    pub port: String,
    #[validate(range(min = 300, max = 4_000_000))]
    pub baud_rate: u32,
    /// Byte that completes a frame
    pub terminator: u8,
    /// Frame buffer size including the reserved slot
    #[validate(range(min = 2, max = 65536))]
    pub frame_capacity: usize,
    /// Number of read chunks buffered between ticks
    #[validate(range(min = 1, max = 4096))]
    pub buffer_chunks: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: serial::DEFAULT_BAUD_RATE,
            terminator: serial::DEFAULT_TERMINATOR,
            frame_capacity: serial::DEFAULT_FRAME_CAPACITY,
            buffer_chunks: 64,
        }
    }
}

impl SerialConfig {
    /// Most frames a full receive buffer can complete in one tick
    pub fn max_buffered_frames(&self) -> usize {
        self.buffer_chunks * crate::serial::CHUNK_SIZE + 1
    }
}

/// Network link parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to watch; any non-loopback interface when unset
    pub interface: Option<String>,
    /// Wireless network to join; attach only waits for the link when empty
    pub ssid: String,
    pub password: String,
    #[validate(range(min = 100))]
    pub attach_timeout_ms: u64,
    #[validate(range(min = 100))]
    pub check_interval_ms: u64,
    /// Time server to sync against after attaching. A host link leaves the
    /// clock to the system's own NTP daemon and only logs this value.
    #[validate(length(min = 1))]
    pub ntp_server: String,
    #[validate(range(min = 100))]
    pub clock_sync_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            ssid: String::new(),
            password: String::new(),
            attach_timeout_ms: timing::ATTACH_TIMEOUT_MS,
            check_interval_ms: timing::LINK_CHECK_INTERVAL_MS,
            ntp_server: "pool.ntp.org".into(),
            clock_sync_timeout_ms: timing::CLOCK_SYNC_TIMEOUT_MS,
        }
    }
}

/// Broker session parameters
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MqttConfig {
    #[validate(length(min = 1, max = 255))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(length(min = 1, max = 36))]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Channel every envelope is published on
    #[validate(length(min = 1), custom(function = "validate_topic"))]
    pub topic: String,
    pub retain: bool,
    /// CA certificate (PEM) for the broker; plain TCP when unset
    pub ca_cert: Option<PathBuf>,
    #[validate(range(min = 5, max = 3600))]
    pub keep_alive_secs: u64,
    #[validate(range(min = 100))]
    pub reconnect_delay_ms: u64,
    #[validate(range(min = 100))]
    pub connect_timeout_ms: u64,
    /// Upper bound of a serialized envelope
    #[validate(range(min = 96, max = 65536))]
    pub max_payload: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
            client_id: "uart-bridge-01".into(),
            username: None,
            password: None,
            topic: "devices/uart-bridge-01/messages".into(),
            retain: true,
            ca_cert: None,
            keep_alive_secs: 60,
            reconnect_delay_ms: timing::SESSION_RECONNECT_DELAY_MS,
            connect_timeout_ms: 10_000,
            max_payload: serial::DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Console log output formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// When false no subscriber is installed and diagnostics cost nothing
    pub enabled: bool,
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".into(),
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some("Log level must be one of: trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        let mut err = ValidationError::new("invalid_topic");
        err.message = Some("Publish topic cannot contain wildcards".into());
        return Err(err);
    }
    Ok(())
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.device.tick_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.device.status_interval_ms)
    }

    /// Settings for the connectivity supervisor
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            credentials: Credentials {
                ssid: self.network.ssid.clone(),
                password: self.network.password.clone(),
            },
            session: SessionParams {
                host: self.mqtt.host.clone(),
                port: self.mqtt.port,
                client_id: self.mqtt.client_id.clone(),
                username: self.mqtt.username.clone(),
                password: self.mqtt.password.clone(),
            },
            ntp_server: self.network.ntp_server.clone(),
            link_check_interval: Duration::from_millis(self.network.check_interval_ms),
            attach_timeout: Duration::from_millis(self.network.attach_timeout_ms),
            attach_poll_interval: Duration::from_millis(timing::ATTACH_POLL_INTERVAL_MS),
            clock_sync_timeout: Duration::from_millis(self.network.clock_sync_timeout_ms),
            session_retry_interval: Duration::from_millis(self.mqtt.reconnect_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.serial.frame_capacity, 256);
        assert_eq!(config.serial.terminator, b'\n');
        assert_eq!(config.network.check_interval_ms, 5000);
        assert!(config.mqtt.retain);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = BridgeConfig::from_toml(
            r#"
            [device]
            name = "greenhouse-7"

            [mqtt]
            host = "broker.example.com"
            topic = "greenhouse/7/uart"
            reconnect_delay_ms = 2000

            [logger]
            format = "json"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.device.name, "greenhouse-7");
        assert_eq!(config.mqtt.host, "broker.example.com");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.logger.format, LogFormat::Json);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(
            config.supervisor().session_retry_interval,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_rejects_tiny_frame_capacity() {
        let err = BridgeConfig::from_toml("[serial]\nframe_capacity = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_wildcard_topic() {
        let err = BridgeConfig::from_toml("[mqtt]\ntopic = \"a/#\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let err = BridgeConfig::from_toml("[logger]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_parse_error_reported() {
        let err = BridgeConfig::from_toml("[serial\nport = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_supervisor_settings() {
        let config = BridgeConfig::default();
        let sup = config.supervisor();
        assert_eq!(sup.link_check_interval, Duration::from_secs(5));
        assert_eq!(sup.attach_poll_interval, Duration::from_millis(100));
        assert_eq!(sup.clock_sync_timeout, Duration::from_secs(5));
        assert_eq!(sup.session.client_id, config.mqtt.client_id);
    }

    #[test]
    fn test_publish_queue_covers_full_receive_buffer() {
        let config = SerialConfig {
            buffer_chunks: 4,
            ..SerialConfig::default()
        };
        // every byte of every buffered chunk could be a terminator
        assert_eq!(config.max_buffered_frames(), 4 * crate::serial::CHUNK_SIZE + 1);
    }
}
