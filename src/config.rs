//! Configuration
//!
//! Serde-backed settings for the transports and logging, persisted as
//! JSON under the user's config directory. Every field has a default so
//! partial files keep working.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// BLE transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Timeout waiting for the radio to report usable.
    #[serde(default = "default_step_timeout_ms")]
    pub radio_ready_timeout_ms: u64,
    /// Timeout waiting for the link-established notification.
    #[serde(default = "default_step_timeout_ms")]
    pub link_timeout_ms: u64,
    /// Timeout waiting for a usable characteristic to be resolved.
    #[serde(default = "default_step_timeout_ms")]
    pub characteristic_timeout_ms: u64,
    /// Timeout waiting for the peripheral to report a connected physical
    /// state.
    #[serde(default = "default_step_timeout_ms")]
    pub physical_state_timeout_ms: u64,
    /// Interval between condition polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pacing delay between MTU-sized chunks of a large write.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Interval between periodic signal-strength reads.
    #[serde(default = "default_rssi_interval_ms")]
    pub rssi_interval_ms: u64,
    /// Interval between data-flow drains.
    #[serde(default = "default_flow_interval_ms")]
    pub flow_interval_ms: u64,
    /// Reconnection attempt cap.
    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay of the exponential reconnection backoff.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Write-chunk size assumed until the link reports its own.
    #[serde(default = "default_mtu")]
    pub default_mtu: usize,
    /// Timeout for one device-information characteristic read.
    #[serde(default = "default_info_read_timeout_ms")]
    pub info_read_timeout_ms: u64,
    /// Single extended wait before giving up on a device-information
    /// field.
    #[serde(default = "default_info_retry_timeout_ms")]
    pub info_retry_timeout_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            radio_ready_timeout_ms: default_step_timeout_ms(),
            link_timeout_ms: default_step_timeout_ms(),
            characteristic_timeout_ms: default_step_timeout_ms(),
            physical_state_timeout_ms: default_step_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            chunk_delay_ms: default_chunk_delay_ms(),
            rssi_interval_ms: default_rssi_interval_ms(),
            flow_interval_ms: default_flow_interval_ms(),
            max_reconnect_attempts: default_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_delay_ms(),
            default_mtu: default_mtu(),
            info_read_timeout_ms: default_info_read_timeout_ms(),
            info_retry_timeout_ms: default_info_retry_timeout_ms(),
        }
    }
}

/// Stream transport (classic Bluetooth / TCP) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Timeout for the whole connect step.
    #[serde(default = "default_step_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout waiting for the worker thread to be ready.
    #[serde(default = "default_worker_ready_timeout_ms")]
    pub worker_ready_timeout_ms: u64,
    /// Interval between condition polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Read timeout applied to the underlying stream so the worker loop
    /// stays responsive to shutdown.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Size of the worker's read buffer.
    #[serde(default = "default_read_buffer_len")]
    pub read_buffer_len: usize,
    /// Interval between data-flow drains.
    #[serde(default = "default_flow_interval_ms")]
    pub flow_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_step_timeout_ms(),
            worker_ready_timeout_ms: default_worker_ready_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            read_buffer_len: default_read_buffer_len(),
            flow_interval_ms: default_flow_interval_ms(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
            ansi_colors: default_true(),
        }
    }
}

/// Top-level configuration aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ConnectConfig {
    /// Default location: `<config dir>/obd-connect/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("obd-connect").join("config.json"))
    }

    /// Load from the given path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default(path: Option<PathBuf>) -> Self {
        let Some(path) = path.or_else(Self::default_path) else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Invalid config at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist to the given path (or the default location), creating
    /// parent directories as needed.
    pub fn save(&self, path: Option<PathBuf>) -> anyhow::Result<()> {
        let path = path
            .or_else(Self::default_path)
            .ok_or_else(|| anyhow::anyhow!("No config directory available"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }
}

fn default_step_timeout_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_chunk_delay_ms() -> u64 {
    1
}
fn default_rssi_interval_ms() -> u64 {
    3000
}
fn default_flow_interval_ms() -> u64 {
    1
}
fn default_reconnect_attempts() -> u32 {
    1
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_mtu() -> usize {
    20
}
fn default_info_read_timeout_ms() -> u64 {
    500
}
fn default_info_retry_timeout_ms() -> u64 {
    1500
}
fn default_worker_ready_timeout_ms() -> u64 {
    2000
}
fn default_io_timeout_ms() -> u64 {
    100
}
fn default_read_buffer_len() -> usize {
    4096
}
fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "obd-connect".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_preserve_reconnect_cap() {
        let config = BleConfig::default();
        assert_eq!(config.max_reconnect_attempts, 1);
        assert_eq!(config.reconnect_base_delay_ms, 1000);
        assert_eq!(config.default_mtu, 20);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ConnectConfig =
            serde_json::from_str(r#"{"ble": {"rssi_interval_ms": 1000}}"#).unwrap();
        assert_eq!(config.ble.rssi_interval_ms, 1000);
        assert_eq!(config.ble.max_reconnect_attempts, 1);
        assert_eq!(config.stream.io_timeout_ms, 100);
        assert_eq!(config.log.level, "info");
    }
}
