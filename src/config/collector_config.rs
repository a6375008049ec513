use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::acquisition::SerialSettings;
use crate::control::ListenerSettings;
use crate::pipeline::AcquisitionSettings;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TC66_COLLECTOR_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "collector_config.toml";

/// Top-level collector configuration.
///
/// Every section and field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectorConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

impl CollectorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TC66_COLLECTOR_CONFIG`
    /// 2. `./collector_config.toml`
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded collector config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to a missing file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded collector config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    ///
    /// Unknown keys are logged as warnings and never fail the load.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject values the collector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.device.baud_rate,
            read_timeout: Duration::from_millis(self.device.read_timeout_ms),
            settle: Duration::from_millis(self.device.settle_ms),
        }
    }

    pub fn listener_settings(&self) -> Result<ListenerSettings, ConfigError> {
        let bind_addr: SocketAddr = self.control.bind_addr.parse().map_err(|_| {
            ConfigError::Validation(vec![format!(
                "control.bind_addr = {:?} is not a socket address",
                self.control.bind_addr
            )])
        })?;
        Ok(ListenerSettings {
            bind_addr,
            recv_timeout: Duration::from_millis(self.control.recv_timeout_ms),
            max_datagram_bytes: self.control.max_datagram_bytes,
        })
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            poll_timeout: Duration::from_millis(self.acquisition.poll_timeout_ms),
            error_backoff: Duration::from_millis(self.acquisition.error_backoff_ms),
            progress_interval: Duration::from_secs_f64(
                self.acquisition.progress_interval_secs.max(0.0),
            ),
        }
    }

    /// Full path of the shared summary log.
    pub fn summary_path(&self) -> PathBuf {
        self.output.data_dir.join(&self.output.summary_file)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// [device]
// ============================================================================

/// Meter serial link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_port() -> String {
    defaults::DEVICE_PORT.to_string()
}
fn default_baud_rate() -> u32 {
    defaults::DEVICE_BAUD_RATE
}
fn default_read_timeout_ms() -> u64 {
    defaults::DEVICE_READ_TIMEOUT_MS
}
fn default_settle_ms() -> u64 {
    defaults::DEVICE_SETTLE_MS
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

// ============================================================================
// [control]
// ============================================================================

/// UDP control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,
}

fn default_bind_addr() -> String {
    defaults::CONTROL_BIND_ADDR.to_string()
}
fn default_recv_timeout_ms() -> u64 {
    defaults::CONTROL_RECV_TIMEOUT_MS
}
fn default_max_datagram_bytes() -> usize {
    defaults::CONTROL_MAX_DATAGRAM_BYTES
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            recv_timeout_ms: default_recv_timeout_ms(),
            max_datagram_bytes: default_max_datagram_bytes(),
        }
    }
}

// ============================================================================
// [output]
// ============================================================================

/// Where detail files and the summary log are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_summary_file")]
    pub summary_file: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::OUTPUT_DATA_DIR)
}
fn default_summary_file() -> String {
    defaults::OUTPUT_SUMMARY_FILE.to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            summary_file: default_summary_file(),
        }
    }
}

// ============================================================================
// [acquisition]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: f64,
}

fn default_poll_timeout_ms() -> u64 {
    defaults::POLL_TIMEOUT_MS
}
fn default_error_backoff_ms() -> u64 {
    defaults::ERROR_BACKOFF_MS
}
fn default_progress_interval_secs() -> f64 {
    defaults::PROGRESS_INTERVAL_SECS
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = CollectorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CollectorConfig::default());
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.summary_path(), PathBuf::from("./AllResults.csv"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = CollectorConfig::from_toml_str(
            r#"
            [device]
            port = "/dev/ttyACM3"

            [output]
            data_dir = "/tmp/results"
            "#,
        )
        .unwrap();
        assert_eq!(config.device.port, "/dev/ttyACM3");
        assert_eq!(config.device.read_timeout_ms, 5_000);
        assert_eq!(config.summary_path(), PathBuf::from("/tmp/results/AllResults.csv"));
    }

    #[test]
    fn test_derived_settings() {
        let config = CollectorConfig::default();
        let listener = config.listener_settings().unwrap();
        assert_eq!(listener.bind_addr.port(), 65432);
        assert_eq!(listener.recv_timeout, Duration::from_secs(1));

        let acq = config.acquisition_settings();
        assert_eq!(acq.error_backoff, Duration::from_millis(100));
        assert_eq!(config.serial_settings().settle, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = CollectorConfig::from_toml_str(
            r#"
            [device]
            baud_rate = 0
            [control]
            bind_addr = "not-an-address"
            "#,
        )
        .unwrap_err();
        let ConfigError::Validation(errors) = err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let err = CollectorConfig::from_toml_str("[device]\nbaud_rate = \"fast\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn test_toml_roundtrip_preserves_config() {
        let config = CollectorConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(CollectorConfig::from_toml_str(&text).unwrap(), config);
    }
}
