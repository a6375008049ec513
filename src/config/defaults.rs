//! Built-in defaults.
//!
//! Grouped by subsystem; `CollectorConfig::default()` is assembled from
//! these values.

// ============================================================================
// Meter (TC66C over USB serial)
// ============================================================================

/// Default serial port of the meter.
#[cfg(windows)]
pub const DEVICE_PORT: &str = "COM5";
#[cfg(not(windows))]
pub const DEVICE_PORT: &str = "/dev/ttyACM0";

/// TC66C line speed (8N2, no flow control).
pub const DEVICE_BAUD_RATE: u32 = 115_200;

/// Serial read timeout for a single response (ms).
pub const DEVICE_READ_TIMEOUT_MS: u64 = 5_000;

/// Pause after opening the port before the first command (ms).
pub const DEVICE_SETTLE_MS: u64 = 1_000;

// ============================================================================
// Control channel
// ============================================================================

/// UDP address the collector listens on.
pub const CONTROL_BIND_ADDR: &str = "0.0.0.0:65432";

/// Bounded wait per receive so shutdown is observed (ms).
pub const CONTROL_RECV_TIMEOUT_MS: u64 = 1_000;

/// Receive buffer; longer datagrams are truncated.
pub const CONTROL_MAX_DATAGRAM_BYTES: usize = 1_024;

// ============================================================================
// Output
// ============================================================================

pub const OUTPUT_DATA_DIR: &str = ".";

/// Shared summary log name.
pub const OUTPUT_SUMMARY_FILE: &str = "AllResults.csv";

// ============================================================================
// Acquisition loop
// ============================================================================

/// Upper bound on one poll, including the serial read (ms).
pub const POLL_TIMEOUT_MS: u64 = 6_000;

/// Pause after a failed poll instead of the sample period (ms).
pub const ERROR_BACKOFF_MS: u64 = 100;

/// Minimum spacing of progress log lines (s).
pub const PROGRESS_INTERVAL_SECS: f64 = 1.0;

// ============================================================================
// No-network mode
// ============================================================================

pub const NONET_EXPERIMENT_ID: &str = "manual_run";
pub const NONET_ALGORITHM: &str = "test_algo";
pub const NONET_ITERATIONS: u64 = 1_000;
pub const NONET_SAMPLE_PERIOD: f64 = 0.1;
pub const NONET_START_TEMPERATURE: f64 = 25.0;
pub const NONET_STOP_TEMPERATURE: f64 = 26.0;

/// Delay before the scripted START when only `--nonet-duration` is given (s).
pub const NONET_DELAY_START_SECS: f64 = 0.0;

/// Acquisition length when only `--nonet-delaystart` is given (s).
pub const NONET_DURATION_SECS: f64 = 30.0;
