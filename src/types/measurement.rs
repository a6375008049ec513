//! Meter measurement types

use serde::{Deserialize, Serialize};

/// One decoded telemetry poll from the TC66C meter.
///
/// Values are already scaled to engineering units. The cumulative counters
/// (`g0_*`, `g1_*`) are raw integers as reported by the meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Bus voltage (V), raw × 1e-4
    pub volt: f64,
    /// Bus current (A), raw × 1e-5
    pub current: f64,
    /// Instantaneous power (W), raw × 1e-4
    pub power: f64,
    /// Load resistance (Ω), raw × 1e-1
    pub resistance: f64,
    /// Channel 0 cumulative charge (mAh)
    pub g0_mah: u32,
    /// Channel 0 cumulative energy (mWh)
    pub g0_mwh: u32,
    /// Channel 1 cumulative charge (mAh)
    pub g1_mah: u32,
    /// Channel 1 cumulative energy (mWh)
    pub g1_mwh: u32,
    /// Meter temperature (°C), sign carried by a separate flag on the wire
    pub temperature: i64,
    /// D+ sense line (V), raw × 1e-2
    pub d_plus: f64,
    /// D- sense line (V), raw × 1e-2
    pub d_minus: f64,
}

impl MeasurementRecord {
    /// Sum of both channels' energy counters (mWh).
    ///
    /// Only one channel is live at a time and the meter does not say which,
    /// so both are always summed; the idle channel contributes zero.
    pub fn combined_charge_mwh(&self) -> f64 {
        f64::from(self.g0_mwh) + f64::from(self.g1_mwh)
    }
}

/// Identity block carried in the first sub-record of every telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterIdentity {
    /// Product name, e.g. "TC66"
    pub name: String,
    /// Firmware version string, e.g. "1.14"
    pub version: String,
    pub serial_number: u32,
    /// Power-on count
    pub runs: u32,
}

/// Full result of decoding one telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub identity: MeterIdentity,
    pub record: MeasurementRecord,
}

/// One entry of the meter's internal recording buffer (`gtrec`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordingSample {
    pub volt: f64,
    pub current: f64,
}

/// Answer to the `query` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareMode {
    /// Normal application firmware ("firm")
    Firmware,
    /// Bootloader ("boot")
    Bootloader,
}
