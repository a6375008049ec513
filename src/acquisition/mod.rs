//! Meter data acquisition
//!
//! TC66C wire codec, the meter client, and serial port discovery.

pub mod meter;
pub mod ports;
pub mod tc66_codec;

pub use meter::{MeterStats, MeterTransport, SerialSettings, Tc66Meter};
pub use tc66_codec::{decode_telemetry_frame, encode_command, Command, RawTelemetry};
