//! Acquisition Pipeline Module
//!
//! ```text
//! MeterConnector ──connect──▶ TelemetrySource ──poll──▶ AcquisitionLoop
//!                                                        │
//!                                 EnergyAccumulator ◀────┤
//!                                 DetailWriter      ◀────┘
//! ```
//!
//! One [`AcquisitionLoop`] runs per session, between START and STOP.

pub mod acquisition_loop;
pub mod detail_writer;
pub mod source;

pub use acquisition_loop::{AcquisitionLoop, AcquisitionProgress, AcquisitionReport, AcquisitionSettings};
pub use detail_writer::{DetailWriter, DETAIL_HEADER};
pub use source::{
    MeterConnector, MeterSource, ScriptedConnector, ScriptedPoll, ScriptedSource, SerialConnector,
    TelemetrySource,
};
