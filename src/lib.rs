//! TC66 Collector: energy measurement for remote workloads
//!
//! Reads a TC66C USB power meter while a device under test runs a
//! workload, with session boundaries signalled over a UDP control channel.
//!
//! ## Architecture
//!
//! - **Acquisition**: TC66C wire codec (AES-256-ECB telemetry frames) and meter client
//! - **Energy**: cumulative-counter integration with corruption rejection
//! - **Pipeline**: per-session polling loop streaming the detail CSV
//! - **Control**: `GETREADY` / `START` / `STOP` datagrams
//! - **Session**: state machine serializing control messages into transitions
//! - **Storage**: read-only-protected summary log and output directory lock

pub mod acquisition;
pub mod config;
pub mod control;
pub mod energy;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod types;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use session::{SessionOutcome, SessionStateMachine};
pub use types::{
    MeasurementRecord, SessionParameters, SessionPhase, StopMetadata, SummaryRecord,
};
