//! Shared data structures for the energy collector
//!
//! - `MeasurementRecord`, `MeterIdentity`, `RecordingSample`: decoded meter data
//! - `SessionParameters`, `StopMetadata`, `SessionPhase`: control channel / lifecycle
//! - `SummaryRecord`: one finalized session in the results log

mod measurement;
mod session;
mod summary;

pub use measurement::*;
pub use session::*;
pub use summary::*;
