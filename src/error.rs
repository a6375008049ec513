//! Collector error taxonomy
//!
//! Sample-level errors (`FrameDecode`, `SampleCorruption`) are counted and
//! skipped by the acquisition loop. Control-level errors
//! (`MalformedParameters`, `OutOfOrderControl`) are logged and leave the
//! session untouched. `DeviceConnect` aborts only the current ready attempt.

use thiserror::Error;

use crate::types::SessionPhase;

/// Errors produced by the collector core.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Invalid meter command: {0}")]
    InvalidCommand(String),

    #[error("Telemetry frame decode failed: {0}")]
    FrameDecode(String),

    #[error("Malformed session parameters: {0}")]
    MalformedParameters(String),

    #[error("Failed to connect to meter on {port}: {message}")]
    DeviceConnect { port: String, message: String },

    #[error("Meter I/O error: {0}")]
    DeviceIo(#[source] std::io::Error),

    #[error("Timeout waiting for meter response")]
    Timeout,

    #[error("Corrupted sample rejected (running energy {joules:.2} J)")]
    SampleCorruption { joules: f64 },

    #[error("{message} rejected in phase {phase}")]
    OutOfOrderControl {
        message: &'static str,
        phase: SessionPhase,
    },

    #[error("Acquisition task ended abnormally: {0}")]
    AcquisitionAborted(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// True for errors that are counted per sample and never stop polling.
    pub fn is_sample_level(&self) -> bool {
        matches!(
            self,
            CollectorError::FrameDecode(_) | CollectorError::SampleCorruption { .. }
        )
    }

    /// True when the meter link itself failed (no bytes, timeout, broken port).
    pub fn is_io_failure(&self) -> bool {
        matches!(self, CollectorError::DeviceIo(_) | CollectorError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
