//! Cumulative energy integration over meter samples
//!
//! Session energy is always `(last − first) × 3.6` over the combined mWh
//! counter, never a sum of deltas, so a single bad intermediate sample
//! cannot skew the total.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{CollectorError, Result};
use crate::types::MeasurementRecord;

/// mWh → J
pub const JOULES_PER_MWH: f64 = 3.6;

/// A latched combined-charge reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChargePoint {
    pub charge_mwh: f64,
    pub at: DateTime<Local>,
}

/// Integrates one session's samples into an energy total.
#[derive(Debug, Clone, Default)]
pub struct EnergyAccumulator {
    first: Option<ChargePoint>,
    last: Option<ChargePoint>,
    accepted: u64,
    rejected: u64,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample taken at `now`; returns the running energy in joules.
    ///
    /// The first sample of a session is latched as the reference point.
    /// A sample that would make the running energy negative is a serial-link
    /// glitch: it is counted and rejected, and the last accepted point is kept.
    pub fn ingest(&mut self, record: &MeasurementRecord, now: DateTime<Local>) -> Result<f64> {
        let charge_mwh = record.combined_charge_mwh();
        let point = ChargePoint { charge_mwh, at: now };

        let Some(first) = self.first else {
            self.first = Some(point);
            self.last = Some(point);
            self.accepted += 1;
            return Ok(0.0);
        };

        let joules = (charge_mwh - first.charge_mwh) * JOULES_PER_MWH;
        if joules < 0.0 {
            self.rejected += 1;
            return Err(CollectorError::SampleCorruption { joules });
        }

        self.last = Some(point);
        self.accepted += 1;
        Ok(joules)
    }

    /// Energy between the first and last accepted samples.
    pub fn total_joules(&self) -> Option<f64> {
        match (self.first, self.last) {
            (Some(first), Some(last)) => Some((last.charge_mwh - first.charge_mwh) * JOULES_PER_MWH),
            _ => None,
        }
    }

    /// Seconds between the first and last accepted samples.
    pub fn elapsed_secs(&self) -> Option<f64> {
        match (self.first, self.last) {
            (Some(first), Some(last)) => {
                Some((last.at - first.at).num_microseconds().unwrap_or(0) as f64 / 1e6)
            }
            _ => None,
        }
    }

    pub fn first(&self) -> Option<ChargePoint> {
        self.first
    }

    pub fn last(&self) -> Option<ChargePoint> {
        self.last
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Samples rejected as corrupt.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn has_samples(&self) -> bool {
        self.first.is_some()
    }
}
