//! Per-session summary row for the shared results log

use std::borrow::Cow;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::SessionParameters;

/// Header of the shared summary log.
pub const SUMMARY_HEADER: &str =
    "Timestamp,Iterations,Algorithm,Experiment_ID,TotalJoules,DurationSeconds,JoulesPer1000,SecondsPer1000";

/// Timestamp format shared by the detail and summary files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Quote a free-text CSV field only when it needs it.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(quoted_csv_field(value))
    } else {
        Cow::Borrowed(value)
    }
}

/// Always quote, doubling embedded quotes.
pub fn quoted_csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// One finalized session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub timestamp: DateTime<Local>,
    pub iterations: u64,
    pub algorithm: String,
    pub experiment_id: String,
    pub total_joules: f64,
    pub duration_secs: f64,
    /// `None` when iterations is zero
    pub joules_per_1000: Option<f64>,
    /// `None` when iterations is zero
    pub seconds_per_1000: Option<f64>,
}

impl SummaryRecord {
    /// Build a summary, deriving the per-1000-iteration rates.
    pub fn new(
        timestamp: DateTime<Local>,
        params: &SessionParameters,
        total_joules: f64,
        duration_secs: f64,
    ) -> Self {
        let per_1000 = |value: f64| {
            (params.iterations > 0).then(|| value / params.iterations as f64 * 1000.0)
        };
        Self {
            timestamp,
            iterations: params.iterations,
            algorithm: params.algorithm.clone(),
            experiment_id: params.experiment_id.clone(),
            total_joules,
            duration_secs,
            joules_per_1000: per_1000(total_joules),
            seconds_per_1000: per_1000(duration_secs),
        }
    }

    /// Render as one CSV line (no trailing newline).
    pub fn to_csv_line(&self) -> String {
        let rate = |value: Option<f64>| match value {
            Some(v) => format!("{v:.3}"),
            None => "N/A".to_string(),
        };
        format!(
            "{},{},{},{},{:.2},{:.1},{},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.iterations,
            csv_field(&self.algorithm),
            csv_field(&self.experiment_id),
            self.total_joules,
            self.duration_secs,
            rate(self.joules_per_1000),
            rate(self.seconds_per_1000),
        )
    }
}
