//! Session lifecycle types exchanged over the control channel

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CollectorError, Result};

/// Lifecycle phase of the single active session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum SessionPhase {
    /// No session prepared
    #[default]
    Idle,
    /// Parameters installed, detail file open, meter connected
    Ready,
    /// Acquisition loop polling the meter
    Running,
    /// Acquisition joined, summary being finalized
    Stopped,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::Ready => write!(f, "Ready"),
            SessionPhase::Running => write!(f, "Running"),
            SessionPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

fn default_experiment_id() -> String {
    "default_experiment".to_string()
}

fn default_algorithm() -> String {
    "NA".to_string()
}

fn default_iterations() -> i64 {
    1
}

fn default_sample_period() -> f64 {
    1.0
}

/// Wire form of the GETREADY payload, before range checks.
#[derive(Debug, Deserialize)]
struct RawSessionParameters {
    #[serde(default = "default_experiment_id")]
    experiment_id: String,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_iterations")]
    iterations: i64,
    #[serde(default = "default_sample_period")]
    sample_period: f64,
}

/// Parameters of one measurement session, read-only once installed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParameters {
    /// Free-text experiment identifier, also the detail file stem
    pub experiment_id: String,
    /// Free-text algorithm name (e.g. "ML-KEM-512", "NULL")
    pub algorithm: String,
    /// Iterations the remote workload will run
    pub iterations: u64,
    /// Meter poll period in seconds
    pub sample_period: f64,
}

impl SessionParameters {
    /// Parse and validate a GETREADY JSON payload.
    ///
    /// Unknown keys are ignored and missing keys take their defaults.
    pub fn from_json(payload: &str) -> Result<Self> {
        let raw: RawSessionParameters = serde_json::from_str(payload)
            .map_err(|e| CollectorError::MalformedParameters(e.to_string()))?;

        if raw.iterations < 0 {
            return Err(CollectorError::MalformedParameters(format!(
                "iterations must not be negative (got {})",
                raw.iterations
            )));
        }
        if !raw.sample_period.is_finite() || raw.sample_period <= 0.0 {
            return Err(CollectorError::MalformedParameters(format!(
                "sample_period must be > 0 (got {})",
                raw.sample_period
            )));
        }
        let experiment_id = raw.experiment_id.trim().to_string();
        if experiment_id.is_empty()
            || experiment_id.contains(['/', '\\'])
            || experiment_id == ".."
        {
            return Err(CollectorError::MalformedParameters(format!(
                "experiment_id {:?} is not usable as a file name",
                raw.experiment_id
            )));
        }

        Ok(Self {
            experiment_id,
            algorithm: raw.algorithm,
            iterations: raw.iterations as u64,
            sample_period: raw.sample_period,
        })
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_period)
    }

    /// Name of the per-session detail file.
    pub fn detail_file_name(&self) -> String {
        format!("{}_data.csv", self.experiment_id)
    }
}

/// Metadata reported by the remote side in the STOP message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopMetadata {
    /// Wall-clock run time measured on the device under test (s)
    #[serde(default)]
    pub time_to_run: Option<f64>,
    /// CPU temperature before the workload (°C)
    #[serde(default)]
    pub start_temperature: Option<f64>,
    /// CPU temperature after the workload (°C)
    #[serde(default)]
    pub stop_temperature: Option<f64>,
}

impl StopMetadata {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| CollectorError::MalformedParameters(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.time_to_run.is_none()
            && self.start_temperature.is_none()
            && self.stop_temperature.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_parameters_parse() {
        let params = SessionParameters::from_json(
            r#"{"experiment_id":"t1","algorithm":"NULL","iterations":100,"sample_period":0.1}"#,
        )
        .unwrap();
        assert_eq!(params.experiment_id, "t1");
        assert_eq!(params.algorithm, "NULL");
        assert_eq!(params.iterations, 100);
        assert_eq!(params.sample_period, 0.1);
        assert_eq!(params.detail_file_name(), "t1_data.csv");
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let params = SessionParameters::from_json(r#"{"tcp": false}"#).unwrap();
        assert_eq!(params.experiment_id, "default_experiment");
        assert_eq!(params.algorithm, "NA");
        assert_eq!(params.iterations, 1);
        assert_eq!(params.sample_period, 1.0);
    }

    #[test]
    fn test_zero_iterations_accepted() {
        let params = SessionParameters::from_json(r#"{"iterations": 0}"#).unwrap();
        assert_eq!(params.iterations, 0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        for payload in [
            "not json",
            r#"{"iterations": -5}"#,
            r#"{"iterations": "many"}"#,
            r#"{"sample_period": 0}"#,
            r#"{"sample_period": -0.5}"#,
            r#"{"experiment_id": "../escape"}"#,
            r#"{"experiment_id": "  "}"#,
        ] {
            let err = SessionParameters::from_json(payload).unwrap_err();
            assert!(
                matches!(err, CollectorError::MalformedParameters(_)),
                "payload {payload} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_stop_metadata_optional_fields() {
        let meta = StopMetadata::from_json(r#"{"time_to_run": 12.5}"#).unwrap();
        assert_eq!(meta.time_to_run, Some(12.5));
        assert_eq!(meta.start_temperature, None);
        assert!(!meta.is_empty());
        assert!(StopMetadata::from_json("{}").unwrap().is_empty());
        assert!(StopMetadata::from_json("[1,2").is_err());
    }
}
