//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! The raw TOML is walked before serde deserialization so that a typo in a
//! key name is reported instead of silently falling back to the default.
//! Unknown keys only warn; range errors reject the file.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use super::CollectorConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of [`CollectorConfig`].
///
/// Must be kept in step with the structs in `collector_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "device",
        "device.port",
        "device.baud_rate",
        "device.read_timeout_ms",
        "device.settle_ms",
        "control",
        "control.bind_addr",
        "control.recv_timeout_ms",
        "control.max_datagram_bytes",
        "output",
        "output.data_dir",
        "output.summary_file",
        "acquisition",
        "acquisition.poll_timeout_ms",
        "acquisition.error_backoff_ms",
        "acquisition.progress_interval_secs",
    ];
    keys.iter().copied().collect()
}

/// Collect every dotted key path in a TOML tree.
///
/// `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

/// Warnings for every key in `raw_toml` that the collector does not know.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        // Syntax errors surface from serde with a better message.
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Returns (errors, warnings). Errors make the file unusable.
pub fn validate_ranges(config: &CollectorConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let d = &config.device;
    if d.port.trim().is_empty() {
        errors.push("device.port must not be empty".to_string());
    }
    if d.baud_rate == 0 {
        errors.push("device.baud_rate must be > 0".to_string());
    }
    if d.read_timeout_ms == 0 {
        errors.push("device.read_timeout_ms must be > 0".to_string());
    }

    let c = &config.control;
    if c.bind_addr.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "control.bind_addr = {:?} is not an IP:port socket address",
            c.bind_addr
        ));
    }
    if c.recv_timeout_ms == 0 || c.recv_timeout_ms > 60_000 {
        errors.push(format!(
            "control.recv_timeout_ms = {} must be within 1..=60000",
            c.recv_timeout_ms
        ));
    }
    if !(64..=65_507).contains(&c.max_datagram_bytes) {
        errors.push(format!(
            "control.max_datagram_bytes = {} must be within 64..=65507",
            c.max_datagram_bytes
        ));
    }

    let o = &config.output;
    let summary = Path::new(&o.summary_file);
    if o.summary_file.trim().is_empty() || summary.components().count() != 1 {
        errors.push(format!(
            "output.summary_file = {:?} must be a plain file name",
            o.summary_file
        ));
    }

    let a = &config.acquisition;
    if a.poll_timeout_ms == 0 {
        errors.push("acquisition.poll_timeout_ms must be > 0".to_string());
    }
    if !a.progress_interval_secs.is_finite() || a.progress_interval_secs < 0.0 {
        errors.push(format!(
            "acquisition.progress_interval_secs = {} must be a finite number >= 0",
            a.progress_interval_secs
        ));
    }
    if a.poll_timeout_ms < d.read_timeout_ms {
        warnings.push(ValidationWarning {
            field: "acquisition.poll_timeout_ms".to_string(),
            message: format!(
                "acquisition.poll_timeout_ms ({}) is shorter than device.read_timeout_ms ({}); slow meter reads will be cut off",
                a.poll_timeout_ms, d.read_timeout_ms
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}
