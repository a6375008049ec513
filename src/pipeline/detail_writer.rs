//! Per-session detail CSV (`<experiment_id>_data.csv`)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::types::{csv_field, quoted_csv_field, MeasurementRecord, SessionParameters, TIMESTAMP_FORMAT};

pub const DETAIL_HEADER: &str = "Timestamp,Iterations,Algorithm,Experiment_ID,Sample_Period,Joules,Volt,Current,Power,Resistance,G0_mAh,G1_mAh,Temp,D_plus,D_minus";

/// Writer for one session's detail rows. Flushed after every row.
pub struct DetailWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl DetailWriter {
    /// Create (or truncate) the detail file in `dir` and write its header.
    pub fn create(dir: &Path, params: &SessionParameters) -> Result<Self> {
        let path = dir.join(params.detail_file_name());
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{DETAIL_HEADER}")?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "Detail file opened");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Append one sample row.
    pub fn append(
        &mut self,
        at: DateTime<Local>,
        params: &SessionParameters,
        joules: f64,
        record: &MeasurementRecord,
    ) -> Result<()> {
        writeln!(self.writer, "{}", format_row(at, params, joules, record))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, returning the number of data rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.rows)
    }
}

/// Format one detail row (no trailing newline).
pub fn format_row(
    at: DateTime<Local>,
    params: &SessionParameters,
    joules: f64,
    r: &MeasurementRecord,
) -> String {
    format!(
        "{},{},{},{},{:.2},{:.2},{:.4},{:.5},{:.4},{:.1},{},{},{},{:.2},{:.2}",
        at.format(TIMESTAMP_FORMAT),
        params.iterations,
        csv_field(&params.algorithm),
        quoted_csv_field(&params.experiment_id),
        params.sample_period,
        joules,
        r.volt,
        r.current,
        r.power,
        r.resistance,
        r.g0_mah,
        r.g1_mah,
        r.temperature,
        r.d_plus,
        r.d_minus,
    )
}
