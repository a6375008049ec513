//! Meter polling loop for one running session.
//!
//! Polls the telemetry source on the session's sample period, feeds the
//! energy accumulator, and streams one detail row per accepted sample.
//! Undecodable and corrupt samples are counted and skipped; the loop only
//! ends when its stop token fires. A throttled progress line carrying the
//! running error counter is logged whatever each poll's outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detail_writer::DetailWriter;
use super::source::TelemetrySource;
use crate::acquisition::MeterStats;
use crate::energy::EnergyAccumulator;
use crate::error::CollectorError;
use crate::types::SessionParameters;

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Upper bound on a single meter poll
    pub poll_timeout: Duration,
    /// Pause after a failed meter exchange instead of the sample period
    pub error_backoff: Duration,
    /// Minimum spacing of progress log lines
    pub progress_interval: Duration,
}

/// Live view of a running session, published after every poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct AcquisitionProgress {
    pub joules: f64,
    pub elapsed_secs: f64,
    pub rows: u64,
    /// Every sample skipped so far (decode, corruption, I/O, write)
    pub errors: u64,
}

/// Final accounting returned when the loop is joined.
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub accumulator: EnergyAccumulator,
    pub rows_written: u64,
    pub decode_errors: u64,
    pub corrupt_samples: u64,
    pub io_errors: u64,
    pub write_errors: u64,
    /// Link counters of a real meter; `None` for simulated sources
    pub link: Option<MeterStats>,
}

impl AcquisitionReport {
    /// Samples that produced no detail row.
    pub fn skipped(&self) -> u64 {
        self.decode_errors + self.corrupt_samples + self.io_errors + self.write_errors
    }
}

/// Owns the meter connection and the detail file for one session.
pub struct AcquisitionLoop {
    source: Box<dyn TelemetrySource>,
    writer: DetailWriter,
    params: Arc<SessionParameters>,
    settings: AcquisitionSettings,
    stop: CancellationToken,
    progress_tx: watch::Sender<AcquisitionProgress>,
    accumulator: EnergyAccumulator,
    decode_errors: u64,
    io_errors: u64,
    write_errors: u64,
    last_progress_log: Option<Instant>,
}

impl AcquisitionLoop {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        writer: DetailWriter,
        params: Arc<SessionParameters>,
        settings: AcquisitionSettings,
        stop: CancellationToken,
    ) -> (Self, watch::Receiver<AcquisitionProgress>) {
        let (progress_tx, progress_rx) = watch::channel(AcquisitionProgress::default());
        let acquisition = Self {
            source,
            writer,
            params,
            settings,
            stop,
            progress_tx,
            accumulator: EnergyAccumulator::new(),
            decode_errors: 0,
            io_errors: 0,
            write_errors: 0,
            last_progress_log: None,
        };
        (acquisition, progress_rx)
    }

    fn error_count(&self) -> u64 {
        self.decode_errors + self.io_errors + self.write_errors + self.accumulator.rejected()
    }

    /// Run until the stop token is cancelled, then close the detail file.
    pub async fn run(mut self) -> AcquisitionReport {
        let period = self.params.sample_interval();
        info!(
            "[Acquisition] Polling {} every {:.2}s for <{}>",
            self.source.source_name(),
            self.params.sample_period,
            self.params.experiment_id
        );

        let primed = tokio::select! {
            _ = self.stop.cancelled() => false,
            result = tokio::time::timeout(self.settings.poll_timeout, self.source.prime()) => {
                if !matches!(result, Ok(Ok(()))) {
                    debug!("[Acquisition] Source priming did not complete");
                }
                true
            }
        };

        while primed {
            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                result = tokio::time::timeout(self.settings.poll_timeout, self.source.next_record()) => {
                    result.unwrap_or(Err(CollectorError::Timeout))
                }
            };

            let pause = match outcome {
                Ok(record) => {
                    let now = Local::now();
                    match self.accumulator.ingest(&record, now) {
                        Ok(joules) => {
                            if let Err(e) = self.writer.append(now, &self.params, joules, &record) {
                                self.write_errors += 1;
                                warn!("[Acquisition] Detail row write failed: {}", e);
                            }
                        }
                        Err(e) => debug!("[Acquisition] {}", e),
                    }
                    period
                }
                Err(e) if e.is_sample_level() => {
                    self.decode_errors += 1;
                    debug!("[Acquisition] Sample skipped: {}", e);
                    period
                }
                Err(e) => {
                    self.io_errors += 1;
                    debug!("[Acquisition] Meter read failed: {}", e);
                    self.settings.error_backoff
                }
            };

            self.report_progress();

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.finish()
    }

    /// Publish the live view and log it at most once per progress interval.
    fn report_progress(&mut self) {
        let progress = AcquisitionProgress {
            joules: self.accumulator.total_joules().unwrap_or(0.0),
            elapsed_secs: self.accumulator.elapsed_secs().unwrap_or(0.0),
            rows: self.writer.rows(),
            errors: self.error_count(),
        };
        self.progress_tx.send_replace(progress);

        let due = self
            .last_progress_log
            .map_or(true, |t| t.elapsed() >= self.settings.progress_interval);
        if due {
            info!(
                joules = format!("{:.1}", progress.joules),
                elapsed_secs = format!("{:.1}", progress.elapsed_secs),
                rows = progress.rows,
                read_errors = progress.errors,
                "[Acquisition] Joules thus far"
            );
            self.last_progress_log = Some(Instant::now());
        }
    }

    fn finish(self) -> AcquisitionReport {
        let experiment_id = self.params.experiment_id.clone();
        let mut write_errors = self.write_errors;
        let rows_written = match self.writer.finish() {
            Ok(rows) => rows,
            Err(e) => {
                warn!("[Acquisition] Failed to close detail file: {}", e);
                write_errors += 1;
                0
            }
        };

        let link = self.source.link_stats();
        if let Some(stats) = link {
            info!(
                polls = stats.polls,
                decode_errors = stats.decode_errors,
                timeouts = stats.timeouts,
                io_errors = stats.io_errors,
                "[Acquisition] Meter link stats for {}",
                self.source.source_name()
            );
        }

        let report = AcquisitionReport {
            corrupt_samples: self.accumulator.rejected(),
            accumulator: self.accumulator,
            rows_written,
            decode_errors: self.decode_errors,
            io_errors: self.io_errors,
            write_errors,
            link,
        };

        info!(
            rows = report.rows_written,
            skipped = report.skipped(),
            "[Acquisition] Data logging finished for <{}>",
            experiment_id
        );
        report
    }
}
