//! Session lifecycle: Idle → Ready → Running → Stopped → Idle
//!
//! Every transition runs to completion under one async mutex, so GETREADY,
//! START and STOP arriving back to back are applied strictly in order. The
//! acquisition loop never touches the session slot; it owns the meter
//! connection and the detail file from START until it is joined at STOP.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::control::{ControlHandler, ControlMessage};
use crate::error::{CollectorError, Result};
use crate::pipeline::{
    AcquisitionLoop, AcquisitionProgress, AcquisitionReport, AcquisitionSettings, DetailWriter,
    MeterConnector, TelemetrySource,
};
use crate::storage::SummaryLog;
use crate::types::{SessionParameters, SessionPhase, StopMetadata, SummaryRecord};

/// What the session slot holds in each phase.
enum SessionSlot {
    Idle,
    Ready {
        params: Arc<SessionParameters>,
        source: Box<dyn TelemetrySource>,
        writer: DetailWriter,
    },
    Running {
        params: Arc<SessionParameters>,
        stop: CancellationToken,
        acquisition: JoinHandle<AcquisitionReport>,
        progress: watch::Receiver<AcquisitionProgress>,
    },
}

impl SessionSlot {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionSlot::Idle => SessionPhase::Idle,
            SessionSlot::Ready { .. } => SessionPhase::Ready,
            SessionSlot::Running { .. } => SessionPhase::Running,
        }
    }
}

/// Result of a finalized session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub params: Arc<SessionParameters>,
    pub report: AcquisitionReport,
    pub stop_metadata: StopMetadata,
    /// The appended summary row; `None` when no sample was accepted or
    /// the append failed
    pub summary: Option<SummaryRecord>,
}

/// Owns the single active session.
pub struct SessionStateMachine {
    connector: Arc<dyn MeterConnector>,
    summary_log: SummaryLog,
    data_dir: PathBuf,
    acquisition: AcquisitionSettings,
    /// Parent of every acquisition loop's stop token
    shutdown: CancellationToken,
    slot: Mutex<SessionSlot>,
    phase_tx: watch::Sender<SessionPhase>,
}

impl SessionStateMachine {
    pub fn new(
        connector: Arc<dyn MeterConnector>,
        summary_log: SummaryLog,
        data_dir: impl Into<PathBuf>,
        acquisition: AcquisitionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Self {
            connector,
            summary_log,
            data_dir: data_dir.into(),
            acquisition,
            shutdown,
            slot: Mutex::new(SessionSlot::Idle),
            phase_tx,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    /// Notified on every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Live energy and error counter of the running session.
    pub async fn progress(&self) -> Option<AcquisitionProgress> {
        match &*self.slot.lock().await {
            SessionSlot::Running { progress, .. } => Some(*progress.borrow()),
            _ => None,
        }
    }

    fn publish(&self, phase: SessionPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Apply one control message, logging any rejection.
    pub async fn handle_message(&self, message: ControlMessage) {
        let kind = message.kind();
        let result = match message {
            ControlMessage::GetReady { payload } => self.get_ready(&payload).await,
            ControlMessage::Start => self.start().await,
            ControlMessage::Stop { payload } => self.stop(&payload).await.map(|_| ()),
            ControlMessage::Unrecognized(text) => {
                warn!("[Session] Ignoring unrecognized message {:?}", text);
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ CollectorError::DeviceConnect { .. }) => {
                error!("[Session] {} aborted: {}", kind, e);
            }
            Err(e) => warn!("[Session] {} ignored: {}", kind, e),
        }
    }

    /// GETREADY: install parameters, connect the meter, open the detail file.
    ///
    /// Accepted in Idle and Ready (a prepared session is discarded and
    /// replaced). On any failure the machine is left Idle or unchanged.
    pub async fn get_ready(&self, payload: &str) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if let SessionSlot::Running { .. } = *slot {
            return Err(CollectorError::OutOfOrderControl {
                message: "GETREADY",
                phase: SessionPhase::Running,
            });
        }

        let params = Arc::new(SessionParameters::from_json(payload)?);

        if let SessionSlot::Ready { params: old, .. } = &*slot {
            info!(
                "[Session] Discarding prepared session <{}> for <{}>",
                old.experiment_id, params.experiment_id
            );
            // Closes the previous meter connection before reconnecting.
            *slot = SessionSlot::Idle;
            self.publish(SessionPhase::Idle);
        }

        let source = self.connector.connect().await?;
        let writer = DetailWriter::create(&self.data_dir, &params)?;

        info!(
            experiment_id = %params.experiment_id,
            algorithm = %params.algorithm,
            iterations = params.iterations,
            sample_period = params.sample_period,
            meter = %self.connector.target(),
            "[Session] Ready"
        );
        *slot = SessionSlot::Ready {
            params,
            source,
            writer,
        };
        self.publish(SessionPhase::Ready);
        Ok(())
    }

    /// START: hand the meter and detail file to a new acquisition loop.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let (params, source, writer) = match std::mem::replace(&mut *slot, SessionSlot::Idle) {
            SessionSlot::Ready {
                params,
                source,
                writer,
            } => (params, source, writer),
            other => {
                let phase = other.phase();
                *slot = other;
                return Err(CollectorError::OutOfOrderControl {
                    message: "START",
                    phase,
                });
            }
        };

        let stop = self.shutdown.child_token();
        let (acquisition, progress) = AcquisitionLoop::new(
            source,
            writer,
            params.clone(),
            self.acquisition.clone(),
            stop.clone(),
        );
        let acquisition = tokio::spawn(acquisition.run());

        info!(experiment_id = %params.experiment_id, "[Session] Running");
        *slot = SessionSlot::Running {
            params,
            stop,
            acquisition,
            progress,
        };
        self.publish(SessionPhase::Running);
        Ok(())
    }

    /// STOP: join the acquisition loop, write the summary, return to Idle.
    ///
    /// A STOP outside Running (including a replayed one) is rejected and
    /// never adds a summary row.
    pub async fn stop(&self, payload: &str) -> Result<SessionOutcome> {
        let mut slot = self.slot.lock().await;
        if !matches!(*slot, SessionSlot::Running { .. }) {
            return Err(CollectorError::OutOfOrderControl {
                message: "STOP",
                phase: slot.phase(),
            });
        }

        let stop_metadata = if payload.trim().is_empty() {
            StopMetadata::default()
        } else {
            StopMetadata::from_json(payload).unwrap_or_else(|e| {
                warn!("[Session] Stop metadata unreadable, finalizing without it: {}", e);
                StopMetadata::default()
            })
        };

        let running = std::mem::replace(&mut *slot, SessionSlot::Idle);
        let outcome = self.finish_running(running, stop_metadata).await;
        self.publish(SessionPhase::Idle);
        outcome
    }

    /// Finalize or discard whatever session is active. Used at process exit.
    pub async fn shutdown(&self) -> Option<SessionOutcome> {
        let mut slot = self.slot.lock().await;
        let outcome = match std::mem::replace(&mut *slot, SessionSlot::Idle) {
            SessionSlot::Idle => None,
            SessionSlot::Ready { params, writer, .. } => {
                info!("[Session] Discarding prepared session <{}>", params.experiment_id);
                if let Err(e) = writer.finish() {
                    warn!("[Session] Failed to close detail file: {}", e);
                }
                None
            }
            running => {
                info!("[Session] Finalizing running session before exit");
                match self.finish_running(running, StopMetadata::default()).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!("[Session] {}", e);
                        None
                    }
                }
            }
        };
        self.publish(SessionPhase::Idle);
        outcome
    }

    async fn finish_running(
        &self,
        running: SessionSlot,
        stop_metadata: StopMetadata,
    ) -> Result<SessionOutcome> {
        let SessionSlot::Running {
            params,
            stop,
            acquisition,
            ..
        } = running
        else {
            return Err(CollectorError::AcquisitionAborted(
                "no acquisition loop to join".to_string(),
            ));
        };

        stop.cancel();
        let report = acquisition
            .await
            .map_err(|e| CollectorError::AcquisitionAborted(e.to_string()))?;
        self.publish(SessionPhase::Stopped);

        let summary = self.finalize(&params, &report, &stop_metadata);
        Ok(SessionOutcome {
            params,
            report,
            stop_metadata,
            summary,
        })
    }

    /// Append the session's summary row.
    fn finalize(
        &self,
        params: &SessionParameters,
        report: &AcquisitionReport,
        stop_metadata: &StopMetadata,
    ) -> Option<SummaryRecord> {
        let (Some(total_joules), Some(duration_secs)) = (
            report.accumulator.total_joules(),
            report.accumulator.elapsed_secs(),
        ) else {
            warn!(
                skipped = report.skipped(),
                "[Session] No samples accepted for <{}>, summary not written",
                params.experiment_id
            );
            return None;
        };

        let record = SummaryRecord::new(Local::now(), params, total_joules, duration_secs);

        info!(
            experiment_id = %params.experiment_id,
            total_joules = format!("{:.2}", total_joules),
            duration_secs = format!("{:.1}", duration_secs),
            rows = report.rows_written,
            errors = report.skipped(),
            "[Session] Session finished"
        );
        if !stop_metadata.is_empty() {
            info!(
                time_to_run = ?stop_metadata.time_to_run,
                start_temperature = ?stop_metadata.start_temperature,
                stop_temperature = ?stop_metadata.stop_temperature,
                "[Session] Remote run metadata"
            );
        }

        match self.summary_log.append(&record) {
            Ok(()) => Some(record),
            Err(e) => {
                error!("[Session] Summary not recorded: {:#}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ControlHandler for SessionStateMachine {
    async fn handle(&self, message: ControlMessage, _from: std::net::SocketAddr) {
        self.handle_message(message).await;
    }
}
