//! Scripted session without a control channel
//!
//! Drives the state machine through GETREADY, START and STOP locally,
//! for bench runs where the device under test cannot reach the collector.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{SessionOutcome, SessionStateMachine};
use crate::config::defaults;
use crate::control::ControlMessage;
use crate::types::{SessionParameters, SessionPhase, StopMetadata};

/// Timing of a no-network run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoNetworkPlan {
    pub delay_start: Duration,
    pub duration: Duration,
}

impl NoNetworkPlan {
    /// Build from the command-line values; either one alone enables the mode.
    ///
    /// Returns `Ok(None)` when neither is given.
    pub fn from_args(delay_start: Option<f64>, duration: Option<f64>) -> Result<Option<Self>, String> {
        if delay_start.is_none() && duration.is_none() {
            return Ok(None);
        }
        let delay = delay_start.unwrap_or(defaults::NONET_DELAY_START_SECS);
        let duration = duration.unwrap_or(defaults::NONET_DURATION_SECS);
        if !delay.is_finite() || delay < 0.0 {
            return Err(format!("--nonet-delaystart must be >= 0 (got {delay})"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(format!("--nonet-duration must be > 0 (got {duration})"));
        }
        Ok(Some(Self {
            delay_start: Duration::from_secs_f64(delay),
            duration: Duration::from_secs_f64(duration),
        }))
    }

    pub fn ready_message(&self) -> ControlMessage {
        ControlMessage::get_ready(&SessionParameters {
            experiment_id: defaults::NONET_EXPERIMENT_ID.to_string(),
            algorithm: defaults::NONET_ALGORITHM.to_string(),
            iterations: defaults::NONET_ITERATIONS,
            sample_period: defaults::NONET_SAMPLE_PERIOD,
        })
    }

    /// Stop metadata reported for the run; the temperatures are fixed.
    pub fn stop_metadata(&self) -> StopMetadata {
        StopMetadata {
            time_to_run: Some(self.duration.as_secs_f64()),
            start_temperature: Some(defaults::NONET_START_TEMPERATURE),
            stop_temperature: Some(defaults::NONET_STOP_TEMPERATURE),
        }
    }

    pub fn stop_message(&self) -> ControlMessage {
        ControlMessage::stop(&self.stop_metadata())
    }
}

/// Run one scripted session. Cancelling `shutdown` finalizes early.
pub async fn run_no_network(
    machine: &SessionStateMachine,
    plan: &NoNetworkPlan,
    shutdown: &CancellationToken,
) -> Option<SessionOutcome> {
    info!(
        delay_start = plan.delay_start.as_secs_f64(),
        duration = plan.duration.as_secs_f64(),
        "[NoNetwork] Running scripted session"
    );

    machine.handle_message(plan.ready_message()).await;
    if machine.phase() != SessionPhase::Ready {
        warn!("[NoNetwork] Session did not become ready, giving up");
        return None;
    }

    tokio::select! {
        _ = shutdown.cancelled() => return machine.shutdown().await,
        _ = tokio::time::sleep(plan.delay_start) => {}
    }
    machine.handle_message(ControlMessage::Start).await;

    tokio::select! {
        _ = shutdown.cancelled() => return machine.shutdown().await,
        _ = tokio::time::sleep(plan.duration) => {}
    }

    let ControlMessage::Stop { payload } = plan.stop_message() else {
        return None;
    };
    match machine.stop(&payload).await {
        Ok(outcome) => {
            info!("[NoNetwork] Run finished");
            Some(outcome)
        }
        Err(e) => {
            warn!("[NoNetwork] STOP failed: {}", e);
            None
        }
    }
}
