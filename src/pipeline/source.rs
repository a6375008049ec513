//! Telemetry source abstraction for meter ingestion.
//!
//! Provides a unified trait for reading measurement records from different
//! sources: a TC66C on a serial port, or a scripted meter that replays
//! encrypted frames through the same codec (simulation and tests).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::acquisition::tc66_codec::{self, RawTelemetry, TELEMETRY_FRAME_LEN};
use crate::acquisition::{MeterStats, SerialSettings, Tc66Meter};
use crate::error::{CollectorError, Result};
use crate::types::MeasurementRecord;

/// Trait abstracting where measurement records come from.
///
/// The acquisition loop calls [`next_record`](TelemetrySource::next_record)
/// inside a `select!` with cancellation and a poll timeout.
#[async_trait]
pub trait TelemetrySource: Send + 'static {
    /// Called once before the first measured poll of a session.
    async fn prime(&mut self) -> Result<()> {
        Ok(())
    }

    /// Poll the next record.
    async fn next_record(&mut self) -> Result<MeasurementRecord>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;

    /// Link health counters, for sources backed by a real meter.
    fn link_stats(&self) -> Option<MeterStats> {
        None
    }
}

/// Opens a telemetry source when a session becomes ready.
#[async_trait]
pub trait MeterConnector: Send + Sync + 'static {
    /// Establish the device connection. Failure aborts the ready attempt.
    async fn connect(&self) -> Result<Box<dyn TelemetrySource>>;

    /// Where the connector points (port name, "simulated", ...).
    fn target(&self) -> String;
}

// ============================================================================
// Serial TC66C
// ============================================================================

/// A TC66C on a serial port.
pub struct MeterSource {
    meter: Tc66Meter,
    identity_logged: bool,
}

impl MeterSource {
    pub fn new(meter: Tc66Meter) -> Self {
        Self {
            meter,
            identity_logged: false,
        }
    }
}

#[async_trait]
impl TelemetrySource for MeterSource {
    /// The meter may hand back a stale frame on the first `getva`; drop it.
    async fn prime(&mut self) -> Result<()> {
        match self.meter.poll().await {
            Ok(_) => tracing::debug!(port = %self.meter.port_name(), "Discarded stale first frame"),
            Err(e) => tracing::debug!(error = %e, "Stale-frame flush failed, continuing"),
        }
        Ok(())
    }

    async fn next_record(&mut self) -> Result<MeasurementRecord> {
        let frame = self.meter.poll().await?;
        if !self.identity_logged {
            tracing::info!(
                name = %frame.identity.name,
                version = %frame.identity.version,
                serial = frame.identity.serial_number,
                runs = frame.identity.runs,
                "Meter identified"
            );
            self.identity_logged = true;
        }
        Ok(frame.record)
    }

    fn source_name(&self) -> &str {
        self.meter.port_name()
    }

    fn link_stats(&self) -> Option<MeterStats> {
        Some(self.meter.stats())
    }
}

/// Opens a [`MeterSource`] on a fixed serial port.
pub struct SerialConnector {
    port: String,
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, settings: SerialSettings) -> Self {
        Self {
            port: port.into(),
            settings,
        }
    }
}

#[async_trait]
impl MeterConnector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn TelemetrySource>> {
        let meter = Tc66Meter::open(&self.port, &self.settings).await?;
        Ok(Box::new(MeterSource::new(meter)))
    }

    fn target(&self) -> String {
        self.port.clone()
    }
}

// ============================================================================
// Scripted meter (simulation)
// ============================================================================

/// One scripted meter answer.
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    /// A well-formed frame, encrypted then decoded through the real codec
    Frame(RawTelemetry),
    /// A frame mangled on the serial link
    Garbled,
    /// No answer before the read timeout
    Silent,
}

/// Replays a script of meter answers.
///
/// Once the script is exhausted it keeps repeating the last frame, like a
/// meter whose counters have stopped moving.
pub struct ScriptedSource {
    script: VecDeque<ScriptedPoll>,
    last_frame: Option<RawTelemetry>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = ScriptedPoll>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last_frame: None,
        }
    }

    /// Frames whose combined charge climbs by `step_mwh` per poll.
    pub fn ramp(start_mwh: u32, step_mwh: u32, polls: usize) -> Vec<ScriptedPoll> {
        (0..polls)
            .map(|i| {
                ScriptedPoll::Frame(RawTelemetry {
                    volt: 51_000,
                    current: 45_000,
                    power: 22_950,
                    resistance: 113,
                    g0_mwh: start_mwh + step_mwh * i as u32,
                    temp: 25,
                    ..Default::default()
                })
            })
            .collect()
    }
}

#[async_trait]
impl TelemetrySource for ScriptedSource {
    async fn next_record(&mut self) -> Result<MeasurementRecord> {
        let poll = match self.script.pop_front() {
            Some(poll) => poll,
            None => match &self.last_frame {
                Some(frame) => ScriptedPoll::Frame(frame.clone()),
                None => ScriptedPoll::Silent,
            },
        };

        match poll {
            ScriptedPoll::Frame(raw) => {
                let frame = tc66_codec::decode_telemetry_frame(&raw.encrypt())?;
                self.last_frame = Some(raw);
                Ok(frame.record)
            }
            ScriptedPoll::Garbled => {
                let noise = [0x5Au8; TELEMETRY_FRAME_LEN];
                tc66_codec::decode_telemetry_frame(&noise).map(|f| f.record)
            }
            ScriptedPoll::Silent => Err(CollectorError::Timeout),
        }
    }

    fn source_name(&self) -> &str {
        "simulated"
    }
}

/// Hands out a fresh [`ScriptedSource`] per session.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Vec<ScriptedPoll>>>,
    refuse: bool,
}

impl ScriptedConnector {
    pub fn new(script: Vec<ScriptedPoll>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            refuse: false,
        }
    }

    /// A connector whose device never comes up.
    pub fn unreachable() -> Self {
        Self {
            script: Arc::new(Mutex::new(Vec::new())),
            refuse: true,
        }
    }

    /// Replace the script used by the next connection.
    pub fn set_script(&self, script: Vec<ScriptedPoll>) {
        match self.script.lock() {
            Ok(mut guard) => *guard = script,
            Err(poisoned) => *poisoned.into_inner() = script,
        }
    }
}

#[async_trait]
impl MeterConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn TelemetrySource>> {
        if self.refuse {
            return Err(CollectorError::DeviceConnect {
                port: self.target(),
                message: "simulated device unavailable".to_string(),
            });
        }
        let script = match self.script.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Ok(Box::new(ScriptedSource::new(script)))
    }

    fn target(&self) -> String {
        "simulated".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_decodes_through_codec() {
        let mut source = ScriptedSource::new(ScriptedSource::ramp(100, 10, 2));
        assert_eq!(source.next_record().await.unwrap().g0_mwh, 100);
        assert_eq!(source.next_record().await.unwrap().g0_mwh, 110);
        // Exhausted: repeats the last frame.
        assert_eq!(source.next_record().await.unwrap().g0_mwh, 110);
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let mut source = ScriptedSource::new([ScriptedPoll::Garbled, ScriptedPoll::Silent]);
        assert!(matches!(
            source.next_record().await,
            Err(CollectorError::FrameDecode(_))
        ));
        assert!(matches!(source.next_record().await, Err(CollectorError::Timeout)));
        // Nothing ever decoded: stays silent.
        assert!(matches!(source.next_record().await, Err(CollectorError::Timeout)));
    }

    /// Answers each `getva` with the next queued frame; writes are dropped.
    struct FrameQueue(std::io::Cursor<Vec<u8>>);

    impl std::io::Read for FrameQueue {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::io::Read::read(&mut self.0, buf)
        }
    }

    impl std::io::Write for FrameQueue {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_meter_source_discards_stale_frame_and_reports_link() {
        let mut bytes = Vec::new();
        for g0_mwh in [900, 100] {
            bytes.extend_from_slice(&RawTelemetry { g0_mwh, ..Default::default() }.encrypt());
        }
        let meter = Tc66Meter::from_transport("mock", FrameQueue(std::io::Cursor::new(bytes)));
        let mut source = MeterSource::new(meter);

        source.prime().await.unwrap();
        assert_eq!(source.next_record().await.unwrap().g0_mwh, 100);
        assert!(source.next_record().await.unwrap_err().is_io_failure());

        let stats = source.link_stats().unwrap();
        assert_eq!(stats.polls, 2);
        assert_eq!(stats.io_errors, 1);
        assert!(ScriptedSource::new(Vec::new()).link_stats().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_connector() {
        let connector = ScriptedConnector::unreachable();
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, CollectorError::DeviceConnect { .. }));
    }
}
