//! TC66C meter client over a blocking byte transport
//!
//! Serial I/O is blocking, so every exchange runs on the blocking thread
//! pool. The transport sits behind a mutex that the worker locks: a poll
//! abandoned by its caller's timeout still runs to completion on the pool
//! and leaves the port in place for the next exchange.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{CollectorError, Result};
use crate::types::{FirmwareMode, RecordingSample, TelemetryFrame};

use super::tc66_codec::{self, Command, RECORDING_ENTRY_LEN};

/// Anything the meter can be spoken to over: a serial port, or an
/// in-memory stand-in.
pub trait MeterTransport: Read + Write + Send + 'static {}

impl<T: Read + Write + Send + 'static> MeterTransport for T {}

/// Serial line settings for opening a meter.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Per-read timeout on the port
    pub read_timeout: Duration,
    /// Delay after opening before the first command
    pub settle: Duration,
}

/// Counters for meter link health.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MeterStats {
    pub polls: u64,
    pub decode_errors: u64,
    pub timeouts: u64,
    pub io_errors: u64,
}

type SharedTransport = Arc<Mutex<Box<dyn MeterTransport>>>;

/// Client for one connected TC66C.
pub struct Tc66Meter {
    port_name: String,
    transport: SharedTransport,
    stats: MeterStats,
}

impl Tc66Meter {
    /// Open the meter on a serial port (8N2, no flow control).
    pub async fn open(port_name: &str, settings: &SerialSettings) -> Result<Self> {
        tracing::info!(port = %port_name, baud = settings.baud_rate, "Opening TC66C meter");

        let name = port_name.to_string();
        let baud = settings.baud_rate;
        let timeout = settings.read_timeout;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::Two)
                .flow_control(serialport::FlowControl::None)
                .timeout(timeout)
                .open()
        })
        .await
        .map_err(|e| CollectorError::DeviceConnect {
            port: port_name.to_string(),
            message: e.to_string(),
        })?
        .map_err(|e| CollectorError::DeviceConnect {
            port: port_name.to_string(),
            message: e.to_string(),
        })?;

        tokio::time::sleep(settings.settle).await;
        tracing::info!(port = %port_name, "TC66C meter connected");

        Ok(Self::from_transport(port_name, port))
    }

    /// Wrap an already-open transport.
    pub fn from_transport<T: MeterTransport>(port_name: &str, transport: T) -> Self {
        let transport: Box<dyn MeterTransport> = Box::new(transport);
        Self {
            port_name: port_name.to_string(),
            transport: Arc::new(Mutex::new(transport)),
            stats: MeterStats::default(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn stats(&self) -> MeterStats {
        self.stats
    }

    /// Send a command and collect its response on the blocking pool.
    ///
    /// An exchange still running from a dropped poll holds the lock, so the
    /// next one waits for it instead of interleaving on the wire.
    async fn exchange(&mut self, command: Command) -> Result<Vec<u8>> {
        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = transport.lock().unwrap_or_else(PoisonError::into_inner);
            exchange_blocking(&mut **guard, command)
        })
        .await
        .unwrap_or_else(|e| Err(CollectorError::DeviceIo(std::io::Error::other(e.to_string()))));

        if let Err(ref e) = result {
            match e {
                CollectorError::Timeout => self.stats.timeouts += 1,
                _ => self.stats.io_errors += 1,
            }
        }
        result
    }

    /// Poll instantaneous and cumulative values (`getva`).
    pub async fn poll(&mut self) -> Result<TelemetryFrame> {
        let bytes = self.exchange(Command::GetValues).await?;
        self.stats.polls += 1;
        tc66_codec::decode_telemetry_frame(&bytes).inspect_err(|_| {
            self.stats.decode_errors += 1;
        })
    }

    /// Ask whether the meter runs firmware or its bootloader (`query`).
    pub async fn query(&mut self) -> Result<FirmwareMode> {
        let bytes = self.exchange(Command::Query).await?;
        tc66_codec::decode_query_response(&bytes)
    }

    /// Dump the meter's recording buffer (`gtrec`).
    pub async fn recording(&mut self) -> Result<Vec<RecordingSample>> {
        let bytes = self.exchange(Command::GetRecording).await?;
        Ok(tc66_codec::decode_recording(&bytes))
    }
}

fn map_io(e: std::io::Error) -> CollectorError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => CollectorError::Timeout,
        _ => CollectorError::DeviceIo(e),
    }
}

fn exchange_blocking(transport: &mut dyn MeterTransport, command: Command) -> Result<Vec<u8>> {
    transport.write_all(command.as_bytes()).map_err(map_io)?;
    transport.flush().map_err(map_io)?;

    match command.response_len() {
        Some(0) => Ok(Vec::new()),
        Some(len) => {
            let mut buf = vec![0u8; len];
            transport.read_exact(&mut buf).map_err(map_io)?;
            Ok(buf)
        }
        None => {
            // Recording dump: read entries until the port goes quiet.
            let mut out = Vec::new();
            let mut chunk = [0u8; RECORDING_ENTRY_LEN];
            loop {
                match transport.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&chunk[..n]),
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(CollectorError::DeviceIo(e)),
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::tc66_codec::RawTelemetry;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// In-memory meter: records what was written, replays a canned response.
    struct ScriptedTransport {
        written: Arc<Mutex<Vec<u8>>>,
        response: Cursor<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(response: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    written: Arc::clone(&written),
                    response: Cursor::new(response),
                },
                written,
            )
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_poll_sends_getva_and_decodes() {
        let raw = RawTelemetry {
            volt: 50_000,
            g1_mwh: 321,
            ..Default::default()
        };
        let (transport, written) = ScriptedTransport::new(raw.encrypt().to_vec());
        let mut meter = Tc66Meter::from_transport("mock", transport);

        let frame = meter.poll().await.unwrap();
        assert_eq!(frame.record.volt, 5.0);
        assert_eq!(frame.record.g1_mwh, 321);
        assert_eq!(written.lock().unwrap().as_slice(), b"getva");
        assert_eq!(meter.stats().polls, 1);
    }

    #[tokio::test]
    async fn test_short_response_is_io_failure() {
        let (transport, _) = ScriptedTransport::new(vec![0u8; 100]);
        let mut meter = Tc66Meter::from_transport("mock", transport);

        let err = meter.poll().await.unwrap_err();
        assert!(err.is_io_failure(), "got {err:?}");
        assert_eq!(meter.stats().io_errors, 1);
    }

    #[tokio::test]
    async fn test_corrupt_frame_counts_decode_error() {
        let (transport, _) = ScriptedTransport::new(vec![0xAAu8; 192]);
        let mut meter = Tc66Meter::from_transport("mock", transport);

        let err = meter.poll().await.unwrap_err();
        assert!(matches!(err, CollectorError::FrameDecode(_)));
        assert_eq!(meter.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_recording_reads_until_exhausted() {
        let mut bytes = Vec::new();
        for i in 0..3u32 {
            bytes.extend_from_slice(&(50_000 + i).to_le_bytes());
            bytes.extend_from_slice(&(1_000 + i).to_le_bytes());
        }
        let (transport, written) = ScriptedTransport::new(bytes);
        let mut meter = Tc66Meter::from_transport("mock", transport);

        let samples = meter.recording().await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].volt, 50_002.0 * 1e-4);
        assert_eq!(written.lock().unwrap().as_slice(), b"gtrec");
    }

    /// Answers every read, but sleeps through the first one.
    struct StallingTransport {
        stall: Option<Duration>,
        response: Cursor<Vec<u8>>,
    }

    impl Read for StallingTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(delay) = self.stall.take() {
                std::thread::sleep(delay);
            }
            self.response.read(buf)
        }
    }

    impl Write for StallingTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_poll_after_abandoned_exchange_still_reaches_meter() {
        let first = RawTelemetry {
            g0_mwh: 100,
            ..Default::default()
        };
        let second = RawTelemetry {
            g0_mwh: 110,
            ..Default::default()
        };
        let mut bytes = first.encrypt().to_vec();
        bytes.extend_from_slice(&second.encrypt());
        let transport = StallingTransport {
            stall: Some(Duration::from_millis(300)),
            response: Cursor::new(bytes),
        };
        let mut meter = Tc66Meter::from_transport("mock", transport);

        let abandoned = tokio::time::timeout(Duration::from_millis(100), meter.poll()).await;
        assert!(abandoned.is_err(), "first poll should outlive its timeout");

        // The stalled read finishes in the background and consumes its own frame.
        let frame = meter.poll().await.unwrap();
        assert_eq!(frame.record.g0_mwh, 110);

        // Both frames used up: the link is still there, it just reads short.
        let err = meter.poll().await.unwrap_err();
        assert!(err.is_io_failure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_query_firmware_mode() {
        let (transport, _) = ScriptedTransport::new(b"firm".to_vec());
        let mut meter = Tc66Meter::from_transport("mock", transport);
        assert_eq!(meter.query().await.unwrap(), FirmwareMode::Firmware);
    }
}
