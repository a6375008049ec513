//! Session Integration Tests
//!
//! Drives the collector through its UDP control channel with a scripted
//! meter and checks the files a real experiment would leave behind.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tc66_collector::control::{send_control, ControlListener, ControlMessage, ListenerSettings};
use tc66_collector::pipeline::{
    AcquisitionSettings, MeterConnector, ScriptedConnector, ScriptedPoll, ScriptedSource,
    DETAIL_HEADER,
};
use tc66_collector::storage::{is_read_only, SummaryLog};
use tc66_collector::types::SUMMARY_HEADER;
use tc66_collector::{SessionPhase, SessionStateMachine};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const READY_T1: &str =
    r#"GETREADY {"experiment_id":"t1","algorithm":"NULL","iterations":100,"sample_period":0.1}"#;

struct Collector {
    dir: TempDir,
    machine: Arc<SessionStateMachine>,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    listener: tokio::task::JoinHandle<()>,
}

impl Collector {
    async fn start(connector: impl MeterConnector) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let summary = SummaryLog::open(dir.path().join("AllResults.csv")).unwrap();
        let shutdown = CancellationToken::new();
        let machine = Arc::new(SessionStateMachine::new(
            Arc::new(connector),
            summary,
            dir.path(),
            AcquisitionSettings {
                poll_timeout: Duration::from_millis(500),
                error_backoff: Duration::from_millis(10),
                progress_interval: Duration::from_secs(1),
            },
            shutdown.clone(),
        ));
        let listener = ControlListener::bind(ListenerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            recv_timeout: Duration::from_millis(50),
            max_datagram_bytes: 1024,
        })
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = tokio::spawn(listener.run(machine.clone(), shutdown.clone()));
        Self {
            dir,
            machine,
            addr,
            shutdown,
            listener,
        }
    }

    async fn send(&self, text: &str) {
        send_control(self.addr, &ControlMessage::parse(text))
            .await
            .unwrap();
    }

    async fn wait_for_phase(&self, phase: SessionPhase) {
        let mut rx = self.machine.subscribe_phase();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| *p == phase))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {phase}"))
            .unwrap();
    }

    async fn wait_for_rows(&self, rows: u64) {
        for _ in 0..500 {
            if let Some(progress) = self.machine.progress().await {
                if progress.rows >= rows {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {rows} detail rows");
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap()
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    async fn stop(self) -> TempDir {
        self.shutdown.cancel();
        self.listener.await.unwrap();
        self.machine.shutdown().await;
        self.dir
    }
}

/// Five frames 10 mWh apart, then a meter that stops answering.
fn five_step_script() -> Vec<ScriptedPoll> {
    let mut script = ScriptedSource::ramp(100, 10, 5);
    script.extend(std::iter::repeat(ScriptedPoll::Silent).take(10_000));
    script
}

fn summary_rows(log: &str) -> Vec<Vec<String>> {
    log.lines()
        .skip(1)
        .map(|l| l.split(',').map(str::to_string).collect())
        .collect()
}

#[tokio::test]
async fn full_session_over_udp_records_detail_and_summary() {
    let collector = Collector::start(ScriptedConnector::new(five_step_script())).await;

    collector.send(READY_T1).await;
    collector.wait_for_phase(SessionPhase::Ready).await;
    assert_eq!(collector.read("t1_data.csv"), format!("{DETAIL_HEADER}\n"));

    collector.send("START").await;
    collector.wait_for_phase(SessionPhase::Running).await;
    collector.wait_for_rows(5).await;

    collector.send(r#"STOP {"time_to_run":0.5}"#).await;
    collector.wait_for_phase(SessionPhase::Idle).await;

    let detail = collector.read("t1_data.csv");
    let lines: Vec<&str> = detail.lines().collect();
    assert_eq!(lines.len(), 6, "header + 5 rows:\n{detail}");
    assert!(lines[1].contains(",\"t1\",0.10,0.00,"));
    assert!(lines[5].contains(",\"t1\",0.10,144.00,"));

    let log = collector.read("AllResults.csv");
    assert!(log.starts_with(SUMMARY_HEADER));
    let rows = summary_rows(&log);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "100");
    assert_eq!(rows[0][2], "NULL");
    assert_eq!(rows[0][3], "t1");
    assert_eq!(rows[0][4], "144.00");
    assert_eq!(rows[0][6], "1440.000");
    assert!(is_read_only(&collector.path("AllResults.csv")).unwrap());

    // A replayed STOP must not add a second row.
    collector.send(r#"STOP {"time_to_run":0.5}"#).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(summary_rows(&collector.read("AllResults.csv")).len(), 1);

    collector.stop().await;
}

#[tokio::test]
async fn start_before_getready_is_ignored() {
    let collector = Collector::start(ScriptedConnector::new(five_step_script())).await;

    collector.send("START").await;
    collector.send("HELLO THERE").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(collector.machine.phase(), SessionPhase::Idle);
    assert!(collector.machine.progress().await.is_none());

    // The listener is still serving: a proper session can follow.
    collector.send(READY_T1).await;
    collector.wait_for_phase(SessionPhase::Ready).await;

    collector.stop().await;
}

#[tokio::test]
async fn unreachable_meter_keeps_collector_idle() {
    let collector = Collector::start(ScriptedConnector::unreachable()).await;

    collector.send(READY_T1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(collector.machine.phase(), SessionPhase::Idle);
    assert!(!collector.path("t1_data.csv").exists());

    collector.send("START").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(collector.machine.phase(), SessionPhase::Idle);

    collector.stop().await;
}

#[tokio::test]
async fn zero_iterations_reports_not_applicable_rates() {
    let collector = Collector::start(ScriptedConnector::new(five_step_script())).await;

    collector
        .send(r#"GETREADY {"experiment_id":"zero","algorithm":"NULL","iterations":0,"sample_period":0.1}"#)
        .await;
    collector.wait_for_phase(SessionPhase::Ready).await;
    collector.send("START").await;
    collector.wait_for_phase(SessionPhase::Running).await;
    collector.wait_for_rows(2).await;
    collector.send("STOP").await;
    collector.wait_for_phase(SessionPhase::Idle).await;

    let rows = summary_rows(&collector.read("AllResults.csv"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "0");
    assert_eq!(rows[0][6], "N/A");
    assert_eq!(rows[0][7], "N/A");

    collector.stop().await;
}

#[tokio::test]
async fn shutdown_finalizes_running_session() {
    let collector = Collector::start(ScriptedConnector::new(five_step_script())).await;

    collector.send(READY_T1).await;
    collector.wait_for_phase(SessionPhase::Ready).await;
    collector.send("START").await;
    collector.wait_for_rows(5).await;

    let dir = collector.stop().await;

    let log = std::fs::read_to_string(dir.path().join("AllResults.csv")).unwrap();
    let rows = summary_rows(&log);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][4], "144.00");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("t1_data.csv"))
            .unwrap()
            .lines()
            .count(),
        6
    );
}

#[tokio::test]
async fn new_session_truncates_reused_experiment_file() {
    let collector = Collector::start(ScriptedConnector::new(five_step_script())).await;

    for _ in 0..2 {
        collector.send(READY_T1).await;
        collector.wait_for_phase(SessionPhase::Ready).await;
        collector.send("START").await;
        collector.wait_for_rows(5).await;
        collector.send("STOP").await;
        collector.wait_for_phase(SessionPhase::Idle).await;
    }

    assert_eq!(collector.read("t1_data.csv").lines().count(), 6);
    assert_eq!(summary_rows(&collector.read("AllResults.csv")).len(), 2);
    assert!(Path::new(&collector.path("AllResults.csv")).exists());

    collector.stop().await;
}
