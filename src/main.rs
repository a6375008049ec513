//! TC66 Collector - energy measurement server
//!
//! Listens for `GETREADY` / `START` / `STOP` control datagrams from the
//! device under test and records TC66C meter readings for each session.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port with the meter on the configured serial port
//! tc66-collector --com /dev/ttyACM0
//!
//! # Bench run without a control channel: start after 5 s, record for 60 s
//! tc66-collector --nonet-delaystart 5 --nonet-duration 60
//!
//! # No meter attached: replay a synthetic charge ramp
//! tc66-collector --simulate
//! ```
//!
//! # Environment Variables
//!
//! - `TC66_COLLECTOR_CONFIG`: Path to a TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tc66_collector::acquisition::{ports, Tc66Meter};
use tc66_collector::config::{self, CollectorConfig};
use tc66_collector::control::ControlListener;
use tc66_collector::pipeline::{MeterConnector, ScriptedConnector, ScriptedSource, SerialConnector};
use tc66_collector::session::{run_no_network, NoNetworkPlan, SessionStateMachine};
use tc66_collector::storage::{ProcessLock, SummaryLog};

/// Polls in the synthetic ramp used by `--simulate`.
const SIMULATED_POLLS: usize = 36_000;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tc66-collector")]
#[command(about = "TC66C energy collector driven by a UDP control channel")]
#[command(version)]
struct CliArgs {
    /// Serial port of the meter (overrides [device].port)
    #[arg(long, value_name = "PORT")]
    com: Option<String>,

    /// Control channel address (overrides [control].bind_addr)
    #[arg(long, value_name = "IP:PORT")]
    bind: Option<String>,

    /// Directory for detail files and the summary log
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// No-network mode: seconds to wait after GETREADY before START
    #[arg(long, value_name = "SECONDS")]
    nonet_delaystart: Option<f64>,

    /// No-network mode: seconds to record before STOP
    #[arg(long, value_name = "SECONDS")]
    nonet_duration: Option<f64>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print the meter's firmware mode and identity, then exit
    #[arg(long)]
    meter_info: bool,

    /// Download the meter's buffered recording to a CSV file, then exit
    #[arg(long, value_name = "FILE")]
    dump_recording: Option<PathBuf>,

    /// Use a synthetic meter instead of the serial port
    #[arg(long)]
    simulate: bool,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    ControlListener,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::ControlListener => write!(f, "ControlListener"),
        }
    }
}

fn spawn_control_listener(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: ControlListener,
    machine: Arc<SessionStateMachine>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[ControlListener] Task starting");
        listener.run(machine, cancel_token).await;
        Ok(TaskName::ControlListener)
    });
}

/// Monitor tasks until shutdown; a failed task cancels the rest.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: monitoring tasks");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// One-shot meter commands
// ============================================================================

fn print_ports() {
    let found = ports::available_ports();
    if found.is_empty() {
        println!("No serial ports found.");
        return;
    }
    println!("Available serial ports:");
    for (i, port) in found.iter().enumerate() {
        println!("  {}: {} - {}", i + 1, port.name, port.description);
    }
}

async fn print_meter_info(config: &CollectorConfig) -> Result<()> {
    let mut meter = Tc66Meter::open(&config.device.port, &config.serial_settings()).await?;
    let mode = meter.query().await.context("Meter did not answer query")?;
    let frame = meter.poll().await.context("Meter did not answer getva")?;

    println!("Port:     {}", meter.port_name());
    println!("Mode:     {:?}", mode);
    println!("Name:     {}", frame.identity.name);
    println!("Version:  {}", frame.identity.version);
    println!("Serial:   {}", frame.identity.serial_number);
    println!("Runs:     {}", frame.identity.runs);
    println!(
        "Reading:  {:.4} V  {:.5} A  {:.4} W  {} mWh",
        frame.record.volt,
        frame.record.current,
        frame.record.power,
        frame.record.combined_charge_mwh()
    );
    Ok(())
}

async fn dump_recording(config: &CollectorConfig, path: &Path) -> Result<()> {
    let mut meter = Tc66Meter::open(&config.device.port, &config.serial_settings()).await?;
    let samples = meter.recording().await.context("Failed to read meter recording")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "Index,Volt,Current")?;
    for (i, sample) in samples.iter().enumerate() {
        writeln!(writer, "{},{:.4},{:.5}", i, sample.volt, sample.current)?;
    }
    writer.flush()?;

    info!(samples = samples.len(), path = %path.display(), "Recording saved");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    if args.list_ports {
        print_ports();
        return Ok(());
    }

    let mut collector_config = CollectorConfig::load();
    collector_config.device.port =
        ports::select_port(args.com.as_deref(), &collector_config.device.port);
    if let Some(bind) = args.bind {
        collector_config.control.bind_addr = bind;
    }
    if let Some(dir) = args.data_dir {
        collector_config.output.data_dir = dir;
    }
    collector_config
        .validate()
        .context("Invalid configuration after command-line overrides")?;
    config::init(collector_config);
    let cfg = config::get();

    if args.meter_info {
        return print_meter_info(cfg).await;
    }
    if let Some(path) = args.dump_recording {
        return dump_recording(cfg, &path).await;
    }

    let plan = NoNetworkPlan::from_args(args.nonet_delaystart, args.nonet_duration)
        .map_err(anyhow::Error::msg)?;

    info!("TC66 Collector starting");
    info!("  Output: {}", cfg.output.data_dir.display());
    info!("  Summary log: {}", cfg.summary_path().display());

    let _lock = ProcessLock::acquire(&cfg.output.data_dir)?;
    let summary_log = SummaryLog::open(cfg.summary_path())?;

    let connector: Arc<dyn MeterConnector> = if args.simulate {
        info!("  Meter: simulated");
        Arc::new(ScriptedConnector::new(ScriptedSource::ramp(0, 1, SIMULATED_POLLS)))
    } else {
        info!("  Meter: {}", cfg.device.port);
        Arc::new(SerialConnector::new(
            cfg.device.port.clone(),
            cfg.serial_settings(),
        ))
    };

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down");
        shutdown_token.cancel();
    });

    let machine = Arc::new(SessionStateMachine::new(
        connector,
        summary_log,
        cfg.output.data_dir.clone(),
        cfg.acquisition_settings(),
        cancel_token.clone(),
    ));

    if let Some(plan) = plan {
        run_no_network(&machine, &plan, &cancel_token).await;
        return Ok(());
    }

    let listener = ControlListener::bind(cfg.listener_settings()?)
        .context("Failed to bind control channel")?;

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_control_listener(&mut task_set, listener, machine.clone(), cancel_token.clone());
    info!("Waiting for GETREADY (Ctrl+C to exit)");

    let result = run_supervisor(&mut task_set, cancel_token.clone()).await;

    cancel_token.cancel();
    while let Some(joined) = task_set.join_next().await {
        if let Err(e) = joined {
            warn!("Task ended abnormally during shutdown: {}", e);
        }
    }

    if let Some(outcome) = machine.shutdown().await {
        info!(
            experiment_id = %outcome.params.experiment_id,
            rows = outcome.report.rows_written,
            "Active session finalized at shutdown"
        );
    }

    info!("Collector stopped");
    result
}
