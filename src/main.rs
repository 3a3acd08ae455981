//! ivctl: Main Entry Point
//!
//! Wires the adapters to the control service and runs one session until
//! Ctrl-C or `--duration-secs` elapses.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedTelemetry   LoggingPump    SessionSinks              │
//! │  (TelemetrySource)    (PumpPort)     (CSV · JSONL · console)   │
//! │                                      SnapshotHandle ──▶ HTTP   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            ControlService (pure logic)                 │    │
//! │  │  Estimator · Controller · Safety                       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ControlLoop (absolute-deadline thread, cooperative stop)      │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use ivctl::adapters::http::ObservabilityServer;
use ivctl::adapters::pump::LoggingPump;
use ivctl::adapters::session::{SessionSinks, generate_session_id};
use ivctl::adapters::simulation::SimulatedTelemetry;
use ivctl::app::ports::LoopPorts;
use ivctl::app::service::ControlService;
use ivctl::config::SystemConfig;
use ivctl::scheduler::ControlLoop;
use ivctl::snapshot::SnapshotHandle;

#[derive(Debug, Parser)]
#[command(name = "ivctl", version, about = "Closed-loop adaptive IV infusion controller")]
struct Cli {
    /// JSON configuration file; defaults apply to anything it omits.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Override `logging.log_dir`.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Override `logging.session_id`.
    #[arg(long)]
    session_id: Option<String>,

    /// Disable the observability HTTP server.
    #[arg(long)]
    no_http: bool,

    /// Override `http.port`.
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> Result<SystemConfig> {
    let mut config = match &cli.config {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(dir) = &cli.log_dir {
        config.logging.log_dir.clone_from(dir);
    }
    if let Some(id) = &cli.session_id {
        config.logging.session_id = Some(id.clone());
    }
    if cli.no_http {
        config.http.enabled = false;
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Block until Ctrl-C or the optional deadline.
fn wait_for_stop(duration: Option<Duration>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime.block_on(async {
        match duration {
            Some(d) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl-C")?,
                    () = tokio::time::sleep(d) => info!("Session duration of {}s reached", d.as_secs()),
                }
            }
            None => tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?,
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let session_id = config
        .logging
        .session_id
        .clone()
        .unwrap_or_else(generate_session_id);

    info!("=== ivctl v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Patient: {:.1} kg, {:.0} y, baseline HR {:.0}, max rate {:.2} ml/min",
        config.profile.weight_kg,
        config.profile.age_years,
        config.profile.baseline_hr_bpm,
        config.profile.max_safe_infusion_rate
    );

    let snapshot = SnapshotHandle::new(config.clone());

    // Log sinks must open before anything runs.
    let sinks = SessionSinks::open(&config.logging, &session_id, Some(snapshot.clone()))
        .context("opening session logs")?;

    let server = if config.http.enabled {
        let addr = config.http.socket_addr()?;
        Some(ObservabilityServer::start(addr, snapshot.clone()).context("starting HTTP server")?)
    } else {
        info!("Observability API disabled");
        None
    };

    let ports = LoopPorts {
        source: SimulatedTelemetry::new(config.profile.baseline_hr_bpm),
        pump: LoggingPump::new(),
        sink: sinks,
    };
    let service = ControlService::new(config, session_id);
    let control = ControlLoop::spawn(service, ports, Arc::new(AtomicBool::new(false)))?;

    if let Err(e) = wait_for_stop(cli.duration_secs.map(Duration::from_secs)) {
        warn!("Stop signal handling failed ({e:#}); shutting down");
    }

    info!("Shutting down control loop");
    let summary = control.shutdown()?;
    if let Some(server) = server {
        server.shutdown();
    }

    info!(
        "Session complete: {} ticks over {:.1}s, {:.2} ml delivered, final rate {:.2} ml/min, {} overruns",
        summary.ticks,
        summary.elapsed_ms as f64 / 1000.0,
        summary.cumulative_volume_ml,
        summary.final_rate_ml_min,
        summary.overruns
    );
    Ok(())
}
