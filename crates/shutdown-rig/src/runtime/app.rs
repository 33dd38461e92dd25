use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use shutdown_core::{
    EngineConfig, ParameterViolation, PersistenceFailure, RunStatus, SeededNoise,
    ShutdownResolution, SimulationEngine, SimulationRecord,
};
use shutdown_io::bridge::{run_bridge, BridgeConfig};
use shutdown_io::session::{SessionConfig, SessionError, SessionEvent, SimulationSession};
use shutdown_io::sink::{LogSink, PersistenceSink};
use shutdown_io::store::JsonlRecordStore;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid simulation parameters: {0}")]
    InvalidParameters(#[from] ParameterViolation),
    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to bind bridge on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open record store {}: {source}", path.display())]
    RecordStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scenario session failed: {0}")]
    Session(#[from] SessionError),
    #[error("scenario ended before the shutdown resolved")]
    ScenarioIncomplete,
}

#[derive(Clone)]
enum RigSink {
    Jsonl(JsonlRecordStore),
    Log(LogSink),
}

impl PersistenceSink for RigSink {
    async fn persist(&self, record: SimulationRecord) -> Result<(), PersistenceFailure> {
        match self {
            Self::Jsonl(store) => store.persist(record).await,
            Self::Log(sink) => sink.persist(record).await,
        }
    }
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "shutdown-rig failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    if let Some(rejected) = config.rejected.first() {
        return Err(AppError::InvalidArgument(rejected.clone()));
    }
    config.params.validate()?;

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let sink = open_sink(config.record_store.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    if config.scenario {
        let report = runtime.block_on(run_scenario(&config, sink))?;
        print!("{report}");
        Ok(())
    } else {
        runtime.block_on(run_bridge_mode(&config, sink))
    }
}

fn open_sink(path: Option<&Path>) -> Result<RigSink, AppError> {
    match path {
        Some(path) => {
            let store = JsonlRecordStore::open(path).map_err(|source| AppError::RecordStore {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), "Recording shutdowns to JSONL store");
            Ok(RigSink::Jsonl(store))
        }
        None => {
            info!("No record store configured; shutdown records go to the log");
            Ok(RigSink::Log(LogSink))
        }
    }
}

fn engine_config(config: &RuntimeConfig) -> EngineConfig {
    EngineConfig {
        shutdown_delay: config.shutdown_delay(),
        ..EngineConfig::default()
    }
}

fn session_config(config: &RuntimeConfig) -> SessionConfig {
    SessionConfig {
        persist_timeout: config.persist_timeout(),
        ..SessionConfig::default()
    }
}

async fn run_bridge_mode(config: &RuntimeConfig, sink: RigSink) -> Result<(), AppError> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;

    let bridge_config = BridgeConfig {
        engine: engine_config(config),
        session: session_config(config),
        seed: config.seed,
    };
    info!(
        addr = %config.bind_addr,
        shutdown_delay_ms = config.shutdown_delay_ms,
        persist_timeout_ms = config.persist_timeout_ms,
        "Shutdown rig running. Connect a control client to drive simulations."
    );

    let run_seconds = config.run_seconds;
    let stop = async move {
        match run_seconds {
            Some(seconds) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                        info!(seconds, "Run duration elapsed");
                    }
                    _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                }
            }
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Ctrl-C handler unavailable; serving until killed");
                    std::future::pending::<()>().await;
                }
                info!("Interrupted");
            }
        }
    };

    run_bridge(listener, bridge_config, sink, stop).await;
    Ok(())
}

/// Drives start, shutdown, resolution and persistence once and renders the
/// outcome for the terminal.
async fn run_scenario<S: PersistenceSink>(
    config: &RuntimeConfig,
    sink: S,
) -> Result<String, AppError> {
    let noise = match config.seed {
        Some(seed) => SeededNoise::from_seed(seed),
        None => SeededNoise::from_entropy(),
    };
    let engine = SimulationEngine::new(engine_config(config), noise);
    let (handle, mut events, task) =
        SimulationSession::spawn(engine, sink, session_config(config));

    handle.start(Some(config.params)).await?;
    handle.shutdown().await?;
    info!(delay_ms = config.shutdown_delay_ms, "Scenario shutdown issued");

    let mut resolution = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ShutdownResolved { resolution: r, .. } => resolution = Some(r),
            SessionEvent::Persisted { .. } | SessionEvent::PersistFailed { .. } => break,
        }
    }
    let resolution = resolution.ok_or(AppError::ScenarioIncomplete)?;
    let status = handle.status().await?;

    drop(handle);
    let _ = task.await;
    Ok(render_report(&status, &resolution))
}

fn render_report(status: &RunStatus, resolution: &ShutdownResolution) -> String {
    let mut out = String::new();
    let params = &status.params;
    let _ = writeln!(out, "Run {} ({})", status.run_id, status.phase);
    let _ = writeln!(
        out,
        "  input           {} V / {} A, {} °C, {} W/m²",
        params.input_voltage, params.input_current, params.temperature, params.light_intensity
    );
    let _ = writeln!(
        out,
        "  output          {} V / {} A",
        status.output_voltage, status.output_current
    );
    let _ = writeln!(
        out,
        "  response time   {:.1} ms",
        resolution.shutdown_latency_ms
    );
    let _ = writeln!(out, "  power loss      {:.2} W", resolution.power_loss_w);
    let _ = writeln!(
        out,
        "  power           {:.1} W in, {:.1} W out, {:.2} % efficiency",
        status.power.input_power_w, status.power.output_power_w, status.power.efficiency_percent
    );
    let _ = writeln!(
        out,
        "  verdict         {}",
        if resolution.passed { "PASS" } else { "FAIL" }
    );
    let _ = writeln!(out, "Log:");
    for line in status.log.iter().rev() {
        let _ = writeln!(out, "  {line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shutdown_core::SimulationParameters;
    use tempfile::tempdir;

    fn scenario_config(store: &Path) -> RuntimeConfig {
        RuntimeConfig {
            scenario: true,
            shutdown_delay_ms: 10,
            seed: Some(3),
            record_store: Some(store.to_path_buf()),
            params: SimulationParameters::new(750.0, 12.0, 30.0, 900.0),
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn scenario_persists_one_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdowns.jsonl");
        let config = scenario_config(&path);

        let sink = open_sink(config.record_store.as_deref()).unwrap();
        let report = run_scenario(&config, sink).await.unwrap();

        let stored = JsonlRecordStore::load(&path).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.input_voltage, 750.0);
        assert_eq!(stored[0].record.output_voltage, 45.0);
        let latency = stored[0].record.shutdown_latency_ms;
        assert!((45.0..55.0).contains(&latency));

        assert!(report.contains("750 V / 12 A"));
        assert!(report.contains("Shutdown complete"));
        assert!(report.contains("Simulation result saved"));
    }

    #[tokio::test]
    async fn scenario_lists_log_oldest_first() {
        let dir = tempdir().unwrap();
        let config = scenario_config(&dir.path().join("r.jsonl"));
        let report = run_scenario(&config, LogSink).await.unwrap();

        let started = report.find("Simulation started").unwrap();
        let issued = report.find("Shutdown command issued").unwrap();
        let complete = report.find("Shutdown complete").unwrap();
        assert!(started < issued && issued < complete);
    }

    #[test]
    fn out_of_range_parameters_fail_before_startup() {
        let config = RuntimeConfig {
            params: SimulationParameters::new(1200.0, 10.0, 25.0, 800.0),
            ..RuntimeConfig::default()
        };
        let err = run(config).unwrap_err();
        assert!(matches!(err, AppError::InvalidParameters(_)));
    }

    #[test]
    fn unparseable_delay_fails_before_startup() {
        let config = RuntimeConfig::from_args(&[
            "shutdown-rig".to_string(),
            "--scenario".to_string(),
            "--shutdown-delay-ms".to_string(),
            "1s".to_string(),
        ]);
        let err = run(config).unwrap_err();
        assert!(
            matches!(err, AppError::InvalidArgument(ref arg) if arg == "--shutdown-delay-ms 1s")
        );
    }

    #[test]
    fn unwritable_store_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = open_sink(Some(&blocker.join("records.jsonl"))).err().unwrap();
        assert!(matches!(err, AppError::RecordStore { .. }));
    }
}
