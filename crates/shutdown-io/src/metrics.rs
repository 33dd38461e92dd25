//! Prometheus metrics for the shutdown rig simulator.

use shutdown_core::{tags, PowerReport, ShutdownResolution, SimulationPhase};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
}

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// ============================================================================
// Lifecycle Metrics
// ============================================================================

pub static RUNS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter("shutdown_rig_runs_started_total", "Simulation runs started")
});

pub static SHUTDOWNS_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter("shutdown_rig_shutdowns_issued_total", "Shutdown commands accepted")
});

pub static SHUTDOWNS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "shutdown_rig_shutdowns_completed_total",
        "Shutdowns that reached the target output",
    )
});

pub static SHUTDOWNS_PASSED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "shutdown_rig_shutdowns_passed_total",
        "Completed shutdowns under the latency threshold",
    )
});

pub static EMERGENCY_STOPS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter("shutdown_rig_emergency_stops_total", "Emergency stops")
});

pub static RESETS: LazyLock<IntCounter> =
    LazyLock::new(|| counter("shutdown_rig_resets_total", "Simulation resets"));

pub static ILLEGAL_TRANSITIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "shutdown_rig_illegal_transitions_total",
        "Commands rejected by the state machine",
    )
});

/// Shutdown latency distribution in milliseconds
pub static SHUTDOWN_LATENCY_MS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            tags::SHUTDOWN_LATENCY_MS.metric,
            "Shutdown latency distribution in milliseconds",
        )
        .buckets(vec![45.0, 47.0, 49.0, 50.0, 51.0, 53.0, 55.0]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub static POWER_LOSS_W: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        tags::POWER_LOSS_W.metric,
        "Power dissipated during the last shutdown transition",
    )
});

// ============================================================================
// Power Metrics
// ============================================================================

pub static INPUT_POWER_W: LazyLock<Gauge> =
    LazyLock::new(|| gauge(tags::INPUT_POWER_W.metric, "Input power of the last session update"));

pub static OUTPUT_POWER_W: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(tags::OUTPUT_POWER_W.metric, "Output power of the last session update")
});

pub static EFFICIENCY_PERCENT: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(tags::EFFICIENCY_PERCENT.metric, "Output over input power in percent")
});

/// Phase code (0=idle,1=running,2=shutting down,3=complete,4=emergency stopped)
pub static PHASE: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        tags::PHASE.metric,
        "Phase of the last updated session (0=idle,1=running,2=shutting_down,3=shutdown_complete,4=emergency_stopped)",
    )
});

// ============================================================================
// Persistence & Session Metrics
// ============================================================================

pub static PERSISTENCE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "shutdown_rig_persistence_failures_total",
        "Shutdown records the store did not accept",
    )
});

pub static ACTIVE_SESSIONS: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "shutdown_rig_active_sessions",
        "Simulation sessions currently open",
    )
});

pub fn observe_status(phase: SimulationPhase, power: &PowerReport) {
    PHASE.set(phase.code() as f64);
    INPUT_POWER_W.set(power.input_power_w);
    OUTPUT_POWER_W.set(power.output_power_w);
    EFFICIENCY_PERCENT.set(power.efficiency_percent);
}

pub fn observe_resolution(resolution: &ShutdownResolution) {
    SHUTDOWNS_COMPLETED.inc();
    if resolution.passed {
        SHUTDOWNS_PASSED.inc();
    }
    SHUTDOWN_LATENCY_MS.observe(resolution.shutdown_latency_ms);
    POWER_LOSS_W.set(resolution.power_loss_w);
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = REGISTRY.gather();
                    let mut buffer = Vec::new();

                    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = RUNS_STARTED.get();
    let _ = SHUTDOWNS_ISSUED.get();
    let _ = SHUTDOWNS_COMPLETED.get();
    let _ = SHUTDOWNS_PASSED.get();
    let _ = EMERGENCY_STOPS.get();
    let _ = RESETS.get();
    let _ = ILLEGAL_TRANSITIONS.get();
    let _ = SHUTDOWN_LATENCY_MS.get_sample_count();
    let _ = POWER_LOSS_W.get();
    let _ = INPUT_POWER_W.get();
    let _ = OUTPUT_POWER_W.get();
    let _ = EFFICIENCY_PERCENT.get();
    let _ = PHASE.get();
    let _ = PERSISTENCE_FAILURES.get();
    let _ = ACTIVE_SESSIONS.get();
}
