//! Per-caller session driver.
//!
//! A session task is the sole owner of one [`SimulationEngine`]. It waits on
//! three things at once: operator commands, the engine's pending shutdown
//! deadline, and persistence outcomes. The deadline arm is rebuilt from the
//! engine on every loop turn, so a reset or emergency stop that clears the
//! pending resolution also removes the timer.

use crate::metrics;
use crate::sink::PersistenceSink;
use futures::future::OptionFuture;
use serde::Serialize;
use shutdown_core::waveform::{TRANSITION_END, TRANSITION_START};
use shutdown_core::{
    IllegalTransition, NoiseSource, PersistenceFailure, RunStatus, ShutdownResolution,
    SimulationEngine, SimulationParameters, SimulationPhase, WaveformSample,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on a single persistence attempt.
    pub persist_timeout: Duration,
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_timeout: Duration::from_secs(5),
            command_buffer: 32,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("simulation session is closed")]
    Closed,
    #[error(transparent)]
    Rejected(#[from] IllegalTransition),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ShutdownResolved {
        resolution: ShutdownResolution,
        status: RunStatus,
    },
    Persisted {
        run_id: u64,
    },
    PersistFailed {
        run_id: u64,
        error: PersistenceFailure,
    },
}

/// One rendering of the waveform plus the segment boundaries overlays need.
#[derive(Debug, Clone, Serialize)]
pub struct WaveformSnapshot {
    pub phase: SimulationPhase,
    pub samples: Vec<WaveformSample>,
    pub transition_start: Option<usize>,
    pub transition_end: Option<usize>,
    pub shutdown_progress: Option<f64>,
}

enum Command {
    Start {
        params: Option<SimulationParameters>,
        reply: oneshot::Sender<RunStatus>,
    },
    SetParameters {
        params: SimulationParameters,
        reply: oneshot::Sender<RunStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<RunStatus, IllegalTransition>>,
    },
    EmergencyStop {
        reply: oneshot::Sender<RunStatus>,
    },
    Reset {
        reply: oneshot::Sender<RunStatus>,
    },
    Status {
        reply: oneshot::Sender<RunStatus>,
    },
    Waveform {
        reply: oneshot::Sender<WaveformSnapshot>,
    },
}

struct PersistOutcome {
    run_id: u64,
    outcome: Result<(), PersistenceFailure>,
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Starts a run with `params`, or with the staged parameters when `None`.
    pub async fn start(
        &self,
        params: Option<SimulationParameters>,
    ) -> Result<RunStatus, SessionError> {
        self.request(|reply| Command::Start { params, reply }).await
    }

    pub async fn set_parameters(
        &self,
        params: SimulationParameters,
    ) -> Result<RunStatus, SessionError> {
        self.request(|reply| Command::SetParameters { params, reply })
            .await
    }

    pub async fn shutdown(&self) -> Result<RunStatus, SessionError> {
        Ok(self.request(|reply| Command::Shutdown { reply }).await??)
    }

    pub async fn emergency_stop(&self) -> Result<RunStatus, SessionError> {
        self.request(|reply| Command::EmergencyStop { reply }).await
    }

    pub async fn reset(&self) -> Result<RunStatus, SessionError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn status(&self) -> Result<RunStatus, SessionError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn waveform(&self) -> Result<WaveformSnapshot, SessionError> {
        self.request(|reply| Command::Waveform { reply }).await
    }
}

pub struct SimulationSession<N: NoiseSource, S: PersistenceSink> {
    engine: SimulationEngine<N>,
    sink: Arc<S>,
    config: SessionConfig,
    epoch: Instant,
    events: mpsc::UnboundedSender<SessionEvent>,
    outcomes: mpsc::UnboundedSender<PersistOutcome>,
}

impl<N, S> SimulationSession<N, S>
where
    N: NoiseSource + 'static,
    S: PersistenceSink,
{
    /// Moves `engine` into a new task. The task ends once every
    /// [`SessionHandle`] has been dropped.
    pub fn spawn(
        engine: SimulationEngine<N>,
        sink: S,
        config: SessionConfig,
    ) -> (
        SessionHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
        JoinHandle<()>,
    ) {
        let (tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let session = Self {
            engine,
            sink: Arc::new(sink),
            config,
            epoch: Instant::now(),
            events,
            outcomes,
        };
        let task = tokio::spawn(session.run(commands, outcomes_rx));
        (SessionHandle { tx }, events_rx, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<PersistOutcome>,
    ) {
        metrics::ACTIVE_SESSIONS.inc();
        debug!("Simulation session opened");

        loop {
            let timer: OptionFuture<_> = self
                .engine
                .pending_deadline_us()
                .map(|due_us| sleep_until(self.instant_at(due_us)))
                .into();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(()) = timer => self.fire_due(),
                Some(outcome) = outcomes.recv() => self.apply_outcome(outcome),
            }
        }

        metrics::ACTIVE_SESSIONS.dec();
        debug!(run_id = self.engine.run().run_id, "Simulation session closed");
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn instant_at(&self, us: u64) -> Instant {
        self.epoch + Duration::from_micros(us)
    }

    fn status(&self) -> RunStatus {
        let status = self.engine.status(self.now_us());
        metrics::observe_status(status.phase, &status.power);
        status
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { params, reply } => {
                let params = params.unwrap_or(self.engine.staged_parameters());
                self.engine.start(params);
                metrics::RUNS_STARTED.inc();
                info!(
                    run_id = self.engine.run().run_id,
                    input_voltage = params.input_voltage,
                    input_current = params.input_current,
                    "Simulation started"
                );
                let _ = reply.send(self.status());
            }
            Command::SetParameters { params, reply } => {
                self.engine.set_parameters(params);
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                let result = match self.engine.issue_shutdown(self.now_us()) {
                    Ok(()) => {
                        metrics::SHUTDOWNS_ISSUED.inc();
                        Ok(self.status())
                    }
                    Err(err) => {
                        metrics::ILLEGAL_TRANSITIONS.inc();
                        warn!(phase = %err.phase, "Shutdown rejected");
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            Command::EmergencyStop { reply } => {
                self.engine.emergency_stop();
                metrics::EMERGENCY_STOPS.inc();
                warn!(run_id = self.engine.run().run_id, "Emergency stop");
                let _ = reply.send(self.status());
            }
            Command::Reset { reply } => {
                self.engine.reset();
                metrics::RESETS.inc();
                let _ = reply.send(self.status());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Waveform { reply } => {
                let now_us = self.now_us();
                let phase = self.engine.phase();
                let shutdown_view = phase.is_shutdown_view();
                let snapshot = WaveformSnapshot {
                    phase,
                    samples: self.engine.current_waveform(),
                    transition_start: shutdown_view.then_some(TRANSITION_START),
                    transition_end: shutdown_view.then_some(TRANSITION_END),
                    shutdown_progress: self.engine.shutdown_progress(now_us),
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    fn fire_due(&mut self) {
        let Some(resolution) = self.engine.poll(self.now_us()) else {
            return;
        };
        metrics::observe_resolution(&resolution);
        info!(
            run_id = resolution.run_id,
            latency_ms = resolution.shutdown_latency_ms,
            power_loss_w = resolution.power_loss_w,
            passed = resolution.passed,
            "Shutdown resolved"
        );

        self.spawn_persist(&resolution);
        let _ = self.events.send(SessionEvent::ShutdownResolved {
            resolution,
            status: self.status(),
        });
    }

    /// Fire-and-forget: the session keeps serving commands while the sink works.
    fn spawn_persist(&self, resolution: &ShutdownResolution) {
        let sink = Arc::clone(&self.sink);
        let outcomes = self.outcomes.clone();
        let timeout = self.config.persist_timeout;
        let run_id = resolution.run_id;
        let record = resolution.record;

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, sink.persist(record)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PersistenceFailure::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = outcomes.send(PersistOutcome { run_id, outcome });
        });
    }

    fn apply_outcome(&mut self, PersistOutcome { run_id, outcome }: PersistOutcome) {
        let event = match &outcome {
            Ok(()) => SessionEvent::Persisted { run_id },
            Err(error) => {
                metrics::PERSISTENCE_FAILURES.inc();
                warn!(run_id, error = %error, "Simulation record not persisted");
                SessionEvent::PersistFailed {
                    run_id,
                    error: error.clone(),
                }
            }
        };
        self.engine.record_persistence(run_id, outcome);
        let _ = self.events.send(event);
    }
}
