use crate::error::{IllegalTransition, PersistenceFailure};
use crate::noise::{NoiseSource, SeededNoise};
use crate::params::SimulationParameters;
use crate::phase::{SimulationEvent, SimulationPhase};
use crate::recorder::{
    EventLog, PowerReport, ShutdownResolution, SimulationRecord, DEFAULT_LOG_CAPACITY,
};
use crate::waveform::{self, OutputLevel, WaveformSample};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::Range;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Delay between the shutdown command and its resolution.
    pub shutdown_delay: Duration,
    /// Output the device settles at once the contact has opened.
    pub shutdown_target: OutputLevel,
    pub latency_range_ms: Range<f64>,
    pub power_loss_range_w: Range<f64>,
    /// Shutdowns faster than this pass the acceptance check.
    pub pass_latency_ms: f64,
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_delay: Duration::from_millis(1000),
            shutdown_target: OutputLevel::new(45.0, 12.0),
            latency_range_ms: 45.0..55.0,
            power_loss_range_w: 2.0..7.0,
            pass_latency_ms: 50.0,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// The live session. Only [`SimulationEngine`] mutates it.
#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub run_id: u64,
    pub phase: SimulationPhase,
    pub params: SimulationParameters,
    pub output_voltage: f64,
    pub output_current: f64,
    pub shutdown_latency_ms: Option<f64>,
    pub power_loss_w: Option<f64>,
    pub started_at: Option<DateTime<Local>>,
    /// Output captured when the shutdown command was accepted.
    pub pre_shutdown_output: Option<OutputLevel>,
    pub log: EventLog,
}

impl SimulationRun {
    fn new(run_id: u64, params: SimulationParameters, log_capacity: usize) -> Self {
        Self {
            run_id,
            phase: SimulationPhase::Idle,
            params,
            output_voltage: 0.0,
            output_current: 0.0,
            shutdown_latency_ms: None,
            power_loss_w: None,
            started_at: None,
            pre_shutdown_output: None,
            log: EventLog::with_capacity(log_capacity),
        }
    }

    pub fn output(&self) -> OutputLevel {
        OutputLevel::new(self.output_voltage, self.output_current)
    }
}

/// The single scheduled shutdown resolution a run may have outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResolution {
    pub run_id: u64,
    pub issued_at_us: u64,
    pub due_at_us: u64,
}

/// Serializable snapshot of the run for displays and the control protocol.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: u64,
    pub phase: SimulationPhase,
    pub params: SimulationParameters,
    pub output_voltage: f64,
    pub output_current: f64,
    pub shutdown_latency_ms: Option<f64>,
    pub power_loss_w: Option<f64>,
    pub started_at: Option<DateTime<Local>>,
    pub power: PowerReport,
    pub passed: Option<bool>,
    pub shutdown_pending: bool,
    pub shutdown_progress: Option<f64>,
    pub log: Vec<String>,
}

/// Drives one simulated shutdown device through its lifecycle.
///
/// Time is supplied by the caller as monotonic microseconds so the pending
/// resolution can be driven by any clock (a tokio timer, a test loop).
pub struct SimulationEngine<N: NoiseSource = SeededNoise> {
    config: EngineConfig,
    noise: N,
    run: SimulationRun,
    /// Parameters the next `start` without explicit inputs will use.
    staged: SimulationParameters,
    pending: Option<PendingResolution>,
    next_run_id: u64,
}

impl<N: NoiseSource> SimulationEngine<N> {
    pub fn new(config: EngineConfig, noise: N) -> Self {
        let run = SimulationRun::new(0, SimulationParameters::default(), config.log_capacity);
        Self {
            config,
            noise,
            run,
            staged: SimulationParameters::default(),
            pending: None,
            next_run_id: 1,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self) -> &SimulationRun {
        &self.run
    }

    pub fn phase(&self) -> SimulationPhase {
        self.run.phase
    }

    pub fn pending(&self) -> Option<PendingResolution> {
        self.pending
    }

    pub fn pending_deadline_us(&self) -> Option<u64> {
        self.pending.map(|p| p.due_at_us)
    }

    pub fn staged_parameters(&self) -> SimulationParameters {
        self.staged
    }

    /// Replaces the staged parameters; they take effect on the next `start`.
    /// An energised run keeps the inputs it was started with.
    pub fn set_parameters(&mut self, params: SimulationParameters) {
        self.staged = params.clamped();
        if !self.run.phase.is_energised() {
            self.run.params = self.staged;
        }
    }

    /// Idle (or any other phase) -> Running. Starting over an existing run
    /// replaces it and cancels any pending resolution.
    pub fn start(&mut self, params: SimulationParameters) -> &SimulationRun {
        let params = params.clamped();
        if self.run.phase.is_energised() {
            debug!(
                "replacing run {} while {}",
                self.run.run_id, self.run.phase
            );
        }
        self.cancel_pending();
        self.staged = params;
        let mut log = std::mem::take(&mut self.run.log);
        self.run = SimulationRun::new(self.allocate_run_id(), params, self.config.log_capacity);
        self.run.phase = SimulationPhase::Running;
        self.run.output_voltage = params.input_voltage;
        self.run.output_current = params.input_current;
        self.run.started_at = Some(Local::now());

        log.push(format!(
            "Simulation started: input {}V / {}A, {}°C, {} W/m²",
            params.input_voltage, params.input_current, params.temperature, params.light_intensity
        ));
        self.run.log = log;
        info!(
            "run {} started at {}V / {}A",
            self.run.run_id, params.input_voltage, params.input_current
        );
        &self.run
    }

    /// Running -> ShuttingDown. Schedules the resolution at
    /// `now_us + shutdown_delay`; rejected in every other phase.
    pub fn issue_shutdown(&mut self, now_us: u64) -> Result<(), IllegalTransition> {
        if self.run.phase != SimulationPhase::Running {
            warn!("shutdown rejected while {}", self.run.phase);
            return Err(IllegalTransition {
                event: SimulationEvent::Shutdown,
                phase: self.run.phase,
            });
        }

        let delay_us = self.config.shutdown_delay.as_micros() as u64;
        self.run.phase = SimulationPhase::ShuttingDown;
        self.run.pre_shutdown_output = Some(self.run.output());
        self.pending = Some(PendingResolution {
            run_id: self.run.run_id,
            issued_at_us: now_us,
            due_at_us: now_us.saturating_add(delay_us),
        });
        self.run.log.push("Shutdown command issued");
        info!(
            "run {} shutdown issued, resolving in {} us",
            self.run.run_id, delay_us
        );
        Ok(())
    }

    /// Fraction of the shutdown delay elapsed at `now_us`, while one is pending.
    pub fn shutdown_progress(&self, now_us: u64) -> Option<f64> {
        self.pending.map(|p| {
            let span = p.due_at_us.saturating_sub(p.issued_at_us);
            if span == 0 {
                return 1.0;
            }
            let elapsed = now_us.saturating_sub(p.issued_at_us);
            (elapsed as f64 / span as f64).min(1.0)
        })
    }

    /// Fires the pending resolution once its deadline has passed.
    pub fn poll(&mut self, now_us: u64) -> Option<ShutdownResolution> {
        let pending = self.pending?;
        if now_us < pending.due_at_us {
            return None;
        }
        self.pending = None;
        if pending.run_id != self.run.run_id || self.run.phase != SimulationPhase::ShuttingDown {
            debug!("dropping stale shutdown resolution for run {}", pending.run_id);
            return None;
        }
        Some(self.resolve_shutdown())
    }

    fn resolve_shutdown(&mut self) -> ShutdownResolution {
        let target = self.config.shutdown_target;
        let latency_ms = self.noise.uniform(
            self.config.latency_range_ms.start,
            self.config.latency_range_ms.end,
        );
        let power_loss_w = self.noise.uniform(
            self.config.power_loss_range_w.start,
            self.config.power_loss_range_w.end,
        );

        self.run.phase = SimulationPhase::ShutdownComplete;
        self.run.output_voltage = target.voltage;
        self.run.output_current = target.current;
        self.run.shutdown_latency_ms = Some(latency_ms);
        self.run.power_loss_w = Some(power_loss_w);

        self.run.log.push(format!(
            "Shutdown complete: response time {latency_ms:.1} ms, output {}V / {}A",
            target.voltage, target.current
        ));
        info!(
            "run {} shutdown resolved: latency {:.2} ms, loss {:.2} W",
            self.run.run_id, latency_ms, power_loss_w
        );

        ShutdownResolution {
            run_id: self.run.run_id,
            shutdown_latency_ms: latency_ms,
            power_loss_w,
            output: target,
            passed: self.passed().unwrap_or(false),
            record: SimulationRecord::new(&self.run.params, target, latency_ms, power_loss_w),
        }
    }

    /// Any phase -> EmergencyStopped. Zeroes outputs and results, clears the
    /// log and cancels a pending resolution.
    pub fn emergency_stop(&mut self) -> &SimulationRun {
        self.cancel_pending();
        let params = self.run.params;
        let previous = self.run.phase;
        let mut log = std::mem::take(&mut self.run.log);
        log.clear();
        self.run = SimulationRun::new(self.allocate_run_id(), params, self.config.log_capacity);
        self.run.phase = SimulationPhase::EmergencyStopped;
        log.push("Emergency stop: all outputs de-energised");
        self.run.log = log;
        warn!("emergency stop from {}", previous);
        &self.run
    }

    /// Any phase -> Idle with default parameters and an empty log.
    pub fn reset(&mut self) -> &SimulationRun {
        self.cancel_pending();
        self.staged = SimulationParameters::default();
        let mut log = std::mem::take(&mut self.run.log);
        log.clear();
        self.run = SimulationRun::new(self.allocate_run_id(), self.staged, self.config.log_capacity);
        log.push("System reset to default parameters");
        self.run.log = log;
        info!("simulation reset");
        &self.run
    }

    /// Regenerates the waveform for the current phase.
    pub fn current_waveform(&mut self) -> Vec<WaveformSample> {
        let prior = self.run.pre_shutdown_output.unwrap_or_else(|| self.run.output());
        waveform::synthesize(
            self.run.phase,
            prior,
            self.config.shutdown_target,
            &mut self.noise,
        )
    }

    pub fn derived_power(&self) -> PowerReport {
        PowerReport::compute(self.run.phase, &self.run.params, self.run.output())
    }

    /// Pass verdict for a resolved shutdown; `None` until one resolves.
    pub fn passed(&self) -> Option<bool> {
        let latency = self.run.shutdown_latency_ms?;
        let target = self.config.shutdown_target;
        Some(
            latency < self.config.pass_latency_ms
                && self.run.output_voltage == target.voltage
                && self.run.output_current == target.current,
        )
    }

    /// Notes the store's answer for a record emitted by `run_id`. Outcomes
    /// for runs that have since been replaced are dropped.
    pub fn record_persistence(&mut self, run_id: u64, outcome: Result<(), PersistenceFailure>) {
        if run_id != self.run.run_id {
            debug!(
                "ignoring persistence outcome for run {} (current run {})",
                run_id, self.run.run_id
            );
            return;
        }
        match outcome {
            Ok(()) => self.run.log.push("Simulation result saved"),
            Err(err) => {
                warn!("run {} result not persisted: {}", run_id, err);
                self.run
                    .log
                    .push(format!("Warning: simulation result not saved ({err})"));
            }
        }
    }

    pub fn status(&self, now_us: u64) -> RunStatus {
        RunStatus {
            run_id: self.run.run_id,
            phase: self.run.phase,
            params: self.run.params,
            output_voltage: self.run.output_voltage,
            output_current: self.run.output_current,
            shutdown_latency_ms: self.run.shutdown_latency_ms,
            power_loss_w: self.run.power_loss_w,
            started_at: self.run.started_at,
            power: self.derived_power(),
            passed: self.passed(),
            shutdown_pending: self.pending.is_some(),
            shutdown_progress: self.shutdown_progress(now_us),
            log: self.run.log.lines_newest_first(),
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            debug!("cancelled shutdown resolution for run {}", p.run_id);
        }
    }

    fn allocate_run_id(&mut self) -> u64 {
        let id = self.next_run_id;
        self.next_run_id += 1;
        id
    }
}

impl Default for SimulationEngine<SeededNoise> {
    fn default() -> Self {
        Self::new(EngineConfig::default(), SeededNoise::from_entropy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::ConstantNoise;
    use crate::waveform::{SAMPLE_COUNT, TRANSITION_END, TRANSITION_START};

    const DELAY_US: u64 = 1_000_000;

    fn engine() -> SimulationEngine<ConstantNoise> {
        SimulationEngine::new(EngineConfig::default(), ConstantNoise::centered())
    }

    fn messages(engine: &SimulationEngine<ConstantNoise>) -> Vec<String> {
        engine.run().log.entries().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn start_copies_inputs_to_outputs() {
        let mut e = engine();
        let run = e.start(SimulationParameters::default());
        assert_eq!(run.phase, SimulationPhase::Running);
        assert_eq!(run.output_voltage, 600.0);
        assert_eq!(run.output_current, 10.0);
        assert!(run.started_at.is_some());
        assert_eq!(e.derived_power().input_power_w, 6000.0);
        assert!(messages(&e)[0].starts_with("Simulation started"));
    }

    #[test]
    fn shutdown_before_start_is_rejected() {
        let mut e = engine();
        let err = e.issue_shutdown(0).unwrap_err();
        assert_eq!(err.event, SimulationEvent::Shutdown);
        assert_eq!(err.phase, SimulationPhase::Idle);
        assert_eq!(e.phase(), SimulationPhase::Idle);
        assert!(e.run().log.is_empty());
        assert!(e.pending().is_none());
    }

    #[test]
    fn shutdown_after_emergency_stop_is_rejected() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.emergency_stop();
        let before = messages(&e);
        assert!(e.issue_shutdown(0).is_err());
        assert_eq!(e.phase(), SimulationPhase::EmergencyStopped);
        assert_eq!(messages(&e), before);
    }

    #[test]
    fn second_shutdown_while_pending_is_rejected() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        let err = e.issue_shutdown(10).unwrap_err();
        assert_eq!(err.phase, SimulationPhase::ShuttingDown);
        assert_eq!(e.pending_deadline_us(), Some(DELAY_US));
    }

    #[test]
    fn shutdown_resolves_after_delay() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(5_000).unwrap();
        assert_eq!(e.phase(), SimulationPhase::ShuttingDown);
        assert_eq!(e.run().output_voltage, 600.0);

        assert!(e.poll(5_000 + DELAY_US - 1).is_none());
        assert_eq!(e.shutdown_progress(5_000 + DELAY_US / 2), Some(0.5));

        let res = e.poll(5_000 + DELAY_US).expect("resolution due");
        assert_eq!(e.phase(), SimulationPhase::ShutdownComplete);
        assert_eq!(e.run().output_voltage, 45.0);
        assert_eq!(e.run().output_current, 12.0);
        assert_eq!(res.shutdown_latency_ms, 50.0);
        assert_eq!(res.power_loss_w, 4.5);
        assert!(!res.passed, "50 ms is not under the 50 ms threshold");
        assert_eq!(res.record.output_voltage, 45.0);
        assert_eq!(res.record.auxiliary.light_intensity, 800.0);
        assert!(e.poll(u64::MAX).is_none(), "fires once");

        let power = e.derived_power();
        assert_eq!(power.output_power_w, 540.0);
        assert!((power.efficiency_percent - 9.0).abs() < 1e-9);
    }

    #[test]
    fn fast_shutdown_passes() {
        let mut e = SimulationEngine::new(EngineConfig::default(), ConstantNoise(0.1));
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        let res = e.poll(DELAY_US).unwrap();
        assert_eq!(res.shutdown_latency_ms, 46.0);
        assert!(res.passed);
        assert_eq!(e.passed(), Some(true));
    }

    #[test]
    fn emergency_stop_mid_transition_cancels_resolution() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        e.emergency_stop();

        assert!(e.pending().is_none());
        assert!(e.poll(DELAY_US * 2).is_none());
        let run = e.run();
        assert_eq!(run.phase, SimulationPhase::EmergencyStopped);
        assert_eq!(run.output_voltage, 0.0);
        assert_eq!(run.output_current, 0.0);
        assert_eq!(run.shutdown_latency_ms, None);
        assert_eq!(run.power_loss_w, None);
        assert_eq!(messages(&e), ["Emergency stop: all outputs de-energised"]);
        assert_eq!(e.derived_power().efficiency_percent, 0.0);
        assert!(e.current_waveform().is_empty());
    }

    #[test]
    fn reset_restores_defaults_from_every_phase() {
        let custom = SimulationParameters::new(400.0, 20.0, 60.0, 300.0);
        for stop_after in 0..5 {
            let mut e = engine();
            e.set_parameters(custom);
            if stop_after >= 1 {
                e.start(custom);
            }
            if stop_after >= 2 {
                e.issue_shutdown(0).unwrap();
            }
            if stop_after == 3 {
                e.poll(DELAY_US).unwrap();
            }
            if stop_after == 4 {
                e.emergency_stop();
                assert_eq!(e.phase(), SimulationPhase::EmergencyStopped);
            }

            let run = e.reset();
            assert_eq!(run.phase, SimulationPhase::Idle);
            assert_eq!(run.params, SimulationParameters::default());
            assert_eq!(run.output_voltage, 0.0);
            assert_eq!(run.shutdown_latency_ms, None);
            assert_eq!(run.power_loss_w, None);
            assert_eq!(messages(&e), ["System reset to default parameters"]);
            assert_eq!(e.staged_parameters(), SimulationParameters::default());
            assert!(e.poll(u64::MAX).is_none());
        }
    }

    #[test]
    fn restart_while_pending_drops_old_resolution() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        e.start(SimulationParameters::new(300.0, 5.0, 25.0, 800.0));
        assert!(e.poll(DELAY_US).is_none());
        assert_eq!(e.phase(), SimulationPhase::Running);
        assert_eq!(e.run().output_voltage, 300.0);
    }

    #[test]
    fn staging_parameters_mid_run_leaves_the_run_alone() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.set_parameters(SimulationParameters::new(100.0, 1.0, 25.0, 800.0));

        assert_eq!(e.run().params, SimulationParameters::default());
        assert_eq!(e.derived_power().input_power_w, 6000.0);
        assert!((e.derived_power().efficiency_percent - 100.0).abs() < 1e-9);

        e.issue_shutdown(0).unwrap();
        e.set_parameters(SimulationParameters::new(200.0, 2.0, 25.0, 800.0));
        let res = e.poll(DELAY_US).unwrap();
        assert_eq!(res.record.input_voltage, 600.0);
        assert_eq!(res.record.input_current, 10.0);
        assert!((e.derived_power().efficiency_percent - 9.0).abs() < 1e-9);

        let run = e.start(e.staged_parameters());
        assert_eq!(run.params.input_voltage, 200.0);
        assert_eq!(run.output_voltage, 200.0);
    }

    #[test]
    fn staging_parameters_while_idle_shows_in_status() {
        let mut e = engine();
        e.set_parameters(SimulationParameters::new(300.0, 4.0, 25.0, 800.0));
        assert_eq!(e.status(0).params.input_voltage, 300.0);
        assert_eq!(e.phase(), SimulationPhase::Idle);
    }

    #[test]
    fn shutdown_waveform_uses_pre_shutdown_output() {
        let mut e = engine();
        e.start(SimulationParameters::new(500.0, 8.0, 25.0, 800.0));
        e.issue_shutdown(0).unwrap();
        e.poll(DELAY_US).unwrap();

        let samples = e.current_waveform();
        assert_eq!(samples.len(), SAMPLE_COUNT);
        assert_eq!(samples[0].voltage, 500.0);
        assert_eq!(samples[TRANSITION_START].voltage, 500.0);
        assert_eq!(samples[TRANSITION_START].current, 8.0);
        assert_eq!(samples[TRANSITION_END].voltage, 45.0);
        assert_eq!(samples[99].current, 12.0);
    }

    #[test]
    fn out_of_range_start_is_clamped() {
        let mut e = engine();
        let run = e.start(SimulationParameters::new(5000.0, f64::NAN, 200.0, -5.0));
        assert_eq!(run.output_voltage, 1000.0);
        assert_eq!(run.output_current, 10.0);
        assert!(e.current_waveform().iter().all(|s| s.voltage.is_finite()));
    }

    #[test]
    fn persistence_outcomes_are_logged_for_current_run_only() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        let res = e.poll(DELAY_US).unwrap();

        e.record_persistence(
            res.run_id,
            Err(PersistenceFailure::TimedOut { timeout_ms: 5000 }),
        );
        let last = messages(&e).pop().unwrap();
        assert!(last.starts_with("Warning: simulation result not saved"));
        assert_eq!(e.phase(), SimulationPhase::ShutdownComplete);
        assert_eq!(e.run().shutdown_latency_ms, Some(50.0));

        e.reset();
        e.record_persistence(res.run_id, Ok(()));
        assert_eq!(messages(&e).len(), 1);
    }

    #[test]
    fn status_snapshot_lists_newest_line_first() {
        let mut e = engine();
        e.start(SimulationParameters::default());
        e.issue_shutdown(0).unwrap();
        let status = e.status(10);
        assert!(status.shutdown_pending);
        assert_eq!(status.phase, SimulationPhase::ShuttingDown);
        assert!(status.log[0].ends_with("Shutdown command issued"));
        assert_eq!(status.passed, None);
    }
}
