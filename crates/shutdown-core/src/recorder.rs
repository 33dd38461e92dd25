//! Run log, derived power figures and the completed-shutdown record.

use crate::params::SimulationParameters;
use crate::phase::SimulationPhase;
use crate::waveform::OutputLevel;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// One timestamped line of the operator-facing run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Append-only log bounded to the most recent `capacity` entries.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.push_at(Local::now(), message);
    }

    pub fn push_at(&mut self, timestamp: DateTime<Local>, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp,
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Rendered lines, newest first, the way the panel lists them.
    pub fn lines_newest_first(&self) -> Vec<String> {
        self.entries.iter().rev().map(ToString::to_string).collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerReport {
    pub input_power_w: f64,
    pub output_power_w: f64,
    pub efficiency_percent: f64,
}

impl PowerReport {
    pub fn compute(
        phase: SimulationPhase,
        params: &SimulationParameters,
        output: OutputLevel,
    ) -> Self {
        let input_power_w = params.input_power_w();
        let output_power_w = output.power_w();
        let efficiency_percent = if phase.is_energised() && input_power_w > 0.0 {
            output_power_w / input_power_w * 100.0
        } else {
            0.0
        };
        Self {
            input_power_w,
            output_power_w,
            efficiency_percent,
        }
    }
}

/// Context stored next to a shutdown record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryData {
    pub temperature: f64,
    pub light_intensity: f64,
    pub power_loss_w: f64,
}

/// Persistence request emitted once per resolved shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub input_voltage: f64,
    pub input_current: f64,
    pub output_voltage: f64,
    pub output_current: f64,
    pub shutdown_latency_ms: f64,
    pub auxiliary: AuxiliaryData,
}

impl SimulationRecord {
    pub fn new(
        params: &SimulationParameters,
        output: OutputLevel,
        shutdown_latency_ms: f64,
        power_loss_w: f64,
    ) -> Self {
        Self {
            input_voltage: params.input_voltage,
            input_current: params.input_current,
            output_voltage: output.voltage,
            output_current: output.current,
            shutdown_latency_ms,
            auxiliary: AuxiliaryData {
                temperature: params.temperature,
                light_intensity: params.light_intensity,
                power_loss_w,
            },
        }
    }
}

/// Outcome of a completed shutdown, handed to the caller by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShutdownResolution {
    pub run_id: u64,
    pub shutdown_latency_ms: f64,
    pub power_loss_w: f64,
    pub output: OutputLevel,
    /// Latency under the pass threshold and output landed on target.
    pub passed: bool,
    pub record: SimulationRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_evicts_oldest_first() {
        let mut log = EventLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["line 2", "line 3", "line 4"]);
        assert_eq!(log.latest().map(|e| e.message.as_str()), Some("line 4"));
    }

    #[test]
    fn cleared_log_keeps_capacity() {
        let mut log = EventLog::with_capacity(2);
        log.push("a");
        log.push("b");
        log.clear();
        assert!(log.is_empty());
        assert!(log.latest().is_none());
        log.push("c");
        log.push("d");
        log.push("e");
        assert_eq!(log.capacity(), 2);
        assert_eq!(log.lines_newest_first().len(), 2);
    }

    #[test]
    fn default_log_holds_fifty_lines() {
        let mut log = EventLog::default();
        for i in 0..60 {
            log.push(format!("{i}"));
        }
        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        assert_eq!(log.entries().next().map(|e| e.message.as_str()), Some("10"));
    }

    #[test]
    fn rendered_lines_carry_clock_prefix() {
        let mut log = EventLog::default();
        log.push("shutdown command issued");
        let line = &log.lines_newest_first()[0];
        assert!(line.starts_with('['));
        assert_eq!(&line[9..11], "] ");
        assert!(line.ends_with("shutdown command issued"));
    }

    #[test]
    fn record_serializes_with_auxiliary_context() {
        let record = SimulationRecord::new(
            &SimulationParameters::default(),
            OutputLevel::new(45.0, 12.0),
            48.2,
            3.1,
        );
        let value = serde_json::to_value(record).unwrap();
        assert_eq!(value["input_voltage"], 600.0);
        assert_eq!(value["output_current"], 12.0);
        assert_eq!(value["shutdown_latency_ms"], 48.2);
        assert_eq!(value["auxiliary"]["light_intensity"], 800.0);
        assert_eq!(value["auxiliary"]["power_loss_w"], 3.1);
    }

    #[test]
    fn efficiency_follows_reference_example() {
        let params = SimulationParameters::default();
        let report = PowerReport::compute(
            SimulationPhase::ShutdownComplete,
            &params,
            OutputLevel::new(45.0, 12.0),
        );
        assert_eq!(report.input_power_w, 6000.0);
        assert_eq!(report.output_power_w, 540.0);
        assert!((report.efficiency_percent - 9.0).abs() < 1e-12);
    }

    #[test]
    fn efficiency_is_zero_when_idle_or_unpowered() {
        let params = SimulationParameters::default();
        let idle = PowerReport::compute(SimulationPhase::Idle, &params, OutputLevel::new(45.0, 12.0));
        assert_eq!(idle.efficiency_percent, 0.0);

        let dark = SimulationParameters::new(0.0, 10.0, 25.0, 0.0);
        let report =
            PowerReport::compute(SimulationPhase::Running, &dark, OutputLevel::new(0.0, 10.0));
        assert_eq!(report.efficiency_percent, 0.0);
    }
}
