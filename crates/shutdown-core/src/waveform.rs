//! Voltage/current waveform synthesis for the simulation display.
//!
//! Every call regenerates the full timeline from the inputs; nothing is kept
//! between calls. The shutdown view is split into three fixed segments:
//!
//! ```text
//!  0 ........ 29 | 30 ....... 49 | 50 ........................ 99
//!  pre-shutdown  | linear ramp   | settled at target output
//! ```
//!
//! Overlays key off [`TRANSITION_START`] and [`TRANSITION_END`], so those
//! indices are part of the contract.

use crate::noise::NoiseSource;
use crate::params::{clamp_or, INPUT_CURRENT_RANGE, INPUT_VOLTAGE_RANGE};
use crate::phase::SimulationPhase;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const SAMPLE_COUNT: usize = 100;
pub const TRANSITION_START: usize = 30;
pub const TRANSITION_END: usize = 50;
pub const SAMPLE_PERIOD_MS: u32 = 1;

pub const RUNNING_VOLTAGE_JITTER_V: f64 = 2.5;
pub const RUNNING_CURRENT_JITTER_A: f64 = 0.25;
pub const SETTLED_VOLTAGE_JITTER_V: f64 = 1.0;
pub const SETTLED_CURRENT_JITTER_A: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformSample {
    pub t_ms: u32,
    pub voltage: f64,
    pub current: f64,
}

/// A voltage/current operating point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputLevel {
    pub voltage: f64,
    pub current: f64,
}

impl OutputLevel {
    pub const fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    pub fn power_w(&self) -> f64 {
        self.voltage * self.current
    }

    /// Forces the level into the rig's electrical envelope; non-finite
    /// components collapse to zero.
    pub fn sanitized(&self) -> Self {
        Self {
            voltage: clamp_or(self.voltage, INPUT_VOLTAGE_RANGE, 0.0),
            current: clamp_or(self.current, INPUT_CURRENT_RANGE, 0.0),
        }
    }

    fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            voltage: self.voltage + (other.voltage - self.voltage) * t,
            current: self.current + (other.current - self.current) * t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Normal operation, no shutdown in view.
    Steady,
    PreShutdown,
    Transition,
    Settled,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        match self {
            Self::Steady => 0..SAMPLE_COUNT,
            Self::PreShutdown => 0..TRANSITION_START,
            Self::Transition => TRANSITION_START..TRANSITION_END,
            Self::Settled => TRANSITION_END..SAMPLE_COUNT,
        }
    }
}

/// Segment of `index` for a waveform rendered in `phase`. `None` when the
/// phase renders no samples or the index is past the end of the timeline.
pub fn segment_at(phase: SimulationPhase, index: usize) -> Option<Segment> {
    if index >= SAMPLE_COUNT {
        return None;
    }
    match phase {
        SimulationPhase::Idle | SimulationPhase::EmergencyStopped => None,
        SimulationPhase::Running => Some(Segment::Steady),
        SimulationPhase::ShuttingDown | SimulationPhase::ShutdownComplete => {
            if index < TRANSITION_START {
                Some(Segment::PreShutdown)
            } else if index < TRANSITION_END {
                Some(Segment::Transition)
            } else {
                Some(Segment::Settled)
            }
        }
    }
}

/// Builds the sample timeline for `phase`.
///
/// `prior` is the output before the shutdown command (or the live output
/// while running); `target` is the post-shutdown output.
pub fn synthesize<N: NoiseSource + ?Sized>(
    phase: SimulationPhase,
    prior: OutputLevel,
    target: OutputLevel,
    noise: &mut N,
) -> Vec<WaveformSample> {
    let prior = prior.sanitized();
    let target = target.sanitized();

    match phase {
        SimulationPhase::Idle | SimulationPhase::EmergencyStopped => Vec::new(),
        SimulationPhase::Running => (0..SAMPLE_COUNT)
            .map(|i| {
                noisy_sample(
                    i,
                    prior,
                    RUNNING_VOLTAGE_JITTER_V,
                    RUNNING_CURRENT_JITTER_A,
                    noise,
                )
            })
            .collect(),
        SimulationPhase::ShuttingDown | SimulationPhase::ShutdownComplete => {
            let mut samples = Vec::with_capacity(SAMPLE_COUNT);
            for i in Segment::PreShutdown.range() {
                samples.push(noisy_sample(
                    i,
                    prior,
                    RUNNING_VOLTAGE_JITTER_V,
                    RUNNING_CURRENT_JITTER_A,
                    noise,
                ));
            }
            let band = (TRANSITION_END - TRANSITION_START) as f64;
            for i in Segment::Transition.range() {
                let progress = (i - TRANSITION_START) as f64 / band;
                let level = prior.lerp(&target, progress);
                samples.push(WaveformSample {
                    t_ms: t_ms(i),
                    voltage: level.voltage,
                    current: level.current,
                });
            }
            for i in Segment::Settled.range() {
                samples.push(noisy_sample(
                    i,
                    target,
                    SETTLED_VOLTAGE_JITTER_V,
                    SETTLED_CURRENT_JITTER_A,
                    noise,
                ));
            }
            samples
        }
    }
}

fn noisy_sample<N: NoiseSource + ?Sized>(
    index: usize,
    level: OutputLevel,
    voltage_jitter: f64,
    current_jitter: f64,
    noise: &mut N,
) -> WaveformSample {
    WaveformSample {
        t_ms: t_ms(index),
        voltage: level.voltage + noise.jitter(voltage_jitter),
        current: level.current + noise.jitter(current_jitter),
    }
}

fn t_ms(index: usize) -> u32 {
    index as u32 * SAMPLE_PERIOD_MS
}
