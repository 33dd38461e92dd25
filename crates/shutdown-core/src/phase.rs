use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of the simulated shutdown device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationPhase {
    #[default]
    Idle,
    Running,
    ShuttingDown,
    ShutdownComplete,
    EmergencyStopped,
}

impl SimulationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::ShutdownComplete => "shutdown_complete",
            Self::EmergencyStopped => "emergency_stopped",
        }
    }

    /// Numeric code for gauges (0=idle, 1=running, 2=shutting down,
    /// 3=shutdown complete, 4=emergency stopped).
    pub fn code(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::ShuttingDown => 2,
            Self::ShutdownComplete => 3,
            Self::EmergencyStopped => 4,
        }
    }

    /// Phases in which the device is carrying power and efficiency is reported.
    pub fn is_energised(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::ShuttingDown | Self::ShutdownComplete
        )
    }

    /// Phases rendered with the three-segment shutdown waveform.
    pub fn is_shutdown_view(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::ShutdownComplete)
    }
}

impl fmt::Display for SimulationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator commands and internal events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEvent {
    Start,
    Shutdown,
    ShutdownResolved,
    EmergencyStop,
    Reset,
}

impl SimulationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Shutdown => "shutdown",
            Self::ShutdownResolved => "shutdown_resolved",
            Self::EmergencyStop => "emergency_stop",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for SimulationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
