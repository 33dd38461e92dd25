use crate::phase::{SimulationEvent, SimulationPhase};
use thiserror::Error;

/// A command that the current phase does not accept. The run is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {event} while the simulation is {phase}; start the simulation first")]
pub struct IllegalTransition {
    pub event: SimulationEvent,
    pub phase: SimulationPhase,
}

/// The record store did not accept a completed-shutdown record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceFailure {
    #[error("record store rejected the record: {0}")]
    Rejected(String),
    #[error("record store did not answer within {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}
