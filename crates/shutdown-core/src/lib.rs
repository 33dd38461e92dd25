pub mod engine;
pub mod error;
pub mod noise;
pub mod params;
pub mod phase;
pub mod recorder;
pub mod tags;
pub mod timebase;
pub mod waveform;

pub use engine::{EngineConfig, PendingResolution, RunStatus, SimulationEngine, SimulationRun};
pub use error::{IllegalTransition, PersistenceFailure};
pub use noise::{ConstantNoise, NoiseSource, SeededNoise};
pub use params::{ParameterField, ParameterViolation, SimulationParameters};
pub use phase::{SimulationEvent, SimulationPhase};
pub use recorder::{
    AuxiliaryData, EventLog, LogEntry, PowerReport, ShutdownResolution, SimulationRecord,
};
pub use timebase::TimeBase;
pub use waveform::{OutputLevel, Segment, WaveformSample};
