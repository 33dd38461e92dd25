pub mod bridge;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod store;

pub use bridge::{run_bridge, BridgeConfig, BridgeError};
pub use metrics::{init_metrics, serve_metrics};
pub use protocol::{ErrorCode, IncomingMessage, Outbound, ProtocolError, ProtocolVersion};
pub use session::{
    SessionConfig, SessionError, SessionEvent, SessionHandle, SimulationSession, WaveformSnapshot,
};
pub use sink::{LogSink, MemorySink, PersistenceSink};
pub use store::{JsonlRecordStore, StoredRecord};
