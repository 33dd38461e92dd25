use crate::session::{SessionEvent, WaveformSnapshot};
use serde::{Deserialize, Serialize};
use shutdown_core::{
    tags, IllegalTransition, ParameterViolation, RunStatus, ShutdownResolution,
    SimulationParameters, TimeBase,
};
use thiserror::Error;

/// Derived quantities every `status` message carries under `power`.
pub const STATUS_TAGS: &[tags::Tag] = tags::POWER_TAGS;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartMsg {
    /// Omitted fields fall back to the rig defaults; omitting the whole
    /// object reuses the session's staged parameters.
    #[serde(default)]
    pub params: Option<SimulationParameters>,
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Start(StartMsg),
    Shutdown,
    EmergencyStop,
    Reset,
    Status,
    Waveform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    IllegalTransition,
    InvalidParameters,
    BadRequest,
    UnsupportedVersion,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no `type`")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("unsupported protocol version {}.{}", .0.major, .0.minor)]
    UnsupportedVersion(ProtocolVersion),
    #[error(transparent)]
    InvalidParameters(#[from] ParameterViolation),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) | Self::MissingType | Self::UnknownType(_) => ErrorCode::BadRequest,
            Self::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            Self::InvalidParameters(_) => ErrorCode::InvalidParameters,
        }
    }
}

impl IncomingMessage {
    /// Parses one line. `start` parameters are validated here, before they
    /// reach a session.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if let Some(raw) = value.get("protocol_version") {
            let version: ProtocolVersion = serde_json::from_value(raw.clone())
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            if !version.is_supported() {
                return Err(ProtocolError::UnsupportedVersion(version));
            }
        }

        let msg_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;

        let msg = match msg_type {
            "hello" => IncomingMessage::Hello(decode(value.clone())?),
            "start" => {
                let start: StartMsg = decode(value.clone())?;
                if let Some(params) = &start.params {
                    params.validate()?;
                }
                IncomingMessage::Start(start)
            }
            "shutdown" => IncomingMessage::Shutdown,
            "emergency_stop" => IncomingMessage::EmergencyStop,
            "reset" => IncomingMessage::Reset,
            "status" => IncomingMessage::Status,
            "waveform" => IncomingMessage::Waveform,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };
        Ok(msg)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

// ============================================================================
// Outgoing messages
// ============================================================================

/// Common header of every outgoing line.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Serialize)]
pub struct EventBody {
    pub event: &'static str,
    pub run_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ShutdownResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SessionEvent> for EventBody {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ShutdownResolved { resolution, status } => Self {
                event: "shutdown_resolved",
                run_id: resolution.run_id,
                resolution: Some(resolution),
                status: Some(status),
                error: None,
            },
            SessionEvent::Persisted { run_id } => Self {
                event: "persisted",
                run_id,
                resolution: None,
                status: None,
                error: None,
            },
            SessionEvent::PersistFailed { run_id, error } => Self {
                event: "persist_failed",
                run_id,
                resolution: None,
                status: None,
                error: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

impl From<&ProtocolError> for ErrorBody {
    fn from(err: &ProtocolError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            field: match err {
                ProtocolError::InvalidParameters(v) => Some(v.field().as_str()),
                _ => None,
            },
        }
    }
}

impl From<&IllegalTransition> for ErrorBody {
    fn from(err: &IllegalTransition) -> Self {
        Self {
            code: ErrorCode::IllegalTransition,
            message: err.to_string(),
            field: None,
        }
    }
}

/// Frames outgoing messages for one connection.
pub struct Outbound {
    sequence: u64,
    timebase: TimeBase,
}

impl Outbound {
    pub fn new(timebase: TimeBase) -> Self {
        Self {
            sequence: 0,
            timebase,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn frame<T: Serialize>(&mut self, msg_type: &'static str, body: T) -> serde_json::Result<String> {
        self.sequence = self.sequence.wrapping_add(1);
        let mut line = serde_json::to_string(&Envelope {
            msg_type,
            protocol_version: ProtocolVersion::v1(),
            sequence: self.sequence,
            unix_us: self.timebase.unix_us(),
            body,
        })?;
        line.push('\n');
        Ok(line)
    }

    pub fn status(&mut self, status: &RunStatus) -> serde_json::Result<String> {
        self.frame("status", status)
    }

    pub fn waveform(&mut self, snapshot: &WaveformSnapshot) -> serde_json::Result<String> {
        self.frame("waveform", snapshot)
    }

    pub fn event(&mut self, event: SessionEvent) -> serde_json::Result<String> {
        self.frame("event", EventBody::from(event))
    }

    pub fn error(&mut self, body: ErrorBody) -> serde_json::Result<String> {
        self.frame("error", body)
    }
}
