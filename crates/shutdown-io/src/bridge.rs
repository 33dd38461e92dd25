//! Line-delimited JSON control bridge. Every accepted connection gets its own
//! engine and session; nothing is shared between operators.

use crate::protocol::{ErrorBody, IncomingMessage, Outbound};
use crate::session::{SessionConfig, SessionError, SessionHandle, SimulationSession};
use crate::sink::PersistenceSink;
use shutdown_core::{EngineConfig, SeededNoise, SimulationEngine, TimeBase};
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub engine: EngineConfig,
    pub session: SessionConfig,
    /// Base seed for per-connection noise; each connection offsets it by its
    /// accept index. `None` seeds from entropy.
    pub seed: Option<u64>,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Accepts connections on `listener` until `stop` resolves.
pub async fn run_bridge<S, F>(listener: TcpListener, config: BridgeConfig, sink: S, stop: F)
where
    S: PersistenceSink + Clone,
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Bridge listening");
    }
    tokio::pin!(stop);
    let mut accepted: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("Bridge stopping");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    accepted += 1;
                    let noise = match config.seed {
                        Some(seed) => SeededNoise::from_seed(seed.wrapping_add(accepted)),
                        None => SeededNoise::from_entropy(),
                    };
                    let engine = SimulationEngine::new(config.engine.clone(), noise);
                    let session = config.session.clone();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        match serve_connection(stream, peer, engine, sink, session).await {
                            Ok(()) => info!(client_addr = %peer, "Bridge client disconnected"),
                            Err(err) => warn!(client_addr = %peer, error = %err, "Bridge connection failed"),
                        }
                    });
                }
                Err(err) => warn!(error = %err, "Bridge accept error"),
            }
        }
    }
}

#[instrument(skip(stream, peer, engine, sink, session), fields(client_addr = %peer))]
async fn serve_connection<S: PersistenceSink>(
    stream: TcpStream,
    peer: SocketAddr,
    engine: SimulationEngine<SeededNoise>,
    sink: S,
    session: SessionConfig,
) -> Result<(), BridgeError> {
    info!("Bridge client connected");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (handle, mut events, task) = SimulationSession::spawn(engine, sink, session);
    let mut out = Outbound::new(TimeBase::new());

    loop {
        let reply = tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                respond(&handle, &mut out, trimmed).await?
            }
            Some(event) = events.recv() => out.event(event)?,
        };
        writer.write_all(reply.as_bytes()).await?;
    }

    drop(handle);
    let _ = task.await;
    Ok(())
}

async fn respond(
    handle: &SessionHandle,
    out: &mut Outbound,
    line: &str,
) -> Result<String, BridgeError> {
    let msg = match IncomingMessage::parse(line) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(error = %err, "Rejected bridge message");
            return Ok(out.error(ErrorBody::from(&err))?);
        }
    };

    let reply = match msg {
        IncomingMessage::Hello(hello) => {
            debug!(
                client_id = hello.client_id.as_deref().unwrap_or("anonymous"),
                capabilities = ?hello.capabilities,
                "Bridge handshake"
            );
            out.status(&handle.status().await?)?
        }
        IncomingMessage::Start(start) => out.status(&handle.start(start.params).await?)?,
        IncomingMessage::Shutdown => match handle.shutdown().await {
            Ok(status) => out.status(&status)?,
            Err(SessionError::Rejected(err)) => out.error(ErrorBody::from(&err))?,
            Err(err) => return Err(err.into()),
        },
        IncomingMessage::EmergencyStop => out.status(&handle.emergency_stop().await?)?,
        IncomingMessage::Reset => out.status(&handle.reset().await?)?,
        IncomingMessage::Status => out.status(&handle.status().await?)?,
        IncomingMessage::Waveform => out.waveform(&handle.waveform().await?)?,
    };
    Ok(reply)
}
