//! WebSocket stream server.
//!
//! Accepts TCP connections, upgrades them to WebSocket, registers a
//! session and hands it to its own actor task. Connections past the
//! configured ceiling are closed right after the upgrade with a
//! "try again later" close frame.
//!
//! The upgrade itself is bounded by [`HANDSHAKE_TIMEOUT`] and abandoned
//! on shutdown, so a socket that never speaks cannot hold the server
//! open.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::RemoteError;
use crate::session::{SessionContext, SessionId, SessionManager, run_session};
use crate::transport::ws_inbound;

/// Longest a client may take to complete the WebSocket upgrade, and to
/// accept a rejection close frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StreamServer {
    listener: TcpListener,
    ctx: SessionContext,
    max_clients: Option<usize>,
}

impl StreamServer {
    /// Bind the listening socket. `max_clients = None` means unlimited.
    pub async fn bind(
        addr: SocketAddr,
        ctx: SessionContext,
        max_clients: Option<usize>,
    ) -> Result<Self, RemoteError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| RemoteError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            ctx,
            max_clients,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RemoteError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Accept connections until `shutdown` is cancelled, then signal
    /// every live session and wait for them to close.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RemoteError> {
        info!("stream server listening on ws://{}", self.local_addr()?);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.ctx.clone();
                        let shutdown = shutdown.clone();
                        sessions.spawn(serve_connection(stream, peer, ctx, self.max_clients, shutdown));
                    }
                    Err(e) => warn!("accept error: {e}"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!("session task failed: {e}");
                    }
                }
            }
        }

        let signalled = self.ctx.registry.shutdown_all().await;
        info!("stream server stopping; closing {signalled} session(s)");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                warn!("session task failed: {e}");
            }
        }
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
    max_clients: Option<usize>,
    shutdown: CancellationToken,
) {
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream));
    let mut ws = tokio::select! {
        _ = shutdown.cancelled() => {
            debug!("dropping {peer}: shutdown during handshake");
            return;
        }
        upgraded = handshake => match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!("websocket handshake with {peer} failed: {e}");
                return;
            }
            Err(_) => {
                debug!("websocket handshake with {peer} timed out");
                return;
            }
        },
    };

    let id = SessionId::generate(peer.ip());
    let session_token = match ctx.registry.register(id.clone(), peer, max_clients).await {
        Ok(token) => token,
        Err(e) => {
            warn!("rejecting {peer}: {e}");
            let frame = match e {
                RemoteError::ShuttingDown => CloseFrame {
                    code: CloseCode::Away,
                    reason: "server shutting down".into(),
                },
                _ => CloseFrame {
                    code: CloseCode::Again,
                    reason: "server full".into(),
                },
            };
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws.close(Some(frame))).await {
                Ok(Err(e)) => debug!("close to {peer} failed: {e}"),
                Err(_) => debug!("close to {peer} timed out"),
                Ok(Ok(())) => {}
            }
            return;
        }
    };

    let (writer, reader) = ws.split();
    let manager = SessionManager::new(id.clone(), peer, ctx, writer);
    run_session(manager, ws_inbound(reader), session_token)
        .instrument(info_span!("session", id = %id))
        .await;
}
