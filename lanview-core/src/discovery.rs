//! UDP discovery responder.
//!
//! Listens on the discovery port and answers every `{"type":"discover"}`
//! datagram with a unicast `server_info` to the sender. Anything else
//! is dropped silently. Per-datagram failures are logged and the loop
//! keeps going; only a bind failure is reported to the caller.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::protocol::{ServerInfo, is_discover_request};

/// Largest datagram we bother reading.
const MAX_DATAGRAM: usize = 2048;

pub struct DiscoveryResponder {
    socket: UdpSocket,
    reply: Vec<u8>,
    info: ServerInfo,
}

impl DiscoveryResponder {
    /// Bind `addr` with broadcast enabled and pre-encode the reply.
    pub async fn bind(addr: SocketAddr, info: ServerInfo) -> Result<Self, RemoteError> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| RemoteError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_broadcast(true)?;
        let reply = info.to_bytes()?;
        Ok(Self {
            socket,
            reply,
            info,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RemoteError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// The reply to send for `datagram`, if it deserves one.
    pub fn respond_to(&self, datagram: &[u8]) -> Option<&[u8]> {
        is_discover_request(datagram).then_some(self.reply.as_slice())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RemoteError> {
        if let Ok(addr) = self.socket.local_addr() {
            info!("discovery listening on udp {addr}");
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("discovery receive error: {e}");
                        continue;
                    }
                },
            };

            let Some(reply) = self.respond_to(&buf[..len]) else {
                debug!("ignoring {len} byte datagram from {from}");
                continue;
            };
            match self.socket.send_to(reply, from).await {
                Ok(_) => info!("discovery request from {from}; announced port {}", self.info.port),
                Err(e) => warn!("discovery reply to {from} failed: {e}"),
            }
        }
        info!("discovery stopped");
        Ok(())
    }
}
