//! Session transport adapters.
//!
//! The session actor writes through a [`SessionSink`] and reads a
//! stream of [`Inbound`] events. The WebSocket implementation maps
//! text frames to control messages and binary frames to frame
//! payloads; [`ChannelSink`] is an in-process transport used by tests
//! and embedders. [`DeadlineSink`] puts a time limit on every write so
//! a peer that stops reading cannot wedge its session.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RemoteError;
use crate::protocol::ServerMessage;

// ── Outbound / Inbound ───────────────────────────────────────────

/// One message leaving the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON control message.
    Text(String),
    /// Encoded frame payload.
    Binary(Vec<u8>),
}

/// One event arriving from the client.
#[derive(Debug)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Close,
    /// The transport failed; the session ends.
    Error(RemoteError),
}

// ── SessionSink ──────────────────────────────────────────────────

/// Write half of a session transport.
#[async_trait]
pub trait SessionSink: Send {
    async fn send(&mut self, message: Outbound) -> Result<(), RemoteError>;

    /// Close the transport. Errors are reported but the session is
    /// going away regardless.
    async fn close(&mut self) -> Result<(), RemoteError>;

    /// Serialize and send a control message.
    async fn send_message(&mut self, message: &ServerMessage) -> Result<(), RemoteError> {
        let text = message.to_json()?;
        self.send(Outbound::Text(text)).await
    }
}

#[async_trait]
impl<S> SessionSink for SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: Outbound) -> Result<(), RemoteError> {
        let frame = match message {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(data) => Message::Binary(data),
        };
        SinkExt::send(self, frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

/// Map the read half of a WebSocket onto [`Inbound`] events.
///
/// Ping/pong and raw frames are handled by the protocol layer and
/// never surface.
pub fn ws_inbound<S>(reader: SplitStream<WebSocketStream<S>>) -> impl Stream<Item = Inbound> + Send + Unpin
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    reader.filter_map(|item| {
        let event = match item {
            Ok(Message::Text(text)) => Some(Inbound::Text(text)),
            Ok(Message::Binary(data)) => Some(Inbound::Binary(data)),
            Ok(Message::Close(_)) => Some(Inbound::Close),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
            Err(e) => Some(Inbound::Error(e.into())),
        };
        futures::future::ready(event)
    })
}

// ── DeadlineSink ─────────────────────────────────────────────────

/// Wraps a sink so that each send and the final close must finish
/// within `limit`. An expired send is reported as
/// [`RemoteError::SendTimeout`], which ends the session.
#[derive(Debug)]
pub struct DeadlineSink<S> {
    inner: S,
    limit: Duration,
}

impl<S> DeadlineSink<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl<S: SessionSink> SessionSink for DeadlineSink<S> {
    async fn send(&mut self, message: Outbound) -> Result<(), RemoteError> {
        tokio::time::timeout(self.limit, self.inner.send(message))
            .await
            .map_err(|_| RemoteError::SendTimeout(self.limit))?
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        tokio::time::timeout(self.limit, self.inner.close())
            .await
            .map_err(|_| RemoteError::SendTimeout(self.limit))?
    }
}

// ── ChannelSink ──────────────────────────────────────────────────

/// In-process sink backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SessionSink for ChannelSink {
    async fn send(&mut self, message: Outbound) -> Result<(), RemoteError> {
        self.tx.send(message)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}
