//! # lanview-core
//!
//! Session control plane for streaming a desktop to LAN controllers.
//!
//! This crate contains:
//! - **Protocol types**: `ClientMessage`, `ServerMessage` and the discovery datagrams
//! - **Session**: per-client state machine and the actor that drives it
//! - **Pacing**: `FramePacer`, one capture → encode → send cycle per tick
//! - **Adaptation**: `NetworkQualityEstimator` and `AdaptiveController`
//! - **Registry**: `ServerRegistry` of live sessions with shutdown fan-out
//! - **Servers**: `StreamServer` (WebSocket) and `DiscoveryResponder` (UDP)
//! - **Seams**: `FrameSource` and `InputActuator`, implemented by the host binary
//! - **Error**: `RemoteError`, a `thiserror`-based error hierarchy

pub mod adaptive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod pacer;
pub mod pipeline;
pub mod protocol;
pub mod quality;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use adaptive::{AdaptiveController, Bounds, Targets};
pub use config::{ServerIdentity, StreamingConfig};
pub use discovery::DiscoveryResponder;
pub use error::RemoteError;
pub use frame::{EncodedFrame, FrameRequest, PixelFormat, RawScreenFrame};
pub use pacer::{FramePacer, TickOutcome};
pub use pipeline::{FrameSource, InputActuator};
pub use protocol::{
    ClientMessage, Codec, FrameMeta, KeyboardIntent, MonitorInfo, MouseButton, MouseIntent,
    PointerMove, ScreenInfo, ServerInfo, ServerMessage, StreamRequest,
};
pub use quality::{NetworkQuality, NetworkQualityEstimator, QualityThresholds};
pub use registry::ServerRegistry;
pub use server::{HANDSHAKE_TIMEOUT, StreamServer};
pub use session::{Session, SessionContext, SessionId, SessionManager, StreamState, run_session};
pub use transport::{ChannelSink, DeadlineSink, Inbound, Outbound, SessionSink};
