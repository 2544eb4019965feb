//! Session protocol: JSON control messages over the WebSocket.
//!
//! # Wire Protocol
//!
//! ## Handshake
//! ```text
//! Server ──[connected]───────────────────────► Client
//! Server ──[screen_info]─────────────────────► Client
//! ```
//!
//! ## Streaming
//! ```text
//! Client ──[start_stream {fps, quality, …}]──► Server
//! Server ──[frame_meta]──────────────────────► Client   (text)
//! Server ──[<jpeg bytes>]────────────────────► Client   (binary, repeated pair)
//! Client ──[stop_stream]─────────────────────► Server
//! ```
//!
//! ## Input & liveness
//! ```text
//! Client ──[mouse {data}] / [keyboard {data}]► Server
//! Client ──[ping {timestamp}]────────────────► Server
//! Server ──[pong {timestamp}]────────────────► Client
//! Server ──[heartbeat]───────────────────────► Client   (periodic)
//! ```
//!
//! Unknown `type` values decode to [`ClientMessage::Unknown`] and are
//! ignored by the session, so newer clients can talk to older servers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::quality::NetworkQuality;

// ── Codec ────────────────────────────────────────────────────────

/// Codec name carried by `start_stream` / `update_settings`.
///
/// Every codec is currently served by the still-image path; the field
/// is accepted so clients can express a preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Codec {
    Jpeg,
    Vp8,
    Vp9,
    H264,
    /// Any name this server does not know.
    Other(String),
}

impl Codec {
    pub fn as_str(&self) -> &str {
        match self {
            Codec::Jpeg => "jpeg",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::H264 => "h264",
            Codec::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Codec::Other(_))
    }
}

impl From<String> for Codec {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Codec::Jpeg,
            "vp8" => Codec::Vp8,
            "vp9" => Codec::Vp9,
            "h264" | "h.264" => Codec::H264,
            _ => Codec::Other(s),
        }
    }
}

impl From<&str> for Codec {
    fn from(s: &str) -> Self {
        Codec::from(s.to_string())
    }
}

impl From<Codec> for String {
    fn from(c: Codec) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Client → Server ──────────────────────────────────────────────

/// A decoded client control message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartStream(StreamRequest),
    StopStream,
    UpdateSettings(StreamRequest),
    Mouse { data: MouseIntent },
    Keyboard { data: KeyboardIntent },
    Ping {
        #[serde(default)]
        timestamp: serde_json::Value,
    },
    GetScreenInfo,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, RemoteError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Optional overrides carried by `start_stream` and `update_settings`.
///
/// `max_fps` is only honoured by `start_stream`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub fps: Option<u32>,
    pub quality: Option<u32>,
    pub codec: Option<Codec>,
    pub monitor: Option<u32>,
    pub max_fps: Option<u32>,
}

// ── Mouse ────────────────────────────────────────────────────────

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// Pointer intent sent by the controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MouseIntent {
    Move(PointerMove),
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        double: bool,
    },
    Scroll {
        #[serde(default)]
        dx: f64,
        #[serde(default)]
        dy: f64,
    },
    DragStart {
        #[serde(default)]
        button: MouseButton,
    },
    DragEnd {
        #[serde(default)]
        button: MouseButton,
    },
    /// Pinch gesture; translated into a vertical scroll.
    Zoom { scale: f64 },
    #[serde(other)]
    Unsupported,
}

/// Absolute (normalized 0..1) or relative pointer movement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PointerMove {
    #[serde(default)]
    pub normalized: bool,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub dx: f64,
    #[serde(default)]
    pub dy: f64,
}

impl PointerMove {
    /// Resolve to absolute screen coordinates.
    pub fn resolve(&self, screen: (u32, u32), current: (i32, i32)) -> (i32, i32) {
        if self.normalized {
            let x = (self.x.clamp(0.0, 1.0) * f64::from(screen.0)).round() as i32;
            let y = (self.y.clamp(0.0, 1.0) * f64::from(screen.1)).round() as i32;
            (x, y)
        } else {
            (
                current.0 + self.dx.round() as i32,
                current.1 + self.dy.round() as i32,
            )
        }
    }
}

impl MouseIntent {
    /// Scroll amount in whole notches, or `None` when there is nothing to do.
    pub fn scroll_steps(&self) -> Option<(i32, i32)> {
        let (dx, dy) = match self {
            MouseIntent::Scroll { dx, dy } => (dx.round() as i32, dy.round() as i32),
            MouseIntent::Zoom { scale } => (0, ((scale - 1.0) * 40.0).round() as i32),
            _ => return None,
        };
        if dx == 0 && dy == 0 { None } else { Some((dx, dy)) }
    }
}

// ── Keyboard ─────────────────────────────────────────────────────

/// Keyboard intent sent by the controller. Key names follow the
/// robotjs naming (`enter`, `backspace`, `a`, `f5`, …).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum KeyboardIntent {
    Press {
        key: String,
        #[serde(default)]
        modifiers: Vec<String>,
    },
    Down { key: String },
    Up { key: String },
    Type { text: String },
    #[serde(other)]
    Unsupported,
}

// ── Server → Client ──────────────────────────────────────────────

/// Server identity block inside the `connected` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// One monitor as reported by the capture provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub monitors: Vec<MonitorInfo>,
    pub primary_monitor: u32,
}

impl ScreenInfo {
    /// Build from a monitor list, picking the flagged primary (or the first).
    pub fn from_monitors(monitors: Vec<MonitorInfo>) -> Self {
        let primary_monitor = monitors
            .iter()
            .find(|m| m.primary)
            .or_else(|| monitors.first())
            .map(|m| m.id)
            .unwrap_or(0);
        Self {
            monitors,
            primary_monitor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub message: String,
    pub server: ServerDescriptor,
    pub client_id: String,
    pub available_codecs: Vec<Codec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub network_quality: NetworkQuality,
    pub avg_latency: f64,
}

/// Metadata for the binary payload that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub codec: Codec,
    /// Unix time in milliseconds at emission.
    pub timestamp: u64,
    pub quality: u8,
    pub fps: u32,
    pub network_quality: NetworkQuality,
}

/// A server control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(Welcome),
    Heartbeat(Heartbeat),
    FrameMeta(FrameMeta),
    ScreenInfo(ScreenInfo),
    Pong { timestamp: serde_json::Value },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, RemoteError> {
        serde_json::to_string(self).map_err(|e| RemoteError::Encoding(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
