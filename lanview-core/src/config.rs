//! Resolved runtime configuration for the streaming control plane.
//!
//! The binary crate loads a TOML file and converts it into a
//! [`StreamingConfig`]; the core never touches files itself.

use std::time::Duration;

use crate::adaptive::Bounds;
use crate::protocol::control::Codec;
use crate::quality::QualityThresholds;

/// Identity advertised in `connected` and `server_info` messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: "Screen Remote Server".into(),
            version: "2.0.0".into(),
            capabilities: [
                "screen_capture",
                "mouse_control",
                "keyboard_control",
                "multi_monitor",
                "multi_codec",
                "adaptive_streaming",
                "network_monitoring",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Configuration shared (read-only) by every session.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Frame rate a fresh session starts with.
    pub default_fps: u32,
    /// Floor and ceiling for the frame rate.
    pub fps_bounds: Bounds,
    /// Quality a fresh session starts with (1-100).
    pub default_quality: u8,
    /// Floor and ceiling for the encoder quality.
    pub quality_bounds: Bounds,
    /// Codec a fresh session starts with.
    pub default_codec: Codec,
    /// Monitor a fresh session captures.
    pub default_monitor: u32,
    /// Whether the adaptive controller may move targets.
    pub adaptive_enabled: bool,
    /// Whether latency samples are classified at all.
    pub monitoring_enabled: bool,
    /// Latency cutoffs for the quality label.
    pub thresholds: QualityThresholds,
    /// Server → client heartbeat period.
    pub heartbeat_interval: Duration,
    /// Longest a single outbound message may take to drain before the
    /// peer is treated as gone.
    pub send_timeout: Duration,
    /// Frames between adaptive adjustments.
    pub adapt_every: u64,
    /// Frames between stats log lines.
    pub stats_every: u64,
    /// Codecs listed in the welcome message.
    pub available_codecs: Vec<Codec>,
    pub identity: ServerIdentity,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            default_fps: 10,
            fps_bounds: Bounds::new(5, 30),
            default_quality: 70,
            quality_bounds: Bounds::new(40, 90),
            default_codec: Codec::Jpeg,
            default_monitor: 0,
            adaptive_enabled: true,
            monitoring_enabled: true,
            thresholds: QualityThresholds::default(),
            heartbeat_interval: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            adapt_every: 10,
            stats_every: 30,
            available_codecs: vec![Codec::Jpeg, Codec::Vp8, Codec::Vp9, Codec::H264],
            identity: ServerIdentity::default(),
        }
    }
}

impl StreamingConfig {
    /// Clamp defaults into their bounds so every session starts valid.
    pub fn sanitized(mut self) -> Self {
        self.fps_bounds = self.fps_bounds.normalized().with_min(1);
        self.quality_bounds = self.quality_bounds.normalized().with_min(1).with_max(100);
        self.default_fps = self.fps_bounds.clamp(self.default_fps);
        self.default_quality = self.quality_bounds.clamp(u32::from(self.default_quality)) as u8;
        self.adapt_every = self.adapt_every.max(1);
        self.stats_every = self.stats_every.max(1);
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = Duration::from_secs(30);
        }
        if self.send_timeout.is_zero() {
            self.send_timeout = Duration::from_secs(10);
        }
        self
    }
}
