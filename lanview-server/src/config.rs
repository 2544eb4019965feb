//! Configuration for the screen streaming server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use lanview_core::{Bounds, Codec, QualityThresholds, ServerIdentity, StreamingConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening sockets and connection ceiling.
    pub network: NetworkConfig,
    /// Screen capture settings.
    pub capture: CaptureConfig,
    /// Encoder settings.
    pub compression: CompressionConfig,
    /// Heartbeat and latency monitoring.
    pub performance: PerformanceConfig,
    /// Advertised identity.
    pub server: IdentityConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both listeners bind to.
    pub host: IpAddr,
    /// TCP port for WebSocket sessions.
    pub websocket_port: u16,
    /// UDP port for discovery.
    pub discovery_port: u16,
    /// Maximum concurrent sessions (0 = unlimited).
    pub max_clients: usize,
}

/// Which capture provider to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBackend {
    /// DXGI on Windows, test pattern elsewhere.
    #[default]
    Auto,
    Dxgi,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fps: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    /// Monitor index (0 = primary).
    pub default_monitor: u32,
    pub backend: CaptureBackend,
    /// Desktop Duplication acquire timeout in milliseconds.
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Codec a new session starts with.
    pub codec: String,
    pub quality: u8,
    pub min_quality: u8,
    pub max_quality: u8,
    pub resize: ResizeConfig,
    pub adaptive: ToggleConfig,
}

/// Optional downscale before encoding; the image is fitted inside
/// `width` x `height` with its aspect ratio preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub heartbeat_interval_ms: u64,
    /// Per-message send deadline; a peer that stalls longer is dropped.
    pub send_timeout_ms: u64,
    pub network_monitoring: MonitoringConfig,
}

/// Latency thresholds in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    /// Address announced in discovery replies. Empty = auto-detect.
    pub advertise_ip: String,
    /// Hostname announced in discovery replies. Empty = auto-detect.
    pub hostname: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            websocket_port: 9090,
            discovery_port: 9091,
            max_clients: 5,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            min_fps: 5,
            max_fps: 30,
            default_monitor: 0,
            backend: CaptureBackend::Auto,
            timeout_ms: 100,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: "jpeg".into(),
            quality: 70,
            min_quality: 40,
            max_quality: 90,
            resize: ResizeConfig::default(),
            adaptive: ToggleConfig { enabled: true },
        }
    }
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 1280,
            height: 720,
        }
    }
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            send_timeout_ms: 10_000,
            network_monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        let t = QualityThresholds::default();
        Self {
            enabled: true,
            good: t.good,
            fair: t.fair,
            poor: t.poor,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let id = ServerIdentity::default();
        Self {
            name: id.name,
            version: id.version,
            capabilities: id.capabilities,
            advertise_ip: String::new(),
            hostname: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn websocket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.host, self.network.websocket_port)
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.host, self.network.discovery_port)
    }

    /// `None` when the ceiling is disabled.
    pub fn max_clients(&self) -> Option<usize> {
        (self.network.max_clients > 0).then_some(self.network.max_clients)
    }

    /// Resolve into the core's session configuration, with bounds
    /// sanitised (min ≤ default ≤ max).
    pub fn to_streaming_config(&self) -> StreamingConfig {
        let monitoring = &self.performance.network_monitoring;
        let identity = &self.server;
        let defaults = StreamingConfig::default();
        StreamingConfig {
            default_fps: self.capture.fps,
            fps_bounds: Bounds::new(self.capture.min_fps, self.capture.max_fps),
            default_quality: self.compression.quality,
            quality_bounds: Bounds::new(
                u32::from(self.compression.min_quality),
                u32::from(self.compression.max_quality),
            ),
            default_codec: Codec::from(self.compression.codec.clone()),
            default_monitor: self.capture.default_monitor,
            adaptive_enabled: self.compression.adaptive.enabled,
            monitoring_enabled: monitoring.enabled,
            thresholds: QualityThresholds {
                good: monitoring.good,
                fair: monitoring.fair,
                poor: monitoring.poor,
            },
            heartbeat_interval: Duration::from_millis(self.performance.heartbeat_interval_ms),
            send_timeout: Duration::from_millis(self.performance.send_timeout_ms),
            identity: ServerIdentity {
                name: identity.name.clone(),
                version: identity.version.clone(),
                capabilities: identity.capabilities.clone(),
            },
            ..defaults
        }
        .sanitized()
    }
}

// ── Tests ────────────────────────────────────────────────────────
