//! Per-client session state.
//!
//! ```text
//!            start_stream            stop_stream
//!   Idle ───────────────► Streaming ─────────────► Stopped
//!    │                      ▲    │                    │
//!    │                      │    └── start_stream ◄───┘
//!    │                      │
//!    └──────────────┬───────┴──── transport close ────► Closed (terminal)
//! ```
//!
//! Every transition out of `Streaming` cancels the pending pacing tick
//! before the state changes, so no tick can fire for a session that is
//! no longer streaming.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::adaptive::{Bounds, Targets};
use crate::config::StreamingConfig;
use crate::frame::FrameRequest;
use crate::protocol::{Codec, StreamRequest};
use crate::quality::{NetworkQuality, NetworkQualityEstimator};

// ── SessionId ────────────────────────────────────────────────────

/// Last millisecond stamp handed out; keeps ids strictly increasing.
static LAST_ID_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Opaque session identifier: `<peer-ip>_<unix-millis>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Derive an id from the peer address and the current time.
    ///
    /// The millisecond part never repeats within the process, so two
    /// peers connecting in the same millisecond still get distinct ids.
    pub fn generate(peer: IpAddr) -> Self {
        let now = unix_millis();
        let mut last = LAST_ID_MILLIS.load(Ordering::Relaxed);
        let stamp = loop {
            let next = now.max(last + 1);
            match LAST_ID_MILLIS.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(actual) => last = actual,
            }
        };
        Self(format!("{peer}_{stamp}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── StreamState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Connected, never streamed.
    #[default]
    Idle,
    Streaming,
    Stopped,
    /// Transport gone. Terminal.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Server-side state for one connected controller.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    state: StreamState,

    target_fps: u32,
    target_quality: u8,
    codec: Codec,
    monitor: u32,

    fps_bounds: Bounds,
    /// Session ceiling; `start_stream{maxFps}` may lower it.
    fps_ceiling: u32,
    quality_bounds: Bounds,

    frame_count: u64,
    total_bytes_sent: u64,
    network: NetworkQualityEstimator,
    last_frame_sent_at: Option<Instant>,

    /// Deadline of the single outstanding pacing tick.
    pending_tick: Option<Instant>,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr, config: &StreamingConfig) -> Self {
        let network = if config.monitoring_enabled {
            NetworkQualityEstimator::new(config.thresholds)
        } else {
            NetworkQualityEstimator::disabled(config.thresholds)
        };
        Self {
            id,
            peer,
            state: StreamState::Idle,
            target_fps: config.fps_bounds.clamp(config.default_fps),
            target_quality: config.quality_bounds.clamp(u32::from(config.default_quality)) as u8,
            codec: config.default_codec.clone(),
            monitor: config.default_monitor,
            fps_bounds: config.fps_bounds,
            fps_ceiling: config.fps_bounds.max,
            quality_bounds: config.quality_bounds,
            frame_count: 0,
            total_bytes_sent: 0,
            network,
            last_frame_sent_at: None,
            pending_tick: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == StreamState::Streaming
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn target_quality(&self) -> u8 {
        self.target_quality
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn monitor(&self) -> u32 {
        self.monitor
    }

    pub fn fps_ceiling(&self) -> u32 {
        self.fps_ceiling
    }

    /// Effective fps range for this session.
    pub fn fps_bounds(&self) -> Bounds {
        self.fps_bounds.with_max(self.fps_ceiling)
    }

    pub fn quality_bounds(&self) -> Bounds {
        self.quality_bounds
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent
    }

    pub fn network(&self) -> &NetworkQualityEstimator {
        &self.network
    }

    pub fn network_quality(&self) -> NetworkQuality {
        self.network.classify()
    }

    pub fn targets(&self) -> Targets {
        Targets {
            fps: self.target_fps,
            quality: self.target_quality,
        }
    }

    pub fn frame_request(&self) -> FrameRequest {
        FrameRequest {
            monitor: self.monitor,
            codec: self.codec.clone(),
            quality: self.target_quality,
        }
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Apply client overrides. Absent (or zero) fields keep their
    /// current value; everything is clamped into bounds.
    ///
    /// `honour_max_fps` is set for `start_stream`, which resets the
    /// session ceiling to `maxFps` (or the configured maximum).
    pub fn apply_request(&mut self, request: &StreamRequest, honour_max_fps: bool) {
        if honour_max_fps {
            self.fps_ceiling = match request.max_fps {
                Some(max) if max > 0 => self.fps_bounds.with_max(max).max,
                _ => self.fps_bounds.max,
            };
        }
        if let Some(fps) = request.fps.filter(|f| *f > 0) {
            self.target_fps = fps;
        }
        if let Some(quality) = request.quality.filter(|q| *q > 0) {
            self.target_quality = self.quality_bounds.clamp(quality) as u8;
        }
        if let Some(codec) = &request.codec {
            self.codec = codec.clone();
        }
        if let Some(monitor) = request.monitor {
            self.monitor = monitor;
        }
        self.target_fps = self.fps_bounds().clamp(self.target_fps);
    }

    /// Replace both targets, clamped into bounds.
    pub fn set_targets(&mut self, targets: Targets) {
        self.target_fps = self.fps_bounds().clamp(targets.fps);
        self.target_quality = self.quality_bounds.clamp(u32::from(targets.quality)) as u8;
    }

    // ── Transitions ──────────────────────────────────────────────

    /// `Idle | Stopped → Streaming`, with the first tick due at `now`.
    ///
    /// The inter-frame clock restarts, so the pause before a restart is
    /// never recorded as a latency sample.
    ///
    /// Returns `false` (and changes nothing) when already streaming or
    /// closed.
    pub fn begin_streaming(&mut self, now: Instant) -> bool {
        match self.state {
            StreamState::Idle | StreamState::Stopped => {
                self.state = StreamState::Streaming;
                self.pending_tick = Some(now);
                self.last_frame_sent_at = None;
                true
            }
            StreamState::Streaming | StreamState::Closed => false,
        }
    }

    /// `* → Stopped` (except `Closed`). Cancels the pending tick first.
    ///
    /// Returns `true` if the state changed.
    pub fn stop(&mut self) -> bool {
        self.pending_tick = None;
        match self.state {
            StreamState::Stopped | StreamState::Closed => false,
            StreamState::Idle | StreamState::Streaming => {
                self.state = StreamState::Stopped;
                true
            }
        }
    }

    /// `* → Closed`. Returns `true` only the first time.
    pub fn close(&mut self) -> bool {
        self.pending_tick = None;
        if self.state == StreamState::Closed {
            return false;
        }
        self.state = StreamState::Closed;
        true
    }

    // ── Pacing timer ─────────────────────────────────────────────

    /// Deadline of the outstanding tick, if any.
    pub fn pending_tick(&self) -> Option<Instant> {
        self.pending_tick
    }

    /// Consume the outstanding tick. Returns `false` if there was none.
    pub fn take_tick(&mut self) -> bool {
        self.pending_tick.take().is_some()
    }

    /// Arm the next tick `delay` from `now`, replacing any other.
    ///
    /// Ignored unless streaming.
    pub fn schedule_tick(&mut self, now: Instant, delay: Duration) {
        if self.is_streaming() {
            self.pending_tick = Some(now + delay);
        }
    }

    // ── Frame accounting ─────────────────────────────────────────

    /// Account for one delivered frame of `size` bytes at `now`.
    ///
    /// Returns the inter-frame latency sample that was recorded, if a
    /// previous frame exists.
    pub fn record_delivery(&mut self, size: usize, now: Instant) -> Option<Duration> {
        self.frame_count += 1;
        self.total_bytes_sent += size as u64;

        let sample = self
            .last_frame_sent_at
            .map(|prev| now.saturating_duration_since(prev));
        if let Some(latency) = sample {
            self.network.record_sample(latency);
        }
        self.last_frame_sent_at = Some(now);
        sample
    }

    /// Average bytes per frame in KiB, for stats lines.
    pub fn average_frame_kib(&self) -> f64 {
        if self.frame_count == 0 {
            return 0.0;
        }
        self.total_bytes_sent as f64 / self.frame_count as f64 / 1024.0
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId::from("10.0.0.2_1"),
            "10.0.0.2:5000".parse().unwrap(),
            &StreamingConfig::default(),
        )
    }

    #[test]
    fn ids_are_unique_within_a_millisecond() {
        let ip: IpAddr = "192.168.1.7".parse().unwrap();
        let a = SessionId::generate(ip);
        let b = SessionId::generate(ip);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("192.168.1.7_"));
    }

    #[test]
    fn starts_idle_with_defaults() {
        let s = session();
        assert_eq!(s.state(), StreamState::Idle);
        assert_eq!(s.target_fps(), 10);
        assert_eq!(s.target_quality(), 70);
        assert_eq!(s.codec(), &Codec::Jpeg);
        assert!(s.pending_tick().is_none());
    }

    #[test]
    fn streaming_arms_exactly_one_tick() {
        let mut s = session();
        let now = Instant::now();
        assert!(s.begin_streaming(now));
        assert_eq!(s.pending_tick(), Some(now));
        assert!(!s.begin_streaming(now + Duration::from_secs(1)));
        assert_eq!(s.pending_tick(), Some(now));
    }

    #[test]
    fn stop_cancels_and_is_idempotent() {
        let mut s = session();
        s.begin_streaming(Instant::now());
        assert!(s.stop());
        assert_eq!(s.state(), StreamState::Stopped);
        assert!(s.pending_tick().is_none());

        assert!(!s.stop());
        assert_eq!(s.state(), StreamState::Stopped);
        assert!(s.pending_tick().is_none());
    }

    #[test]
    fn close_is_terminal_and_once() {
        let mut s = session();
        s.begin_streaming(Instant::now());
        assert!(s.close());
        assert!(!s.close());
        assert!(!s.begin_streaming(Instant::now()));
        assert!(!s.stop());
        assert_eq!(s.state(), StreamState::Closed);
        assert!(s.pending_tick().is_none());
    }

    #[test]
    fn schedule_is_ignored_when_not_streaming() {
        let mut s = session();
        s.schedule_tick(Instant::now(), Duration::from_millis(100));
        assert!(s.pending_tick().is_none());
    }

    #[test]
    fn requests_are_clamped() {
        let mut s = session();
        s.apply_request(
            &StreamRequest {
                fps: Some(120),
                quality: Some(100),
                ..StreamRequest::default()
            },
            true,
        );
        assert_eq!(s.target_fps(), 30);
        assert_eq!(s.target_quality(), 90);

        s.apply_request(
            &StreamRequest {
                fps: Some(1),
                quality: Some(3),
                ..StreamRequest::default()
            },
            false,
        );
        assert_eq!(s.target_fps(), 5);
        assert_eq!(s.target_quality(), 40);
    }

    #[test]
    fn max_fps_lowers_the_ceiling_only_on_start() {
        let mut s = session();
        s.apply_request(
            &StreamRequest {
                fps: Some(25),
                max_fps: Some(15),
                ..StreamRequest::default()
            },
            true,
        );
        assert_eq!(s.fps_ceiling(), 15);
        assert_eq!(s.target_fps(), 15);

        // update_settings ignores maxFps.
        s.apply_request(
            &StreamRequest {
                max_fps: Some(60),
                fps: Some(28),
                ..StreamRequest::default()
            },
            false,
        );
        assert_eq!(s.fps_ceiling(), 15);
        assert_eq!(s.target_fps(), 15);

        // maxFps above the configured maximum cannot raise it.
        s.apply_request(
            &StreamRequest {
                max_fps: Some(240),
                ..StreamRequest::default()
            },
            true,
        );
        assert_eq!(s.fps_ceiling(), 30);
    }

    #[test]
    fn absent_fields_keep_previous_values() {
        let mut s = session();
        s.apply_request(
            &StreamRequest {
                fps: Some(20),
                codec: Some(Codec::H264),
                monitor: Some(1),
                ..StreamRequest::default()
            },
            true,
        );
        s.apply_request(&StreamRequest::default(), true);
        assert_eq!(s.target_fps(), 20);
        assert_eq!(s.codec(), &Codec::H264);
        assert_eq!(s.monitor(), 1);
    }

    #[test]
    fn delivery_accounting() {
        let mut s = session();
        let t0 = Instant::now();
        assert_eq!(s.record_delivery(1024, t0), None);
        let sample = s.record_delivery(2048, t0 + Duration::from_millis(40));
        assert_eq!(sample, Some(Duration::from_millis(40)));
        assert_eq!(s.frame_count(), 2);
        assert_eq!(s.total_bytes_sent(), 3072);
        assert_eq!(s.network().len(), 1);
        assert!((s.average_frame_kib() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn restart_does_not_sample_the_pause() {
        let mut s = session();
        let t0 = Instant::now();
        s.begin_streaming(t0);
        s.record_delivery(100, t0);
        s.record_delivery(100, t0 + Duration::from_millis(20));
        s.stop();

        let resumed = t0 + Duration::from_secs(60);
        assert!(s.begin_streaming(resumed));
        assert_eq!(s.record_delivery(100, resumed), None);
        assert_eq!(s.network().len(), 1);
        assert_eq!(
            s.record_delivery(100, resumed + Duration::from_millis(20)),
            Some(Duration::from_millis(20))
        );
        assert_eq!(s.network_quality(), NetworkQuality::Excellent);
    }
}
