//! Per-session frame pacing.
//!
//! One pacing tick does the full cycle for a streaming session:
//!
//! 1. Ask the [`FrameSource`] for an encoded frame.
//! 2. Send the `frame_meta` text message, then the binary payload.
//! 3. Record the delivery (frame count, bytes, latency sample).
//! 4. Every `adapt_every` frames, let the [`AdaptiveController`] move
//!    the targets.
//! 5. Arm the next tick so that ticks land `1000 / fps` ms apart,
//!    minus the time this one took.
//!
//! Capture and encode failures skip the emission only; the next tick
//! is armed as usual. Transport failures propagate and end the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adaptive::AdaptiveController;
use crate::config::StreamingConfig;
use crate::error::RemoteError;
use crate::frame::EncodedFrame;
use crate::pipeline::FrameSource;
use crate::protocol::{FrameMeta, ServerMessage};
use crate::session::state::{Session, unix_millis};
use crate::transport::{Outbound, SessionSink};

/// What one tick ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame went out.
    Delivered { size: usize },
    /// The collaborator produced nothing (or failed); nothing was sent.
    Skipped,
    /// The session was not streaming; the tick was dropped.
    Inactive,
}

/// Drives capture → encode → send for sessions.
pub struct FramePacer {
    source: Arc<dyn FrameSource>,
    controller: AdaptiveController,
    adapt_every: u64,
    stats_every: u64,
}

impl FramePacer {
    pub fn new(source: Arc<dyn FrameSource>, config: &StreamingConfig) -> Self {
        let controller = AdaptiveController::new(config.quality_bounds, config.fps_bounds);
        let controller = if config.adaptive_enabled {
            controller
        } else {
            controller.disabled()
        };
        Self {
            source,
            controller,
            adapt_every: config.adapt_every.max(1),
            stats_every: config.stats_every.max(1),
        }
    }

    /// Nominal spacing between frames at `fps`.
    pub fn frame_interval(fps: u32) -> Duration {
        Duration::from_millis(1000 / u64::from(fps.max(1)))
    }

    /// Delay until the next tick when the last one took `elapsed`.
    pub fn next_delay(fps: u32, elapsed: Duration) -> Duration {
        Self::frame_interval(fps).saturating_sub(elapsed)
    }

    /// Run one pacing tick for `session`.
    ///
    /// Consumes the pending tick; if the session is still streaming at
    /// the end, exactly one new tick is armed.
    pub async fn tick<S>(&self, session: &mut Session, sink: &mut S) -> Result<TickOutcome, RemoteError>
    where
        S: SessionSink + ?Sized,
    {
        session.take_tick();
        if !session.is_streaming() {
            return Ok(TickOutcome::Inactive);
        }

        let started = Instant::now();
        let request = session.frame_request();

        let outcome = match self.source.next_frame(&request).await {
            Ok(Some(frame)) => {
                let size = self.deliver(session, sink, frame).await?;
                TickOutcome::Delivered { size }
            }
            Ok(None) => {
                debug!("no frame available for monitor {}", request.monitor);
                TickOutcome::Skipped
            }
            Err(e) => {
                warn!("frame capture failed: {e}");
                TickOutcome::Skipped
            }
        };

        if session.is_streaming() {
            let now = Instant::now();
            let delay = Self::next_delay(session.target_fps(), now.saturating_duration_since(started));
            session.schedule_tick(now, delay);
        }
        Ok(outcome)
    }

    async fn deliver<S>(
        &self,
        session: &mut Session,
        sink: &mut S,
        frame: EncodedFrame,
    ) -> Result<usize, RemoteError>
    where
        S: SessionSink + ?Sized,
    {
        let size = frame.size();
        let meta = ServerMessage::FrameMeta(FrameMeta {
            width: frame.width,
            height: frame.height,
            size,
            codec: frame.codec,
            timestamp: unix_millis(),
            quality: session.target_quality(),
            fps: session.target_fps(),
            network_quality: session.network_quality(),
        });
        sink.send_message(&meta).await?;
        sink.send(Outbound::Binary(frame.data)).await?;

        session.record_delivery(size, Instant::now());
        let count = session.frame_count();

        if count % self.adapt_every == 0 {
            let before = session.targets();
            let after = self
                .controller
                .adjust(before, session.network_quality(), session.fps_ceiling());
            if after != before {
                debug!(
                    "adaptive: {} → quality {} fps {}",
                    session.network_quality(),
                    after.quality,
                    after.fps
                );
            }
            session.set_targets(after);
        }

        if count % self.stats_every == 0 {
            info!(
                "{count} frames, avg {:.1} KiB, quality {} ({:.1} ms), fps {}",
                session.average_frame_kib(),
                session.network_quality(),
                session.network().average_ms(),
                session.target_fps()
            );
        }

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRequest;
    use crate::protocol::{Codec, MonitorInfo};
    use crate::session::state::SessionId;
    use crate::transport::ChannelSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        calls: AtomicUsize,
        fail_every: Option<usize>,
    }

    #[async_trait]
    impl FrameSource for FixedSource {
        async fn next_frame(&self, request: &FrameRequest) -> Result<Option<EncodedFrame>, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|k| n % k == 0) {
                return Err(RemoteError::Capture("display asleep".into()));
            }
            Ok(Some(EncodedFrame {
                width: 640,
                height: 360,
                codec: Codec::Jpeg,
                data: vec![request.quality; 100],
            }))
        }

        fn monitors(&self) -> Vec<MonitorInfo> {
            Vec::new()
        }
    }

    fn setup(fail_every: Option<usize>) -> (FramePacer, Session) {
        let config = StreamingConfig::default();
        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
            fail_every,
        });
        let pacer = FramePacer::new(source, &config);
        let session = Session::new(
            SessionId::from("127.0.0.1_1"),
            "127.0.0.1:4000".parse().unwrap(),
            &config,
        );
        (pacer, session)
    }

    #[test]
    fn delay_accounts_for_work_done() {
        assert_eq!(FramePacer::frame_interval(10), Duration::from_millis(100));
        assert_eq!(
            FramePacer::next_delay(10, Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(FramePacer::next_delay(10, Duration::from_millis(250)), Duration::ZERO);
        assert_eq!(FramePacer::frame_interval(0), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sends_meta_then_payload() {
        let (pacer, mut session) = setup(None);
        let (mut sink, mut rx) = ChannelSink::pair();
        session.begin_streaming(Instant::now());

        let outcome = pacer.tick(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, TickOutcome::Delivered { size: 100 });

        let Some(Outbound::Text(meta)) = rx.recv().await else {
            panic!("expected frame_meta first");
        };
        let meta: serde_json::Value = serde_json::from_str(&meta).unwrap();
        assert_eq!(meta["type"], "frame_meta");
        assert_eq!(meta["size"], 100);
        assert_eq!(meta["quality"], 70);
        assert_eq!(meta["fps"], 10);
        assert_eq!(meta["networkQuality"], "unknown");
        assert_eq!(rx.recv().await, Some(Outbound::Binary(vec![70; 100])));

        assert_eq!(session.frame_count(), 1);
        assert!(session.pending_tick().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_session_gets_no_frame_and_no_tick() {
        let (pacer, mut session) = setup(None);
        let (mut sink, mut rx) = ChannelSink::pair();

        let outcome = pacer.tick(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, TickOutcome::Inactive);
        assert!(session.pending_tick().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_skips_but_keeps_pacing() {
        let (pacer, mut session) = setup(Some(1));
        let (mut sink, mut rx) = ChannelSink::pair();
        session.begin_streaming(Instant::now());

        let outcome = pacer.tick(&mut session, &mut sink).await.unwrap();
        assert_eq!(outcome, TickOutcome::Skipped);
        assert!(rx.try_recv().is_err());
        assert!(session.is_streaming());
        assert!(session.pending_tick().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_is_an_error() {
        let (pacer, mut session) = setup(None);
        let (mut sink, rx) = ChannelSink::pair();
        drop(rx);
        session.begin_streaming(Instant::now());

        let err = pacer.tick(&mut session, &mut sink).await.unwrap_err();
        assert!(err.is_fatal_for_session());
        assert_eq!(session.frame_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_link_raises_targets_after_ten_frames() {
        let (pacer, mut session) = setup(None);
        let (mut sink, mut rx) = ChannelSink::pair();
        session.begin_streaming(Instant::now());

        // Frames go out back to back under the paused clock, so every
        // latency sample is ~0 ms and the label is excellent.
        for _ in 0..10 {
            session.schedule_tick(Instant::now(), Duration::ZERO);
            pacer.tick(&mut session, &mut sink).await.unwrap();
        }
        while rx.try_recv().is_ok() {}

        assert_eq!(session.frame_count(), 10);
        assert_eq!(session.target_quality(), 75);
        assert_eq!(session.target_fps(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn targets_only_move_on_every_tenth_frame() {
        let (pacer, mut session) = setup(None);
        let (mut sink, mut rx) = ChannelSink::pair();
        session.begin_streaming(Instant::now());

        let mut history = Vec::new();
        for _ in 0..20 {
            session.schedule_tick(Instant::now(), Duration::ZERO);
            pacer.tick(&mut session, &mut sink).await.unwrap();
            history.push((session.frame_count(), session.target_quality(), session.target_fps()));
        }
        while rx.try_recv().is_ok() {}

        for &(frame, quality, fps) in &history {
            let expected = match frame {
                1..=9 => (70, 10),
                10..=19 => (75, 11),
                _ => (80, 12),
            };
            assert_eq!((quality, fps), expected, "targets after frame {frame}");
        }
    }
}
