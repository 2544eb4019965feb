//! Session actor.
//!
//! Each connection is owned by one task running [`run_session`]. The
//! task multiplexes four event sources with `tokio::select!`:
//!
//! - inbound control messages,
//! - the session's pacing deadline,
//! - the heartbeat interval,
//! - the server-wide shutdown token.
//!
//! Because all of them are handled on the same task, a `stop_stream`
//! and a pacing tick can never interleave: whichever is picked first
//! runs to completion, and a stop clears the deadline before the next
//! `select!` is built. Ready sources are picked at random so a burst of
//! pointer events cannot starve the pacing deadline.
//!
//! Handling an event races the shutdown token, and every write goes
//! through a [`DeadlineSink`], so a peer that stops reading is dropped
//! instead of holding the actor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamingConfig;
use crate::error::RemoteError;
use crate::pacer::{FramePacer, TickOutcome};
use crate::pipeline::{FrameSource, InputActuator};
use crate::protocol::{
    ClientMessage, Heartbeat, KeyboardIntent, MouseIntent, ScreenInfo, ServerDescriptor,
    ServerMessage, StreamRequest, Welcome,
};
use crate::registry::ServerRegistry;
use crate::session::state::{Session, SessionId};
use crate::transport::{DeadlineSink, Inbound, SessionSink};

// ── SessionContext ───────────────────────────────────────────────

/// Everything a session shares with the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<StreamingConfig>,
    pub frames: Arc<dyn FrameSource>,
    pub input: Arc<dyn InputActuator>,
    pub registry: ServerRegistry,
}

impl SessionContext {
    pub fn new(
        config: StreamingConfig,
        frames: Arc<dyn FrameSource>,
        input: Arc<dyn InputActuator>,
    ) -> Self {
        Self {
            config: Arc::new(config.sanitized()),
            frames,
            input,
            registry: ServerRegistry::new(),
        }
    }

    /// Current monitor layout as reported by the capture provider.
    pub fn screen_info(&self) -> ScreenInfo {
        ScreenInfo::from_monitors(self.frames.monitors())
    }
}

// ── SessionManager ───────────────────────────────────────────────

/// Owns one [`Session`] and its write half.
pub struct SessionManager<S> {
    session: Session,
    sink: DeadlineSink<S>,
    pacer: FramePacer,
    ctx: SessionContext,
}

impl<S: SessionSink> SessionManager<S> {
    /// The caller is expected to have registered `id` already.
    pub fn new(id: SessionId, peer: SocketAddr, ctx: SessionContext, sink: S) -> Self {
        let session = Session::new(id, peer, &ctx.config);
        let pacer = FramePacer::new(Arc::clone(&ctx.frames), &ctx.config);
        let sink = DeadlineSink::new(sink, ctx.config.send_timeout);
        Self {
            session,
            sink,
            pacer,
            ctx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending_tick(&self) -> Option<Instant> {
        self.session.pending_tick()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.ctx.config.heartbeat_interval
    }

    /// Send `connected`, then `screen_info` if any monitor is known.
    pub async fn greet(&mut self) -> Result<(), RemoteError> {
        let identity = &self.ctx.config.identity;
        let welcome = ServerMessage::Connected(Welcome {
            message: format!("Welcome to {} v{}", identity.name, identity.version),
            server: ServerDescriptor {
                name: identity.name.clone(),
                version: identity.version.clone(),
                capabilities: identity.capabilities.clone(),
            },
            client_id: self.session.id().to_string(),
            available_codecs: self.ctx.config.available_codecs.clone(),
        });
        self.sink.send_message(&welcome).await?;

        let screen = self.ctx.screen_info();
        if !screen.monitors.is_empty() {
            self.sink.send_message(&ServerMessage::ScreenInfo(screen)).await?;
        }
        Ok(())
    }

    /// Handle one text frame. Undecodable input is logged and dropped.
    pub async fn on_text(&mut self, text: &str) -> Result<(), RemoteError> {
        match ClientMessage::parse(text) {
            Ok(msg) => self.on_control_message(msg).await,
            Err(e) => {
                warn!("dropping malformed message: {e}");
                Ok(())
            }
        }
    }

    /// Dispatch one decoded control message.
    ///
    /// Only transport failures are returned; collaborator failures are
    /// logged here.
    pub async fn on_control_message(&mut self, msg: ClientMessage) -> Result<(), RemoteError> {
        match msg {
            ClientMessage::StartStream(request) => {
                self.start_stream(&request);
                Ok(())
            }
            ClientMessage::StopStream => {
                if self.session.stop() {
                    info!("stream stopped after {} frames", self.session.frame_count());
                }
                Ok(())
            }
            ClientMessage::UpdateSettings(request) => {
                self.warn_unknown_codec(&request);
                self.session.apply_request(&request, false);
                info!(
                    "settings updated: codec={}, quality={}, fps={}",
                    self.session.codec(),
                    self.session.target_quality(),
                    self.session.target_fps()
                );
                Ok(())
            }
            ClientMessage::Mouse { data } => {
                mouse(self.ctx.input.as_ref(), &data).await;
                Ok(())
            }
            ClientMessage::Keyboard { data } => {
                keyboard(self.ctx.input.as_ref(), &data).await;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                self.sink.send_message(&ServerMessage::Pong { timestamp }).await
            }
            ClientMessage::GetScreenInfo => {
                let screen = self.ctx.screen_info();
                self.sink.send_message(&ServerMessage::ScreenInfo(screen)).await
            }
            ClientMessage::Unknown => {
                debug!("ignoring unknown message type");
                Ok(())
            }
        }
    }

    fn start_stream(&mut self, request: &StreamRequest) {
        self.warn_unknown_codec(request);
        if self.session.is_streaming() {
            self.session.apply_request(request, false);
            debug!("start_stream while streaming; settings applied");
            return;
        }
        self.session.apply_request(request, true);
        self.session.begin_streaming(Instant::now());
        info!(
            "stream started: codec={}, quality={}, fps={}, monitor={}",
            self.session.codec(),
            self.session.target_quality(),
            self.session.target_fps(),
            self.session.monitor()
        );
    }

    fn warn_unknown_codec(&self, request: &StreamRequest) {
        if let Some(codec) = request.codec.as_ref().filter(|c| !c.is_known()) {
            warn!("unknown codec {codec:?}; frames will still be sent");
        }
    }

    /// Run the pacing tick that just came due.
    pub async fn on_tick(&mut self) -> Result<TickOutcome, RemoteError> {
        self.pacer.tick(&mut self.session, &mut self.sink).await
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), RemoteError> {
        let beat = ServerMessage::Heartbeat(Heartbeat {
            network_quality: self.session.network_quality(),
            avg_latency: self.session.network().average_ms(),
        });
        self.sink.send_message(&beat).await
    }

    /// Tear the session down. Only the first call has any effect.
    pub async fn close(&mut self) {
        if !self.session.close() {
            return;
        }
        self.ctx.registry.deregister(self.session.id()).await;
        if let Err(e) = self.sink.close().await {
            debug!("closing transport: {e}");
        }
        info!(
            "session closed: {} frames, {} bytes",
            self.session.frame_count(),
            self.session.total_bytes_sent()
        );
    }
}

// ── Actor loop ───────────────────────────────────────────────────

/// What woke the actor.
enum Wakeup {
    Text(String),
    Tick,
    Heartbeat,
}

impl<S: SessionSink> SessionManager<S> {
    async fn handle(&mut self, wakeup: Wakeup) -> Result<(), RemoteError> {
        match wakeup {
            Wakeup::Text(text) => self.on_text(&text).await,
            Wakeup::Tick => self.on_tick().await.map(|_| ()),
            Wakeup::Heartbeat => self.send_heartbeat().await,
        }
    }
}

/// Drive a session until the peer leaves, the transport fails, or
/// `shutdown` is cancelled. The session is always closed on return.
pub async fn run_session<S, I>(mut manager: SessionManager<S>, mut inbound: I, shutdown: CancellationToken)
where
    S: SessionSink,
    I: Stream<Item = Inbound> + Unpin,
{
    info!("client connected from {}", manager.session().peer());

    let greeted = tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        result = manager.greet() => result,
    };
    if let Err(e) = greeted {
        warn!("failed to greet client: {e}");
        manager.close().await;
        return;
    }

    let period = manager.heartbeat_interval();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !shutdown.is_cancelled() {
        let deadline = manager.pending_tick();
        let wakeup = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wait_for_tick(deadline) => Wakeup::Tick,
            event = inbound.next() => match event {
                Some(Inbound::Text(text)) => Wakeup::Text(text),
                Some(Inbound::Binary(data)) => {
                    debug!("ignoring {} byte binary message", data.len());
                    continue;
                }
                Some(Inbound::Close) | None => {
                    info!("client disconnected");
                    break;
                }
                Some(Inbound::Error(e)) => {
                    warn!("transport error: {e}");
                    break;
                }
            },
            _ = heartbeat.tick() => Wakeup::Heartbeat,
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = manager.handle(wakeup) => result,
        };
        if let Err(e) = result {
            if e.is_fatal_for_session() {
                warn!("ending session: {e}");
                break;
            }
            warn!("{e}");
        }
    }

    if shutdown.is_cancelled() {
        info!("server shutting down");
    }
    manager.close().await;
}

async fn mouse(input: &dyn InputActuator, intent: &MouseIntent) {
    if matches!(intent, MouseIntent::Unsupported) {
        debug!("ignoring unsupported mouse action");
        return;
    }
    if let Err(e) = input.mouse(intent).await {
        warn!("mouse action failed: {e}");
    }
}

async fn keyboard(input: &dyn InputActuator, intent: &KeyboardIntent) {
    if matches!(intent, KeyboardIntent::Unsupported) {
        debug!("ignoring unsupported keyboard action");
        return;
    }
    if let Err(e) = input.keyboard(intent).await {
        warn!("keyboard action failed: {e}");
    }
}

async fn wait_for_tick(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{EncodedFrame, FrameRequest};
    use crate::protocol::{Codec, MonitorInfo};
    use crate::session::state::StreamState;
    use crate::transport::{ChannelSink, Outbound};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    // ── Fakes ────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeFrames {
        captures: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl FrameSource for FakeFrames {
        async fn next_frame(&self, request: &FrameRequest) -> Result<Option<EncodedFrame>, RemoteError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(RemoteError::Capture("no desktop".into()));
            }
            Ok(Some(EncodedFrame {
                width: 1280,
                height: 720,
                codec: Codec::Jpeg,
                data: vec![request.quality; 32],
            }))
        }

        fn monitors(&self) -> Vec<MonitorInfo> {
            vec![MonitorInfo {
                id: 0,
                name: "Primary".into(),
                width: 1920,
                height: 1080,
                primary: true,
            }]
        }
    }

    #[derive(Default)]
    struct FakeInput {
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InputActuator for FakeInput {
        async fn mouse(&self, intent: &MouseIntent) -> Result<(), RemoteError> {
            self.seen.lock().unwrap().push(format!("{intent:?}"));
            if self.fail {
                return Err(RemoteError::Input("no permission".into()));
            }
            Ok(())
        }

        async fn keyboard(&self, intent: &KeyboardIntent) -> Result<(), RemoteError> {
            self.seen.lock().unwrap().push(format!("{intent:?}"));
            Ok(())
        }
    }

    struct Harness {
        manager: SessionManager<ChannelSink>,
        rx: mpsc::UnboundedReceiver<Outbound>,
        frames: Arc<FakeFrames>,
        input: Arc<FakeInput>,
        ctx: SessionContext,
    }

    async fn harness_with(input: FakeInput) -> Harness {
        let frames = Arc::new(FakeFrames::default());
        let input = Arc::new(input);
        let ctx = SessionContext::new(
            StreamingConfig::default(),
            frames.clone(),
            input.clone(),
        );
        let id = SessionId::from("10.0.0.5_1000");
        let peer: SocketAddr = "10.0.0.5:40000".parse().unwrap();
        ctx.registry.register(id.clone(), peer, None).await.unwrap();
        let (sink, rx) = ChannelSink::pair();
        let manager = SessionManager::new(id, peer, ctx.clone(), sink);
        Harness {
            manager,
            rx,
            frames,
            input,
            ctx,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeInput::default()).await
    }

    fn text(out: Outbound) -> Value {
        match out {
            Outbound::Text(t) => serde_json::from_str(&t).unwrap(),
            Outbound::Binary(b) => panic!("expected text, got {} bytes", b.len()),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    async fn send(h: &mut Harness, msg: Value) {
        h.manager.on_text(&msg.to_string()).await.unwrap();
    }

    // ── Handshake ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn greet_sends_welcome_then_screen_info() {
        let mut h = harness().await;
        h.manager.greet().await.unwrap();
        let out = drain(&mut h.rx);
        assert_eq!(out.len(), 2);

        let welcome = text(out[0].clone());
        assert_eq!(welcome["type"], "connected");
        assert_eq!(welcome["clientId"], "10.0.0.5_1000");
        assert_eq!(welcome["server"]["name"], "Screen Remote Server");
        assert_eq!(welcome["availableCodecs"], json!(["jpeg", "vp8", "vp9", "h264"]));

        let screen = text(out[1].clone());
        assert_eq!(screen["type"], "screen_info");
        assert_eq!(screen["primaryMonitor"], 0);
        assert_eq!(screen["monitors"][0]["width"], 1920);
    }

    // ── Streaming ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn start_stream_uses_defaults_and_emits_meta_then_payload() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "start_stream"})).await;
        assert_eq!(h.manager.session().state(), StreamState::Streaming);
        assert!(h.manager.pending_tick().is_some());

        h.manager.on_tick().await.unwrap();
        let out = drain(&mut h.rx);
        assert_eq!(out.len(), 2);
        let meta = text(out[0].clone());
        assert_eq!(meta["type"], "frame_meta");
        assert_eq!(meta["fps"], 10);
        assert_eq!(meta["quality"], 70);
        assert_eq!(meta["codec"], "jpeg");
        assert_eq!(meta["size"], 32);
        assert_eq!(out[1], Outbound::Binary(vec![70; 32]));
    }

    #[tokio::test(start_paused = true)]
    async fn start_stream_clamps_requested_values() {
        let mut h = harness().await;
        send(
            &mut h,
            json!({"type": "start_stream", "fps": 120, "quality": 100, "codec": "vp9"}),
        )
        .await;
        let s = h.manager.session();
        assert_eq!(s.target_fps(), 30);
        assert_eq!(s.target_quality(), 90);
        assert_eq!(s.codec(), &Codec::Vp9);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_keeps_a_single_tick() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "start_stream"})).await;
        let first = h.manager.pending_tick();
        send(&mut h, json!({"type": "start_stream", "fps": 20})).await;
        assert_eq!(h.manager.pending_tick(), first);
        assert_eq!(h.manager.session().target_fps(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_cancels_the_tick() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "start_stream"})).await;
        send(&mut h, json!({"type": "stop_stream"})).await;
        assert_eq!(h.manager.session().state(), StreamState::Stopped);
        assert!(h.manager.pending_tick().is_none());

        send(&mut h, json!({"type": "stop_stream"})).await;
        assert_eq!(h.manager.session().state(), StreamState::Stopped);
        assert!(h.manager.pending_tick().is_none());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_is_a_noop_for_output() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "stop_stream"})).await;
        assert!(h.manager.pending_tick().is_none());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_settings_clamps_and_ignores_max_fps() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "start_stream", "maxFps": 12})).await;
        send(
            &mut h,
            json!({"type": "update_settings", "fps": 25, "quality": 10, "maxFps": 60}),
        )
        .await;
        let s = h.manager.session();
        assert_eq!(s.fps_ceiling(), 12);
        assert_eq!(s.target_fps(), 12);
        assert_eq!(s.target_quality(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_keeps_streaming() {
        let mut h = harness().await;
        h.frames.failing.store(true, Ordering::SeqCst);
        send(&mut h, json!({"type": "start_stream"})).await;

        let outcome = h.manager.on_tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Skipped);
        assert!(drain(&mut h.rx).is_empty());
        assert!(h.manager.session().is_streaming());
        assert!(h.manager.pending_tick().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_tick_across_control_sequences() {
        let mut h = harness().await;
        let script = [
            "start_stream",
            "update_settings",
            "start_stream",
            "tick",
            "stop_stream",
            "tick",
            "start_stream",
            "tick",
            "stop_stream",
            "stop_stream",
            "start_stream",
        ];
        for step in script {
            match step {
                "tick" => {
                    h.manager.on_tick().await.unwrap();
                }
                kind => send(&mut h, json!({ "type": kind })).await,
            }
            let streaming = h.manager.session().is_streaming();
            assert_eq!(
                h.manager.pending_tick().is_some(),
                streaming,
                "after {step}: tick armed iff streaming"
            );
        }
    }

    // ── Input ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn input_failure_is_contained() {
        let mut h = harness_with(FakeInput {
            fail: true,
            ..FakeInput::default()
        })
        .await;
        send(
            &mut h,
            json!({"type": "mouse", "data": {"action": "click", "button": "left"}}),
        )
        .await;
        assert_eq!(h.input.seen.lock().unwrap().len(), 1);

        send(&mut h, json!({"type": "ping", "timestamp": 7})).await;
        let pong = text(h.rx.try_recv().unwrap());
        assert_eq!(pong, json!({"type": "pong", "timestamp": 7}));
    }

    #[tokio::test(start_paused = true)]
    async fn keyboard_reaches_actuator_and_unsupported_does_not() {
        let mut h = harness().await;
        send(
            &mut h,
            json!({"type": "keyboard", "data": {"action": "type", "text": "hi"}}),
        )
        .await;
        send(
            &mut h,
            json!({"type": "keyboard", "data": {"action": "chord"}}),
        )
        .await;
        let seen = h.input.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("hi"));
    }

    // ── Misc ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unknown_and_malformed_messages_are_ignored() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "reboot"})).await;
        h.manager.on_text("{not json").await.unwrap();
        h.manager.on_text(r#"{"fps": 10}"#).await.unwrap();
        assert!(drain(&mut h.rx).is_empty());
        assert_eq!(h.manager.session().state(), StreamState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_echoes_timestamp_verbatim() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "ping", "timestamp": "abc"})).await;
        send(&mut h, json!({"type": "ping"})).await;
        let out = drain(&mut h.rx);
        assert_eq!(text(out[0].clone())["timestamp"], "abc");
        assert_eq!(text(out[1].clone())["timestamp"], Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reports_unknown_before_samples() {
        let mut h = harness().await;
        h.manager.send_heartbeat().await.unwrap();
        let beat = text(h.rx.try_recv().unwrap());
        assert_eq!(beat["type"], "heartbeat");
        assert_eq!(beat["networkQuality"], "unknown");
        assert_eq!(beat["avgLatency"], 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_runs_once_and_deregisters() {
        let mut h = harness().await;
        send(&mut h, json!({"type": "start_stream"})).await;
        let id = h.manager.session().id().clone();

        h.manager.close().await;
        assert_eq!(h.manager.session().state(), StreamState::Closed);
        assert!(h.manager.pending_tick().is_none());
        assert!(!h.ctx.registry.contains(&id).await);

        h.manager.close().await;
        assert!(h.ctx.registry.is_empty().await);
    }

    // ── Actor loop ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn actor_streams_until_stop_then_goes_quiet() {
        let h = harness().await;
        let Harness {
            manager,
            mut rx,
            frames,
            ctx,
            ..
        } = h;
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let inbound = tokio_stream_from(in_rx);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session(manager, inbound, shutdown.clone()));

        in_tx
            .send(Inbound::Text(json!({"type": "start_stream"}).to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        in_tx
            .send(Inbound::Text(json!({"type": "stop_stream"}).to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let captured = frames.captures.load(Ordering::SeqCst);
        assert!(captured >= 3, "expected several frames, got {captured}");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(frames.captures.load(Ordering::SeqCst), captured);

        let binaries = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, Outbound::Binary(_)))
            .count();
        assert_eq!(binaries, captured);

        in_tx.send(Inbound::Close).unwrap();
        task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn actor_sends_heartbeats_and_honours_shutdown() {
        let h = harness().await;
        let Harness {
            manager,
            mut rx,
            ctx,
            ..
        } = h;
        let (_in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session(manager, tokio_stream_from(in_rx), shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let beats = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Text(t) if t.contains("heartbeat") => Some(t),
                _ => None,
            })
            .count();
        assert_eq!(beats, 2);

        shutdown.cancel();
        task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    /// Accepts `remaining` messages, then never completes another send.
    struct StallingSink {
        remaining: usize,
    }

    #[async_trait]
    impl SessionSink for StallingSink {
        async fn send(&mut self, _message: Outbound) -> Result<(), RemoteError> {
            if self.remaining == 0 {
                std::future::pending::<()>().await;
            }
            self.remaining -= 1;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    /// Spawn a session whose peer stops reading after the greeting.
    async fn spawn_stalled_session() -> (SessionContext, SessionId, tokio::task::JoinHandle<()>) {
        let ctx = SessionContext::new(
            StreamingConfig::default(),
            Arc::new(FakeFrames::default()),
            Arc::new(FakeInput::default()),
        );
        let id = SessionId::from("10.0.0.9_1");
        let peer: SocketAddr = "10.0.0.9:40000".parse().unwrap();
        let token = ctx.registry.register(id.clone(), peer, None).await.unwrap();
        let manager = SessionManager::new(id.clone(), peer, ctx.clone(), StallingSink { remaining: 2 });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        in_tx
            .send(Inbound::Text(json!({"type": "start_stream"}).to_string()))
            .unwrap();
        let task = tokio::spawn(async move {
            let _keep_open = in_tx;
            run_session(manager, tokio_stream_from(in_rx), token).await;
        });
        (ctx, id, task)
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reaches_a_session_blocked_on_send() {
        let (ctx, id, task) = spawn_stalled_session().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ctx.registry.contains(&id).await);

        ctx.registry.shutdown_all().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session ignored shutdown")
            .unwrap();
        assert!(!ctx.registry.contains(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_is_dropped_after_send_timeout() {
        let (ctx, id, task) = spawn_stalled_session().await;
        let limit = ctx.config.send_timeout;

        tokio::time::timeout(limit + Duration::from_secs(1), task)
            .await
            .expect("stalled send never expired")
            .unwrap();
        assert!(!ctx.registry.contains(&id).await);
    }

    /// Records how much input had been handled when the first frame
    /// was requested.
    struct FrameAfterInput {
        input: Arc<FakeInput>,
        input_seen_at_first_frame: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl FrameSource for FrameAfterInput {
        async fn next_frame(&self, _request: &FrameRequest) -> Result<Option<EncodedFrame>, RemoteError> {
            let seen = self.input.seen.lock().unwrap().len();
            self.input_seen_at_first_frame
                .lock()
                .unwrap()
                .get_or_insert(seen);
            Ok(Some(EncodedFrame {
                width: 8,
                height: 8,
                codec: Codec::Jpeg,
                data: vec![0; 8],
            }))
        }

        fn monitors(&self) -> Vec<MonitorInfo> {
            Vec::new()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn input_backlog_does_not_starve_pacing() {
        const BACKLOG: usize = 50_000;

        let input = Arc::new(FakeInput::default());
        let frames = Arc::new(FrameAfterInput {
            input: input.clone(),
            input_seen_at_first_frame: Mutex::new(None),
        });
        let ctx = SessionContext::new(StreamingConfig::default(), frames.clone(), input.clone());
        let id = SessionId::from("10.0.0.7_1");
        let peer: SocketAddr = "10.0.0.7:40000".parse().unwrap();
        let (sink, mut rx) = ChannelSink::pair();
        let manager = SessionManager::new(id, peer, ctx, sink);

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        in_tx
            .send(Inbound::Text(json!({"type": "start_stream"}).to_string()))
            .unwrap();
        let mv = json!({"type": "mouse", "data": {"action": "move", "dx": 1, "dy": 0}}).to_string();
        for _ in 0..BACKLOG {
            in_tx.send(Inbound::Text(mv.clone())).unwrap();
        }
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session(manager, tokio_stream_from(in_rx), shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(10), async {
            while !matches!(rx.recv().await, Some(Outbound::Binary(_)) | None) {}
        })
        .await
        .expect("no frame was delivered");

        let seen = frames.input_seen_at_first_frame.lock().unwrap().unwrap();
        assert!(seen < BACKLOG, "first frame waited for all {seen} input events");

        shutdown.cancel();
        task.await.unwrap();
    }

    fn tokio_stream_from(
        mut rx: mpsc::UnboundedReceiver<Inbound>,
    ) -> impl Stream<Item = Inbound> + Unpin {
        Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}
