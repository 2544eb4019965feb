//! Capture + encode pipeline behind the core's [`FrameSource`] seam.
//!
//! Platform capturers are not `Send`, so one dedicated thread owns the
//! active capturer and serves grab requests over a channel. Encoding
//! runs on the blocking pool so it never stalls a session actor.
//!
//! ```text
//! session ──(monitor, oneshot)──► capture thread ──raw──► spawn_blocking(encode) ──► session
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lanview_core::{EncodedFrame, FrameRequest, FrameSource, MonitorInfo, RawScreenFrame, RemoteError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capture::{self, ScreenCapturer};
use crate::config::CaptureBackend;
use crate::encoder::JpegEncoder;

type GrabReply = Result<Option<Arc<RawScreenFrame>>, RemoteError>;

struct GrabRequest {
    monitor: u32,
    reply: oneshot::Sender<GrabReply>,
}

/// Default [`FrameSource`] for the server binary.
pub struct CapturePipeline {
    requests: mpsc::Sender<GrabRequest>,
    encoder: JpegEncoder,
    monitors: Vec<MonitorInfo>,
}

impl CapturePipeline {
    /// Spawn the capture thread and wait for its monitor list.
    pub async fn start(
        backend: CaptureBackend,
        timeout: Duration,
        encoder: JpegEncoder,
    ) -> Result<Self, RemoteError> {
        let (tx, rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("lanview-capture".into())
            .spawn(move || CaptureWorker::new(backend, timeout).run(rx, ready_tx))?;

        let monitors = ready_rx
            .await
            .map_err(|_| RemoteError::Capture("capture thread exited during startup".into()))?;
        info!(
            "capture backend {:?}: {} monitor(s)",
            backend.resolve(),
            monitors.len()
        );
        Ok(Self {
            requests: tx,
            encoder,
            monitors,
        })
    }

    async fn grab(&self, monitor: u32) -> GrabReply {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(GrabRequest { monitor, reply })
            .await
            .map_err(|_| RemoteError::Capture("capture thread stopped".into()))?;
        rx.await
            .map_err(|_| RemoteError::Capture("capture thread dropped the request".into()))?
    }
}

#[async_trait]
impl FrameSource for CapturePipeline {
    async fn next_frame(&self, request: &FrameRequest) -> Result<Option<EncodedFrame>, RemoteError> {
        let Some(raw) = self.grab(request.monitor).await? else {
            return Ok(None);
        };
        let encoder = self.encoder.clone();
        let quality = request.quality;
        let frame = tokio::task::spawn_blocking(move || encoder.encode(&raw, quality))
            .await
            .map_err(|e| RemoteError::Encode(format!("encoder task failed: {e}")))??;
        Ok(Some(frame))
    }

    fn monitors(&self) -> Vec<MonitorInfo> {
        self.monitors.clone()
    }
}

// ── Capture thread ───────────────────────────────────────────────

struct CaptureWorker {
    backend: CaptureBackend,
    timeout: Duration,
    active: Option<(u32, Box<dyn ScreenCapturer>)>,
    /// Last good frame, replayed when the desktop has not changed.
    last: Option<(u32, Arc<RawScreenFrame>)>,
}

impl CaptureWorker {
    fn new(backend: CaptureBackend, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            active: None,
            last: None,
        }
    }

    fn run(mut self, mut requests: mpsc::Receiver<GrabRequest>, ready: oneshot::Sender<Vec<MonitorInfo>>) {
        let monitors = capture::monitors(self.backend).unwrap_or_else(|e| {
            warn!("monitor enumeration failed: {e}");
            Vec::new()
        });
        if ready.send(monitors).is_err() {
            return;
        }

        while let Some(request) = requests.blocking_recv() {
            let result = self.grab(request.monitor);
            // The session may have gone away while we were capturing.
            let _ = request.reply.send(result);
        }
        debug!("capture thread exiting");
    }

    fn grab(&mut self, monitor: u32) -> GrabReply {
        if self.active.as_ref().map(|(m, _)| *m) != Some(monitor) {
            self.active = None;
            let capturer = capture::open(self.backend, monitor)?;
            debug!("capturing monitor {monitor} at {:?}", capturer.size());
            self.active = Some((monitor, capturer));
        }
        let Some((_, capturer)) = self.active.as_mut() else {
            return Ok(None);
        };

        match capturer.capture(self.timeout) {
            Ok(frame) => {
                let frame = Arc::new(frame);
                self.last = Some((monitor, Arc::clone(&frame)));
                Ok(Some(frame))
            }
            Err(RemoteError::Timeout(_)) => Ok(self
                .last
                .as_ref()
                .filter(|(m, _)| *m == monitor)
                .map(|(_, f)| {
                    debug!("desktop unchanged; replaying frame from {:?} ago", f.captured_at.elapsed());
                    Arc::clone(f)
                })),
            Err(e) => {
                // Access lost (mode change, secure desktop); reopen next time.
                self.active = None;
                Err(e)
            }
        }
    }
}
