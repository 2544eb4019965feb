//! Service wiring.
//!
//! Builds the default collaborators from configuration, binds the
//! WebSocket listener and the discovery socket, and runs both until
//! the stop token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lanview_core::{
    DiscoveryResponder, FrameSource, InputActuator, RemoteError, ServerInfo, SessionContext,
    StreamServer,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::encoder::{FitInside, JpegEncoder};
use crate::host;
use crate::input::SendInputActuator;
use crate::pipeline::CapturePipeline;

// ── RemoteService ────────────────────────────────────────────────

/// The top-level screen streaming service.
pub struct RemoteService {
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl RemoteService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// A token that stops the service when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Run with the default collaborators until stopped.
    pub async fn run(&self) -> Result<(), RemoteError> {
        self.start().await?.wait().await
    }

    /// Build the capture pipeline and input actuator, then bind.
    pub async fn start(&self) -> Result<RunningService, RemoteError> {
        let encoder = JpegEncoder::new(FitInside::from_config(&self.config.compression.resize));
        let frames = CapturePipeline::start(
            self.config.capture.backend,
            Duration::from_millis(u64::from(self.config.capture.timeout_ms)),
            encoder,
        )
        .await?;
        self.start_with(Arc::new(frames), Arc::new(SendInputActuator::new()))
            .await
    }

    /// Bind both listeners around the given collaborators.
    ///
    /// Fails only if a socket cannot be bound.
    pub async fn start_with(
        &self,
        frames: Arc<dyn FrameSource>,
        input: Arc<dyn InputActuator>,
    ) -> Result<RunningService, RemoteError> {
        let streaming = self.config.to_streaming_config();
        let identity = streaming.identity.clone();
        let ctx = SessionContext::new(streaming, frames, input);

        let server =
            StreamServer::bind(self.config.websocket_addr(), ctx, self.config.max_clients()).await?;
        let stream_addr = server.local_addr()?;

        let announced = ServerInfo::new(
            &identity,
            host::advertised_ip(&self.config.server.advertise_ip),
            host::advertised_hostname(&self.config.server.hostname),
            stream_addr.port(),
        );
        info!(
            "advertising {} ({}) port {}",
            announced.hostname, announced.ip, announced.port
        );
        let discovery = DiscoveryResponder::bind(self.config.discovery_addr(), announced).await?;
        let discovery_addr = discovery.local_addr()?;

        let server_task = tokio::spawn(server.run(self.shutdown.clone()));
        let discovery_task = tokio::spawn(discovery.run(self.shutdown.clone()));

        Ok(RunningService {
            stream_addr,
            discovery_addr,
            server_task,
            discovery_task,
        })
    }
}

// ── RunningService ───────────────────────────────────────────────

/// Handles to a bound, running service.
pub struct RunningService {
    stream_addr: SocketAddr,
    discovery_addr: SocketAddr,
    server_task: JoinHandle<Result<(), RemoteError>>,
    discovery_task: JoinHandle<Result<(), RemoteError>>,
}

impl RunningService {
    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// Wait for both listeners to finish.
    pub async fn wait(self) -> Result<(), RemoteError> {
        let (server, discovery) = tokio::join!(self.server_task, self.discovery_task);
        server.map_err(|e| RemoteError::Other(format!("stream server task: {e}")))??;
        discovery.map_err(|e| RemoteError::Other(format!("discovery task: {e}")))??;
        info!("service stopped");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
