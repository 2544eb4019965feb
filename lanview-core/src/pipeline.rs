//! Collaborator seams.
//!
//! Capturing, encoding and injecting input are platform work that the
//! session control plane only drives. The binary crate supplies real
//! implementations; tests supply fakes.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::frame::{EncodedFrame, FrameRequest};
use crate::protocol::{KeyboardIntent, MonitorInfo, MouseIntent};

/// Capture + encode collaborator.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Produce one encoded frame.
    ///
    /// `Ok(None)` means "nothing this time" (e.g. the compositor had no
    /// new image and nothing is cached); the pacer skips the emission
    /// but keeps the loop going, exactly as it does for `Err`.
    async fn next_frame(&self, request: &FrameRequest) -> Result<Option<EncodedFrame>, RemoteError>;

    /// Monitors that can be captured.
    fn monitors(&self) -> Vec<MonitorInfo>;
}

/// OS-level input injection collaborator.
#[async_trait]
pub trait InputActuator: Send + Sync {
    async fn mouse(&self, intent: &MouseIntent) -> Result<(), RemoteError>;

    async fn keyboard(&self, intent: &KeyboardIntent) -> Result<(), RemoteError>;
}
