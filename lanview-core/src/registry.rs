//! Registry of live sessions.
//!
//! The accept loop registers every session before its actor starts and
//! the actor deregisters itself exactly once when it closes. Every
//! session token is a child of one registry-wide token, so a shutdown
//! also reaches sessions that register while it is in progress.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RemoteError;
use crate::session::state::SessionId;

#[derive(Debug)]
struct SessionEntry {
    peer: SocketAddr,
    registered_at: Instant,
}

/// Shared map of session id → entry.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    inner: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    shutdown: CancellationToken,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    ///
    /// Fails once [`shutdown_all`](Self::shutdown_all) has run, when the
    /// id is already present, or when `limit` sessions are already
    /// registered. The returned token is cancelled by `shutdown_all`.
    pub async fn register(
        &self,
        id: SessionId,
        peer: SocketAddr,
        limit: Option<usize>,
    ) -> Result<CancellationToken, RemoteError> {
        let mut map = self.inner.write().await;
        if self.shutdown.is_cancelled() {
            return Err(RemoteError::ShuttingDown);
        }
        if let Some(limit) = limit.filter(|l| map.len() >= *l) {
            return Err(RemoteError::CapacityReached { limit });
        }
        if map.contains_key(&id) {
            return Err(RemoteError::DuplicateSession(id.to_string()));
        }
        map.insert(
            id,
            SessionEntry {
                peer,
                registered_at: Instant::now(),
            },
        );
        Ok(self.shutdown.child_token())
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub async fn deregister(&self, id: &SessionId) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Cancel every session's token and refuse further registrations.
    /// Entries stay until each session deregisters itself. Returns how
    /// many were signalled.
    pub async fn shutdown_all(&self) -> usize {
        let map = self.inner.write().await;
        self.shutdown.cancel();
        for (id, entry) in map.iter() {
            debug!(
                "signalling {id} ({}) after {:?}",
                entry.peer,
                entry.registered_at.elapsed()
            );
        }
        map.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
