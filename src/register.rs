//! Session registry.
//!
//! The register is the only owner of sessions. Adding a session also starts
//! the upstream stream bound to the session's transport adapter; removing a
//! session closes it, which tears the stream down through the adapter.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::SessionNotFound;
use crate::session::Session;
use crate::transport::BoshTransport;

/// Hook invoked with the transport adapter of every newly added session.
///
/// Implementations typically spawn the upstream stream over the adapter; the
/// hook must not block.
pub type StreamHook = Arc<dyn Fn(BoshTransport) + Send + Sync>;

/// Shared map of session id to live session.
#[derive(Clone)]
pub struct Register {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    on_add: StreamHook,
}

impl Register {
    /// Create a register whose `on_add` hook starts the upstream stream for
    /// each new session.
    #[must_use]
    pub fn new(on_add: impl Fn(BoshTransport) + Send + Sync + 'static) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            on_add: Arc::new(on_add),
        }
    }

    /// Add a session under `sid` and start its upstream stream.
    pub async fn add(&self, sid: String, session: Session) {
        let transport = BoshTransport::new(session.clone());
        self.sessions.write().await.insert(sid.clone(), session);
        tracing::info!(sid = %sid, "registered session");
        (self.on_add)(transport);
    }

    /// Remove the session under `sid`, closing it if it was present.
    pub async fn remove(&self, sid: &str) {
        if let Some(session) = self.sessions.write().await.remove(sid) {
            session.close();
            tracing::info!(sid, "removed session");
        }
    }

    /// Find the live session under `sid`.
    ///
    /// An expired session counts as absent: the entry is removed and the
    /// lookup misses.
    ///
    /// # Errors
    ///
    /// Returns [`SessionNotFound`] for unknown and expired session ids.
    pub async fn lookup(&self, sid: &str) -> Result<Session, SessionNotFound> {
        let session = self
            .sessions
            .read()
            .await
            .get(sid)
            .cloned()
            .ok_or(SessionNotFound)?;
        if session.expired() {
            tracing::debug!(sid, "looked up expired session");
            self.remove(sid).await;
            return Err(SessionNotFound);
        }
        Ok(session)
    }
}

impl std::fmt::Debug for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Register").finish_non_exhaustive()
    }
}
