//! Thread-safe set of live sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::Utf8Bytes;
use tracing::{debug, trace};

use super::session::{Session, SessionId};

/// Sessions currently open on one server.
///
/// Broadcast and shutdown work on a snapshot taken under the lock, so
/// sessions may register or leave concurrently without invalidating the
/// iteration.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next session id.
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Add a session. Refused (false) when the session is already closing,
    /// which covers a connection accepted while the server shuts down.
    pub fn register(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if session.is_closing() {
            return false;
        }
        trace!("Registering session {}", session.id());
        sessions.insert(session.id(), session);
        true
    }

    /// Remove a session if present.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if removed.is_some() {
            trace!("Removed session {}", id);
        }
        removed
    }

    /// Copy of the current membership.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` on every registered session; returns how many.
    pub fn broadcast(&self, message: &Utf8Bytes) -> usize {
        let sessions = self.snapshot();
        for session in &sessions {
            session.send(message.clone());
        }
        trace!("Broadcast {} bytes to {} session(s)", message.as_str().len(), sessions.len());
        sessions.len()
    }

    /// Close and forget every session, returning them so the caller can wait
    /// for their tasks to finish.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, session)| session).collect()
        };
        for session in &sessions {
            session.close();
        }
        debug!("Closed {} session(s)", sessions.len());
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::sync::CancellationToken;

    fn open(registry: &Arc<SessionRegistry>) -> (Arc<Session>, UnboundedReceiver<Utf8Bytes>) {
        let remote: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (session, queued) =
            Session::new(registry.next_id(), remote, registry, CancellationToken::new());
        assert!(registry.register(session.clone()));
        (session, queued)
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_broadcast_reaches_every_session_once() {
        let registry = Arc::new(SessionRegistry::new());
        let mut queues: Vec<_> = (0..3).map(|_| open(&registry).1).collect();

        let delivered = registry.broadcast(&Utf8Bytes::from_static("frame\n"));
        assert_eq!(delivered, 3);

        for queued in &mut queues {
            assert_eq!(queued.try_recv().unwrap().as_str(), "frame\n");
            assert!(queued.try_recv().is_err());
        }
    }

    #[test]
    fn test_broadcast_preserves_order_per_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (_session, mut queued) = open(&registry);

        for text in ["one\n", "two\n", "three\n"] {
            registry.broadcast(&Utf8Bytes::from_static(text));
        }

        let received: Vec<String> = std::iter::from_fn(|| queued.try_recv().ok())
            .map(|m| m.as_str().to_string())
            .collect();
        assert_eq!(received, vec!["one\n", "two\n", "three\n"]);
    }

    #[test]
    fn test_closed_session_leaves_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let (first, _q1) = open(&registry);
        let (_second, _q2) = open(&registry);

        first.close();
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(first.id()).is_none());
        assert_eq!(registry.broadcast(&Utf8Bytes::from_static("x\n")), 1);
    }

    #[test]
    fn test_close_all_empties_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let (_a, _qa) = open(&registry);
        let (_b, _qb) = open(&registry);

        let closed = registry.close_all();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|s| s.is_closing()));
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&Utf8Bytes::from_static("x\n")), 0);
    }
}
