//! A single accepted WebSocket connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::registry::SessionRegistry;
use crate::state::{AtomicState, SessionState};

/// Identifier assigned by the registry, unique per server instance.
pub type SessionId = u64;

/// Upper bound on the closing handshake with a peer.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Server-side state of one client connection.
///
/// The registry owns the only long-lived strong reference; the session task
/// holds another while it runs. The session refers back to the registry
/// weakly, so dropping the server never leaks sessions.
pub struct Session {
    id: SessionId,
    remote: SocketAddr,
    state: AtomicState<SessionState>,
    closing: AtomicBool,
    outbox: mpsc::UnboundedSender<Utf8Bytes>,
    pending: AtomicUsize,
    registry: Weak<SessionRegistry>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session in `Accepting`, returning the receiving end of its
    /// outbound queue for [`run`].
    pub fn new(
        id: SessionId,
        remote: SocketAddr,
        registry: &Arc<SessionRegistry>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Utf8Bytes>) {
        let (outbox, queued) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id,
            remote,
            state: AtomicState::new(SessionState::Accepting),
            closing: AtomicBool::new(false),
            outbox,
            pending: AtomicUsize::new(0),
            registry: Arc::downgrade(registry),
            cancel,
        });
        (session, queued)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// True once `close` has begun; never resets.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Messages queued but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue one message. Dropped silently once the session is closing.
    ///
    /// The queue is unbounded: a peer that stops reading keeps every frame
    /// in memory until it disconnects or the server stops. [`Session::pending`]
    /// reports the backlog.
    pub fn send(&self, message: Utf8Bytes) {
        if self.is_closing() {
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.outbox.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Leave the registry and stop the session task. Idempotent.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.state.transition(SessionState::Accepting, SessionState::Closing) {
            self.state.transition(SessionState::Open, SessionState::Closing);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.cancel.cancel();
        debug!("Session {} ({}) closing", self.id, self.remote);
    }

    fn fail(&self, operation: &str, err: impl std::fmt::Display) {
        if self.is_closing() {
            debug!("Session {} {} aborted during close: {}", self.id, operation, err);
        } else {
            error!("Session {} {} failed: {}", self.id, operation, err);
        }
        self.close();
    }

    fn finish(&self) {
        self.state.store(SessionState::Closed);
        self.pending.store(0, Ordering::SeqCst);
    }
}

/// Drive an upgraded connection until either side closes it.
///
/// Writes are taken from the session's queue one at a time, so each message
/// is fully written before the next starts. Inbound data is read only to
/// detect close and errors; its content is discarded.
pub async fn run(
    session: Arc<Session>,
    mut queued: mpsc::UnboundedReceiver<Utf8Bytes>,
    mut socket: WebSocket,
) {
    let registered = match session.registry.upgrade() {
        Some(registry) => registry.register(session.clone()),
        None => false,
    };
    if !registered || !session.state.transition(SessionState::Accepting, SessionState::Open) {
        debug!("Session {} accepted during shutdown, closing", session.id);
        session.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, socket.send(Message::Close(None))).await;
        session.finish();
        return;
    }
    info!("Session {} open for {}", session.id, session.remote);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            biased;

            _ = session.cancel.cancelled() => break,

            message = queued.recv() => match message {
                Some(text) => {
                    session.pending.fetch_sub(1, Ordering::SeqCst);
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        session.fail("write", e);
                        break;
                    }
                }
                None => break,
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Session {} closed by peer", session.id);
                    break;
                }
                Some(Ok(_)) => trace!("Session {} discarding inbound message", session.id),
                Some(Err(e)) => {
                    session.fail("read", e);
                    break;
                }
            },
        }
    }

    session.close();
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
    session.finish();
    info!("Session {} closed", session.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_new_session_is_accepting() {
        let registry = Arc::new(SessionRegistry::default());
        let (session, _queued) = Session::new(1, remote(), &registry, CancellationToken::new());
        assert_eq!(session.state(), SessionState::Accepting);
        assert_eq!(session.pending(), 0);
        assert!(!session.is_closing());
    }

    #[test]
    fn test_send_queues_in_order() {
        let registry = Arc::new(SessionRegistry::default());
        let (session, mut queued) = Session::new(1, remote(), &registry, CancellationToken::new());

        session.send(Utf8Bytes::from_static("a\n"));
        session.send(Utf8Bytes::from_static("b\n"));
        assert_eq!(session.pending(), 2);

        assert_eq!(queued.try_recv().unwrap().as_str(), "a\n");
        assert_eq!(queued.try_recv().unwrap().as_str(), "b\n");
    }

    #[test]
    fn test_backlog_of_unread_session_is_reported() {
        let registry = Arc::new(SessionRegistry::default());
        let (session, _queued) = Session::new(1, remote(), &registry, CancellationToken::new());

        for _ in 0..1000 {
            session.send(Utf8Bytes::from_static("001x001#\n"));
        }
        assert_eq!(session.pending(), 1000);

        session.finish();
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_stops_sends() {
        let registry = Arc::new(SessionRegistry::default());
        let cancel = CancellationToken::new();
        let (session, mut queued) = Session::new(1, remote(), &registry, cancel.clone());
        assert!(registry.register(session.clone()));

        session.close();
        session.close();
        assert!(cancel.is_cancelled());
        assert_eq!(session.state(), SessionState::Closing);
        assert!(registry.is_empty());

        session.send(Utf8Bytes::from_static("late\n"));
        assert!(queued.try_recv().is_err());
    }

    #[test]
    fn test_cancelled_parent_closes_session() {
        let registry = Arc::new(SessionRegistry::default());
        let parent = CancellationToken::new();
        let (session, _queued) = Session::new(1, remote(), &registry, parent.child_token());

        parent.cancel();
        assert!(session.is_closing());
        assert!(!registry.register(session));
    }
}
