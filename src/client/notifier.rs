//! The "session irrecoverably expired" side channel.
//!
//! The pipeline only *emits* the signal; whoever owns the UI decides what a
//! re-authentication prompt looks like.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

/// Receives the session-expired signal.
///
/// Called at most once per failed refresh cycle. Implementations must be
/// cheap and must not block: the call happens on the request path.
pub trait SessionNotifier: Send + Sync {
    fn session_expired(&self);
}

/// Discards the signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl SessionNotifier for NoopNotifier {
    fn session_expired(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Expired,
}

/// Fans the signal out to any number of subscribers over a
/// [`broadcast`] channel. Sending with nobody subscribed is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}

impl fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastNotifier")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl SessionNotifier for BroadcastNotifier {
    fn session_expired(&self) {
        let delivered = self.tx.send(SessionEvent::Expired).unwrap_or(0);
        debug!(subscribers = delivered, "session expired signal sent");
    }
}
