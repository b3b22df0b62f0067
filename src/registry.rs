//! The server's collection of active connections.
//!
//! Spec §3 leaves the collection type as "a configuration knob" with the
//! invariant that add/remove are serialized against iteration for broadcasts
//! and shutdown. This module formalizes that as a trait so callers can
//! substitute a concurrent set (e.g. copy-on-write) without touching the
//! reactor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::Sender;
use tokio::sync::Notify;

use crate::event::ID;
use crate::frame::{CloseCode, Frame};
use crate::state::ConnectionActivity;

/// A handle the registry keeps per connection: just enough to push an
/// outbound frame (e.g. a broadcast or a shutdown CLOSE), observe
/// liveness, or force a teardown (the heartbeat's unanswered-ping path)
/// without touching the connection's internal state machine directly.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ID,
    pub outbound: Sender<Frame>,
    pub max_frame_size: usize,
    pub activity: Arc<ConnectionActivity>,
    /// Notified to force this connection's reader task to tear down
    /// immediately, bypassing the close handshake — used when an unanswered
    /// heartbeat ping ends the connection with 1006.
    pub shutdown: Arc<Notify>,
    /// Routes an application-initiated close through the connection's own
    /// state machine (owned by its reader task) instead of writing a CLOSE
    /// frame directly onto `outbound`, so `ReadyState` and close bookkeeping
    /// stay authoritative (local close() moves the connection to Closing).
    pub close_tx: Sender<(CloseCode, String)>,
}

/// Three operations, consistent with a snapshot of add/remove up to the
/// call — implementers choose the synchronization strategy.
pub trait ConnectionRegistry: Send + Sync {
    fn add(&self, handle: ConnectionHandle);
    fn remove(&self, id: ID);
    fn snapshot(&self) -> Vec<ConnectionHandle>;
}

/// Default mutex-guarded implementation.
#[derive(Default)]
pub struct MutexConnectionRegistry {
    inner: Mutex<HashMap<ID, ConnectionHandle>>,
}

impl MutexConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for MutexConnectionRegistry {
    fn add(&self, handle: ConnectionHandle) {
        self.inner.lock().unwrap().insert(handle.id, handle);
    }

    fn remove(&self, id: ID) {
        self.inner.lock().unwrap().remove(&id);
    }

    fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::generate_new_uuid;

    #[test]
    fn add_remove_snapshot() {
        let registry = MutexConnectionRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let (close_tx, _close_rx) = tokio::sync::mpsc::channel(1);
        let id = generate_new_uuid();
        registry.add(ConnectionHandle {
            id,
            outbound: tx,
            max_frame_size: 16 << 20,
            activity: Arc::new(ConnectionActivity::new()),
            shutdown: Arc::new(Notify::new()),
            close_tx,
        });
        assert_eq!(registry.snapshot().len(), 1);
        registry.remove(id);
        assert_eq!(registry.snapshot().len(), 0);
    }
}
