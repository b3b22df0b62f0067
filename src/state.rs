//! Connection lifecycle types shared by both the server and client drivers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::frame::CloseCode;

/// The four-valued connection lifecycle. Transitions are monotone: once
/// `Closed`, a connection never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    NotYetConnected,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Mirrors the transition table of the connection state machine: only
    /// forward moves are legal, and `Closed` is terminal. Notably, `Open`
    /// never jumps straight to `Closed` — a close handshake always passes
    /// through `Closing` first and reaches `Closed` only once the
    /// outbound queue has drained. `on_io_error` bypasses this check
    /// entirely (an I/O error can force `Closed` from any state).
    pub fn can_transition_to(self, next: ReadyState) -> bool {
        use ReadyState::*;
        matches!(
            (self, next),
            (NotYetConnected, Open) | (NotYetConnected, Closed) | (Open, Closing) | (Closing, Closed)
        )
    }
}

/// Fixed at construction; governs masking direction per RFC 6455 §5.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Client-originated data frames MUST be masked; server-originated
    /// frames MUST NOT be masked.
    pub fn must_mask_outbound(self) -> bool {
        matches!(self, Role::Client)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    Local,
    Remote,
}

/// Close bookkeeping tracked per connection once a close handshake begins.
#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub reason: String,
    pub initiator: CloseInitiator,
}

impl CloseInfo {
    pub fn new(code: CloseCode, reason: impl Into<String>, initiator: CloseInitiator) -> Self {
        Self {
            code,
            reason: reason.into(),
            initiator,
        }
    }
}

/// Shared liveness bookkeeping for the heartbeat ticker. One
/// instance per connection, held by both the connection's reader task and
/// the heartbeat ticker via an `Arc`.
pub struct ConnectionActivity {
    last_seen: Mutex<Instant>,
    ping_outstanding: AtomicBool,
    closing: AtomicBool,
}

impl ConnectionActivity {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            ping_outstanding: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        }
    }

    /// Set once the connection has queued (or received) a CLOSE frame.
    /// Checked by [`crate::registry::ConnectionHandle`] sends so a broadcast
    /// silently skips a connection mid-close instead of sending a frame
    /// after CLOSE.
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Called on every inbound frame, control or data. Clears the
    /// outstanding-ping flag — any traffic counts as a live connection.
    pub fn mark_seen(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }

    pub fn seen_since(&self, instant: Instant) -> bool {
        *self.last_seen.lock().unwrap() > instant
    }

    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::SeqCst)
    }

    pub fn mark_ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::SeqCst);
    }
}

impl Default for ConnectionActivity {
    fn default() -> Self {
        Self::new()
    }
}
