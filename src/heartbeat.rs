//! Liveness ticker built on a plain `tokio::time::interval` poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::frame::Frame;
use crate::registry::ConnectionRegistry;

/// Spawns the ticker. A `period` of zero disables the heartbeat (the
/// ticker never runs). Per tick, every connection in the registry either
/// gets a fresh `PING` (if it has been silent since the last tick) or, if
/// its previous `PING` went unanswered, is handed a forced-shutdown
/// signal — the Rust analogue of closing it with 1006.
pub fn spawn(registry: Arc<dyn ConnectionRegistry>, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut last_tick = Instant::now();
        loop {
            interval.tick().await;
            let now = Instant::now();

            for handle in registry.snapshot() {
                // A connection mid-close (or already torn down but not yet
                // reaped from the registry) is never OPEN — the heartbeat
                // must not fire for it.
                if handle.activity.is_closing() {
                    continue;
                }
                if handle.activity.ping_outstanding() {
                    handle.shutdown.notify_one();
                    continue;
                }
                if !handle.activity.seen_since(last_tick.into_std()) {
                    if handle.outbound.try_send(Frame::ping(Vec::new())).is_ok() {
                        handle.activity.mark_ping_sent();
                    }
                }
            }

            last_tick = now;
        }
    }))
}
