//! In-band liveness: ping/pong screening and idle detection.
//!
//! The server sends `{"type":"ping"}` on a fixed interval. The connection
//! manager screens every decoded frame here before anything else: a ping
//! yields the pong to write back immediately, a pong is absorbed, and only
//! `error`/`message` frames are forwarded to subscribers.
//!
//! Any decoded frame counts as proof of life. When an idle timeout is set
//! and nothing arrives within it, the socket is considered half-open.

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod heartbeat_test;

use std::time::Duration;

use frames::{InboundFrame, OutboundFrame};
use tokio::time::Instant;

/// What the manager should do with a decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screened {
    /// Write this frame back before reading the next one.
    Reply(OutboundFrame),
    /// Heartbeat traffic; nothing to surface.
    Absorbed,
    /// Application frame for subscribers.
    Forward(InboundFrame),
}

#[must_use]
pub fn screen(frame: InboundFrame) -> Screened {
    match frame {
        InboundFrame::Ping => Screened::Reply(OutboundFrame::Pong),
        InboundFrame::Pong => Screened::Absorbed,
        other => Screened::Forward(other),
    }
}

/// Idle tracker for one open socket.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    idle_timeout: Option<Duration>,
    last_seen: Option<Instant>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self { idle_timeout, last_seen: None }
    }

    /// Start tracking a freshly opened socket.
    pub fn start(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Record inbound traffic.
    pub fn observe(&mut self, now: Instant) {
        if self.last_seen.is_some() {
            self.last_seen = Some(now);
        }
    }

    pub fn stop(&mut self) {
        self.last_seen = None;
    }

    /// When the socket will be declared dead if nothing else arrives.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        Some(self.last_seen? + self.idle_timeout?)
    }

    #[cfg(test)]
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}
