//! Heartbeat state
//!
//! Tracks the ack/latency state of the periodic keepalive. The timer lives
//! in the shard runner; this struct holds only the state, so the zombie
//! policy is directly testable. Missed acks outside the tolerant statuses
//! mean the TCP connection silently died: the shard is destroyed with
//! close 4009 and a session reset within two interval periods.

use std::time::{Duration, Instant};

/// Per-shard heartbeat state
#[derive(Debug)]
pub struct Heartbeat {
    acked: bool,
    last_send: Option<Instant>,
    interval: Option<Duration>,
    latency: Option<Duration>,
}

impl Heartbeat {
    /// Create heartbeat state; a fresh connection counts as acked
    #[must_use]
    pub fn new() -> Self {
        Self {
            acked: true,
            last_send: None,
            interval: None,
            latency: None,
        }
    }

    /// Record the server-chosen cadence from Hello
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = Some(interval);
    }

    /// The server-chosen cadence, once Hello arrived
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Cancel the cadence and clear state, keeping the connection usable
    /// for a later Hello
    pub fn reset(&mut self) {
        self.acked = true;
        self.last_send = None;
        self.interval = None;
        self.latency = None;
    }

    /// Record a send; the ack flag drops until the server answers
    pub fn mark_sent(&mut self, now: Instant) {
        self.acked = false;
        self.last_send = Some(now);
    }

    /// Record a HeartbeatAck
    pub fn ack(&mut self, now: Instant) {
        self.acked = true;
        if let Some(sent) = self.last_send {
            self.latency = Some(now.saturating_duration_since(sent));
        }
    }

    /// Whether the last heartbeat was acknowledged
    #[must_use]
    pub fn acked(&self) -> bool {
        self.acked
    }

    /// Round-trip time of the last acknowledged heartbeat
    ///
    /// Meaningful only after at least one ack.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Timestamp of the last send
    #[must_use]
    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
