//! Outbound rate-limit bucket
//!
//! The gateway allows 120 outbound frames per 60 seconds per connection.
//! Tokens refill continuously; payloads queue when the bucket is dry.
//! Prioritized payloads (identify, resume, heartbeat) go to the head of the
//! queue but never preempt a send already taken from it.
//!
//! Time is passed in by the caller so the arithmetic is deterministic.

use crate::protocol::GatewayPayload;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frames allowed per window
pub const BUCKET_LIMIT: u32 = 120;

/// Refill window
pub const BUCKET_WINDOW: Duration = Duration::from_secs(60);

/// A payload waiting in the bucket
#[derive(Debug, Clone)]
pub struct QueuedPayload {
    /// The payload to encode and send
    pub payload: GatewayPayload,
    /// Whether it was admitted at the head of the queue
    pub prioritized: bool,
}

/// Continuous-refill token bucket with an attached send queue
#[derive(Debug)]
pub struct SendBucket {
    limit: u32,
    window: Duration,
    allowance: f64,
    last_refill: Instant,
    queue: VecDeque<QueuedPayload>,
}

impl SendBucket {
    /// Create the standard 120-per-60 s bucket
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self::with_limits(BUCKET_LIMIT, BUCKET_WINDOW, now)
    }

    /// Create a bucket with explicit limits
    #[must_use]
    pub fn with_limits(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            limit,
            window,
            allowance: f64::from(limit),
            last_refill: now,
            queue: VecDeque::new(),
        }
    }

    /// Queue a payload, at the head when prioritized
    pub fn enqueue(&mut self, payload: GatewayPayload, prioritized: bool) {
        let entry = QueuedPayload { payload, prioritized };
        if prioritized {
            // behind any earlier prioritized entries, ahead of the rest
            let pos = self.queue.iter().take_while(|q| q.prioritized).count();
            self.queue.insert(pos, entry);
        } else {
            self.queue.push_back(entry);
        }
    }

    /// Take the next payload if a token is available
    pub fn try_next(&mut self, now: Instant) -> Option<GatewayPayload> {
        if self.queue.is_empty() {
            return None;
        }
        self.refill(now);
        if self.allowance >= 1.0 {
            self.allowance -= 1.0;
            self.queue.pop_front().map(|q| q.payload)
        } else {
            None
        }
    }

    /// Time until the next queued payload can leave, `None` when idle
    ///
    /// Zero means a send is possible right now.
    #[must_use]
    pub fn next_ready_in(&self, now: Instant) -> Option<Duration> {
        if self.queue.is_empty() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let allowance = (self.allowance + elapsed * f64::from(self.limit) / self.window.as_secs_f64())
            .min(f64::from(self.limit));
        if allowance >= 1.0 {
            return Some(Duration::ZERO);
        }
        let missing = 1.0 - allowance;
        let secs = missing * self.window.as_secs_f64() / f64::from(self.limit);
        Some(Duration::from_secs_f64(secs))
    }

    /// Number of queued payloads
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterate the queued payloads in send order, for inspection
    pub fn iter(&self) -> impl Iterator<Item = &QueuedPayload> + '_ {
        self.queue.iter()
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.allowance = (self.allowance + elapsed * f64::from(self.limit) / self.window.as_secs_f64())
            .min(f64::from(self.limit));
        self.last_refill = now;
    }
}
