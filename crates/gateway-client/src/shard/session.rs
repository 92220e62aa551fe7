//! Session state
//!
//! Owns the gateway session id and the hello deadline. A session survives
//! transient socket closes; it is cleared on destroy-with-reset or when a
//! close code invalidates it.

use crate::protocol::session_resumable_after;
use std::time::{Duration, Instant};

/// How long to wait for Hello after the socket opens
///
/// Expiry destroys the shard with close 4000 and a session reset.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-shard session state
#[derive(Debug, Default)]
pub struct Session {
    session_id: Option<String>,
    hello_deadline: Option<Instant>,
}

impl Session {
    /// Create empty session state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the hello deadline at connect time
    pub fn wait_for_hello(&mut self, now: Instant) {
        self.hello_deadline = Some(now + HELLO_TIMEOUT);
    }

    /// Hello arrived: disarm the deadline
    pub fn hello(&mut self) {
        self.hello_deadline = None;
    }

    /// The armed hello deadline, if any
    #[must_use]
    pub fn hello_deadline(&self) -> Option<Instant> {
        self.hello_deadline
    }

    /// Store the session id from READY
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.session_id = Some(id.into());
    }

    /// The current session id
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Forget the session; the next handshake must be a fresh identify
    pub fn reset(&mut self) {
        self.session_id = None;
        self.hello_deadline = None;
    }

    /// Whether the session can be resumed after a close with this code
    #[must_use]
    pub fn resumable_after(&self, close_code: u16) -> bool {
        self.session_id.is_some() && session_resumable_after(close_code)
    }
}
