//! Event channels
//!
//! Observability goes to `tracing`; data delivery goes through typed
//! channels. Shard runners report [`ShardEvent`]s to the supervisor over an
//! internal mpsc; the supervisor translates them into the caller-facing
//! [`ManagerEvent`] stream. Both channels are unbounded so a slow consumer
//! never blocks a shard's read loop; the caller chooses how to drain.

use crate::protocol::GatewayPayload;
use std::collections::HashSet;

/// Lifecycle and data signals a shard reports to its supervisor
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// READY was dispatched; the session is established
    Ready,

    /// RESUMED was dispatched; the session was reattached
    Resumed,

    /// The post-READY guild stream settled, by exhaustion or timeout
    FullReady {
        /// Guild ids announced in READY that never sent GUILD_CREATE
        missing_guilds: HashSet<String>,
    },

    /// The gateway declared the session invalid and not resumable
    InvalidSession,

    /// The socket closed
    Close {
        /// Close code, from the server's close frame or the local destroy
        code: u16,
        /// Whether the server initiated the close
        remote: bool,
        /// Whether a session survived the close and can be resumed
        resumable: bool,
    },

    /// The shard was torn down by a destroy call
    Destroyed,

    /// A recoverable shard-level error (dropped frame, transport hiccup)
    Error(String),

    /// A decoded dispatch payload, forwarded verbatim
    Dispatch(GatewayPayload),
}

/// A shard event tagged with its origin
#[derive(Debug, Clone)]
pub struct ShardSignal {
    /// Originating shard id
    pub shard_id: u32,
    /// The event
    pub event: ShardEvent,
}

/// Events the manager delivers to the caller
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Every configured shard has finished its first full ready
    Ready,

    /// A shard finished its ready stabilization
    ShardReady {
        /// Shard id
        shard_id: u32,
        /// Guilds still unavailable when stabilization ended
        unavailable_guilds: HashSet<String>,
    },

    /// A shard failed fatally and will not be reconnected
    ShardError {
        /// Shard id
        shard_id: u32,
        /// Failure description
        message: String,
    },

    /// A shard is about to be reconnected
    ShardReconnecting {
        /// Shard id
        shard_id: u32,
    },

    /// A shard's socket closed
    ShardDisconnected {
        /// Shard id
        shard_id: u32,
        /// Close code
        code: u16,
    },

    /// A decoded gateway dispatch, in wire order per shard
    Raw {
        /// Originating shard id
        shard_id: u32,
        /// The payload, deserialized but otherwise untouched
        payload: GatewayPayload,
    },

    /// The token was rejected; the manager destroyed itself
    Invalidated,
}
