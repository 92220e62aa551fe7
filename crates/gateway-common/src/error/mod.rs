//! Error types
//!
//! Unified error taxonomy for the gateway client. Recoverable conditions
//! (per-frame decode failures, transient transport drops) surface as events
//! on the manager's stream, never as raised failures; the variants here are
//! what callers see at construction, connect, or terminal failure.

/// Gateway client error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid or unsatisfiable configuration, including a configured
    /// capability (codec, decompressor) that is absent from this build.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A frame failed to encode or decode. Per-frame and recoverable: the
    /// offending frame is dropped and the connection continues.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The inflate stream is corrupt. Fatal for the shard, which is
    /// destroyed and reconnected.
    #[error("Compression error: {0}")]
    Compression(String),

    /// WebSocket-level failure (handshake, read, write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The gateway closed the connection with a code in the unrecoverable
    /// set (auth, intents or sharding misconfiguration).
    #[error("Gateway closed with unrecoverable code {code}")]
    FatalClose { code: u16 },

    /// The bootstrap endpoint rejected the token (HTTP 401).
    #[error("Token rejected by the API")]
    Invalidated,

    /// Bootstrap HTTP failure other than 401.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal error
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// Check whether the shard may keep its connection after this error
    ///
    /// Only per-frame serialization failures are survivable in place; every
    /// other kind tears the connection down.
    #[must_use]
    pub fn is_recoverable_in_place(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
