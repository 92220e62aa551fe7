//! WebSocket close codes
//!
//! Named gateway close codes plus the recovery policy sets. The policy
//! helpers operate on raw `u16` values because transport-level codes
//! (1000, 1001, 1006, ...) arrive alongside the gateway's 4xxx range.

use serde::{Deserialize, Serialize};

/// Gateway WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Session is no longer valid
    InvalidSession = 4006,
    /// Invalid sequence number for Resume
    InvalidSeq = 4007,
    /// Too many payloads (rate limited)
    RateLimited = 4008,
    /// Session timed out
    SessionTimeout = 4009,
    /// Invalid shard sent at identify
    InvalidShard = 4010,
    /// Sharding is required for this bot
    ShardingRequired = 4011,
    /// Invalid gateway version
    InvalidApiVersion = 4012,
    /// Invalid intents bitmask
    InvalidIntents = 4013,
    /// Intents not enabled for this bot
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4006 => Some(Self::InvalidSession),
            4007 => Some(Self::InvalidSeq),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSession => "Session no longer valid",
            Self::InvalidSeq => "Invalid resume sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid gateway version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Check whether the current session survives a close with this code
///
/// A clean close (1000), a dead session (4006) or a rejected sequence
/// (4007) all invalidate the session id; the shard must identify afresh.
#[must_use]
pub const fn session_resumable_after(code: u16) -> bool {
    !matches!(code, 1000 | 4006 | 4007)
}

/// Check whether a server-sent close code means the shard must not
/// reconnect
///
/// Everything in 4001..=4005 and 4008..=4014 reflects an auth, intents or
/// sharding misconfiguration that a retry cannot fix. 4000 and 4007 are
/// the reconnectable exceptions in the 4xxx range.
#[must_use]
pub const fn is_unrecoverable(code: u16) -> bool {
    matches!(code, 4001..=4005 | 4008..=4014)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(4000), Some(CloseCode::UnknownError));
        assert_eq!(CloseCode::from_u16(4006), Some(CloseCode::InvalidSession));
        assert_eq!(CloseCode::from_u16(4014), Some(CloseCode::DisallowedIntents));
        assert_eq!(CloseCode::from_u16(1000), None);
        assert_eq!(CloseCode::from_u16(4015), None);
    }

    #[test]
    fn test_session_resumable_after() {
        assert!(!session_resumable_after(1000));
        assert!(!session_resumable_after(4006));
        assert!(!session_resumable_after(4007));

        assert!(session_resumable_after(4000));
        assert!(session_resumable_after(4009));
        // abnormal transport closes keep the session
        assert!(session_resumable_after(1001));
        assert!(session_resumable_after(1006));
    }

    #[test]
    fn test_is_unrecoverable() {
        for code in [4001, 4002, 4003, 4004, 4005, 4008, 4009, 4010, 4011, 4012, 4013, 4014] {
            assert!(is_unrecoverable(code), "{code} should be unrecoverable");
        }
        for code in [1000, 1006, 4000, 4006, 4007] {
            assert!(!is_unrecoverable(code), "{code} should be recoverable");
        }
    }

    #[test]
    fn test_close_code_display() {
        let display = format!("{}", CloseCode::AuthenticationFailed);
        assert!(display.contains("4004"));
        assert!(display.contains("Authentication"));
    }
}
