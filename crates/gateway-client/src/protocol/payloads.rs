//! Typed payload bodies
//!
//! Structures for the payloads the client itself builds or inspects.
//! Everything else in the `d` field stays an opaque `serde_json::Value`
//! and is forwarded to consumers untouched.

use gateway_common::IdentifyProperties;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bot token
    pub token: String,

    /// Client properties
    pub properties: IdentifyProperties,

    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],

    /// Intents bitmask
    pub intents: u64,
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Bot token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last sequence number observed before the socket closed
    pub seq: u64,
}

/// The fields of the READY dispatch the shard itself consumes
///
/// READY carries much more (user, application, ...); those fields pass
/// through to consumers in the raw payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// Session id for later resumes
    pub session_id: String,

    /// Guilds assigned to this shard, initially unavailable
    #[serde(default)]
    pub guilds: Vec<ReadyGuild>,
}

/// A guild stub inside READY
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyGuild {
    /// Guild id
    pub id: String,
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    /// Gateway WebSocket URL
    pub url: String,

    /// Recommended shard count
    pub shards: u32,

    /// Identify quota state
    pub session_start_limit: SessionStartLimit,
}

/// Identify quota descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Total identifies allowed per window
    pub total: u32,

    /// Identifies remaining in the current window
    pub remaining: u32,

    /// Milliseconds until `remaining` resets to `total`
    pub reset_after: u64,
}
