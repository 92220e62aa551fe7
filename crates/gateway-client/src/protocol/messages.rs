//! Gateway payload envelope
//!
//! All messages on the WebSocket follow this `{op, t, s, d}` shape.

use super::{HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single gateway payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Operation code
    pub op: OpCode,

    /// Event name (only for op 0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub t: Option<String>,

    /// Sequence number (only for op 0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub s: Option<u64>,

    /// Event data
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub d: Option<Value>,
}

impl GatewayPayload {
    /// Create a bare payload with only an op code
    #[must_use]
    pub fn op(op: OpCode) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Create a payload with an op code and body
    #[must_use]
    pub fn with_data(op: OpCode, d: Value) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: Some(d),
        }
    }

    /// Create a Heartbeat payload (op 1)
    ///
    /// The body is the last received sequence number, or null when no
    /// dispatch has been seen yet this session.
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: Some(last_sequence.map_or(Value::Null, |s| Value::Number(s.into()))),
        }
    }

    /// Create an Identify payload (op 2)
    #[must_use]
    pub fn identify(body: &IdentifyPayload) -> Self {
        Self::with_data(OpCode::Identify, serde_json::to_value(body).unwrap_or_default())
    }

    /// Create a Resume payload (op 6)
    #[must_use]
    pub fn resume(body: &ResumePayload) -> Self {
        Self::with_data(OpCode::Resume, serde_json::to_value(body).unwrap_or_default())
    }

    /// Create a Request Guild Members payload (op 8), forwarded opaquely
    #[must_use]
    pub fn request_guild_members(d: Value) -> Self {
        Self::with_data(OpCode::RequestGuildMembers, d)
    }

    /// Create a Presence Update payload (op 3), forwarded opaquely
    #[must_use]
    pub fn presence_update(d: Value) -> Self {
        Self::with_data(OpCode::PresenceUpdate, d)
    }

    /// Create a Voice State Update payload (op 4), forwarded opaquely
    #[must_use]
    pub fn voice_state_update(d: Value) -> Self {
        Self::with_data(OpCode::VoiceStateUpdate, d)
    }

    /// Try to parse the body as a Hello payload (op 10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse the body as a READY dispatch
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some("READY") {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Read the Invalid Session resumable flag (op 9)
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Event name for dispatch payloads
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        if self.op == OpCode::Dispatch {
            self.t.as_deref()
        } else {
            None
        }
    }
}

impl std::fmt::Display for GatewayPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayPayload(op={}, t={t}", self.op)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayPayload(op={})", self.op)
        }
    }
}
