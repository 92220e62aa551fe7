//! Gateway wire protocol
//!
//! Op codes, close codes and payload structures shared by the shard state
//! machine and the supervisor.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{is_unrecoverable, session_resumable_after, CloseCode};
pub use messages::GatewayPayload;
pub use opcodes::OpCode;
pub use payloads::{
    GatewayBot, HelloPayload, IdentifyPayload, ReadyGuild, ReadyPayload, ResumePayload,
    SessionStartLimit,
};
