//! # gateway-client
//!
//! A sharded client for the Discord real-time gateway. Each shard keeps one
//! long-lived WebSocket to the gateway and receives the event stream for
//! its partition of guilds; the manager spawns shards serially under the
//! identify quota and supervises their reconnection.
//!
//! Callers construct a [`ShardManager`] with a bot token and
//! [`ClientOptions`], call [`ShardManager::connect`], and drain the
//! [`ManagerEvent`] receiver. Authentication, heartbeating, session
//! resumption, compression and payload decoding are handled internally.

pub mod codec;
pub mod compress;
pub mod events;
pub mod intents;
pub mod manager;
pub mod protocol;
pub mod rest;
pub mod shard;

pub use codec::{Codec, EncodedFrame, Encoding, WireInput};
pub use compress::Inflater;
pub use events::{ManagerEvent, ShardEvent};
pub use gateway_common::{
    ClientOptions, Compression, GatewayError, GatewayResult, IdentifyProperties, ShardPlan,
};
pub use intents::Intents;
pub use manager::ShardManager;
pub use protocol::{CloseCode, GatewayPayload, OpCode};
pub use shard::{DestroyOptions, Shard, ShardStatus};
