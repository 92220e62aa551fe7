//! # gateway-common
//!
//! Shared utilities for the gateway client: configuration, error handling
//! and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ClientOptions, Compression, ConfigError, IdentifyProperties, ShardPlan,
};
pub use error::{GatewayError, GatewayResult};
pub use telemetry::{init_tracing, try_init_tracing, TracingConfig, TracingError};
