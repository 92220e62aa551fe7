//! Client configuration
//!
//! Typed options for the shard manager. Options are provided
//! programmatically by the caller; validation happens once, at manager
//! construction.

use serde::{Deserialize, Serialize};

/// Default gateway protocol version requested by callers
const DEFAULT_VERSION: u32 = 6;

/// How the shard set is chosen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShardPlan {
    /// Use the shard count recommended by the bootstrap endpoint
    #[default]
    Auto,
    /// Spawn shards `0..n` with `shard_count = n`
    Count(u32),
    /// Spawn exactly these shard ids; `shard_count` must be set separately
    Ids(Vec<u32>),
}

/// Transport compression applied to inbound gateway frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain frames
    #[default]
    None,
    /// zlib streaming with sync-flush message boundaries
    ZlibStream,
}

impl Compression {
    /// Parse the historically accepted configuration names
    ///
    /// `"zlib"`, `"zlib-sync"` and `"pako"` were distinct library choices
    /// in older clients; they all map to the one streaming inflater here.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "zlib" | "zlib-sync" | "pako" => Ok(Self::ZlibStream),
            other => Err(ConfigError::InvalidValue("compression", other.to_string())),
        }
    }

    /// Check whether inbound frames are compressed
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::ZlibStream)
    }
}

impl From<bool> for Compression {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::ZlibStream
        } else {
            Self::None
        }
    }
}

/// Connection properties sent at identify time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    #[serde(rename = "$os")]
    pub os: String,

    /// Library name
    #[serde(rename = "$browser")]
    pub browser: String,

    /// Device name
    #[serde(rename = "$device")]
    pub device: String,
}

impl IdentifyProperties {
    /// Set operating system
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    /// Set browser name
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    /// Set device name
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: LIB_NAME.to_string(),
            device: LIB_NAME.to_string(),
        }
    }
}

/// Library name reported in identify properties
const LIB_NAME: &str = "gateway-client";

/// Options for the shard manager
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Shard set selection
    pub shards: ShardPlan,

    /// Total shard count; required when `shards` is an explicit id list
    pub shard_count: Option<u32>,

    /// Inbound frame compression
    pub compression: Compression,

    /// Encode payloads as ETF instead of JSON
    pub use_etf: bool,

    /// Intents bitmask sent at identify; `None` uses the library default set
    pub intents: Option<u64>,

    /// Gateway URL override; `None` uses the bootstrap-provided URL
    pub url: Option<String>,

    /// Gateway protocol version requested by the caller
    pub version: u32,

    /// Identify properties
    pub properties: IdentifyProperties,
}

impl ClientOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: ShardPlan::Auto,
            shard_count: None,
            compression: Compression::None,
            use_etf: false,
            intents: None,
            url: None,
            version: DEFAULT_VERSION,
            properties: IdentifyProperties::default(),
        }
    }

    /// Set the shard plan
    #[must_use]
    pub fn with_shards(mut self, shards: ShardPlan) -> Self {
        self.shards = shards;
        self
    }

    /// Set the total shard count
    #[must_use]
    pub fn with_shard_count(mut self, count: u32) -> Self {
        self.shard_count = Some(count);
        self
    }

    /// Set inbound compression
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the intents bitmask
    #[must_use]
    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = Some(intents);
        self
    }

    /// Override the gateway URL
    ///
    /// `"auto"` means no override, matching the historical option value.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = if url == "auto" { None } else { Some(url) };
        self
    }

    /// Set the identify properties
    #[must_use]
    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Validate the option combination
    ///
    /// # Errors
    /// Returns an error for an explicit id list without `shard_count`, an
    /// id outside `0..shard_count`, or a zero count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.shards {
            ShardPlan::Auto => Ok(()),
            ShardPlan::Count(0) => Err(ConfigError::InvalidValue("shards", "0".to_string())),
            ShardPlan::Count(_) => Ok(()),
            ShardPlan::Ids(ids) => {
                let count = self.shard_count.ok_or(ConfigError::MissingShardCount)?;
                if count == 0 {
                    return Err(ConfigError::InvalidValue("shard_count", "0".to_string()));
                }
                if ids.is_empty() {
                    return Err(ConfigError::InvalidValue("shards", "empty id list".to_string()));
                }
                if let Some(bad) = ids.iter().find(|id| **id >= count) {
                    return Err(ConfigError::InvalidValue("shards", format!("id {bad} >= shard_count {count}")));
                }
                Ok(())
            }
        }
    }

    /// Resolve the shard ids and total count against the recommended count
    /// from the bootstrap endpoint
    ///
    /// # Errors
    /// Same conditions as [`Self::validate`].
    pub fn resolve_shards(&self, recommended: u32) -> Result<(Vec<u32>, u32), ConfigError> {
        self.validate()?;
        match &self.shards {
            ShardPlan::Auto => {
                let count = recommended.max(1);
                Ok(((0..count).collect(), count))
            }
            ShardPlan::Count(n) => Ok(((0..*n).collect(), *n)),
            ShardPlan::Ids(ids) => {
                // validate() guarantees shard_count is present here
                let count = self.shard_count.unwrap_or(ids.len() as u32);
                Ok((ids.clone(), count))
            }
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("shard_count is required when shards is an explicit id list")]
    MissingShardCount,

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
