//! Bootstrap REST client
//!
//! The single HTTP call the client makes: `GET /gateway/bot`, returning the
//! gateway URL, the recommended shard count and the identify quota. A 401
//! is its own variant so the supervisor can tell a bad token apart from a
//! transient failure.

use crate::protocol::GatewayBot;
use gateway_common::{GatewayError, GatewayResult};

/// API base for the bootstrap call
const API_BASE: &str = "https://discord.com/api/v8";

/// `User-Agent` sent on the bootstrap call
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Minimal REST client for the gateway bootstrap
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    authorization: String,
}

impl RestClient {
    /// Create a client for the given bot token
    ///
    /// Any leading `Bot ` in the stored token is stripped before
    /// re-prefixing, so both raw and prefixed tokens are accepted.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(token: &str) -> GatewayResult<Self> {
        Self::with_base(token, API_BASE)
    }

    /// Create a client against a non-default API base (used by tests)
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_base(token: &str, base: impl Into<String>) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let trimmed = token.trim();
        let bare = trimmed.strip_prefix("Bot ").unwrap_or(trimmed);
        Ok(Self {
            http,
            base: base.into(),
            authorization: format!("Bot {bare}"),
        })
    }

    /// Fetch the gateway URL, recommended shard count and identify quota
    ///
    /// # Errors
    /// [`GatewayError::Invalidated`] on HTTP 401; [`GatewayError::Http`]
    /// for any other failure.
    pub async fn get_gateway_bot(&self) -> GatewayResult<GatewayBot> {
        let url = format!("{}/gateway/bot", self.base);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Invalidated);
        }
        if !status.is_success() {
            return Err(GatewayError::Http(format!("gateway bootstrap returned {status}")));
        }

        response
            .json::<GatewayBot>()
            .await
            .map_err(|e| GatewayError::Http(format!("gateway bootstrap body: {e}")))
    }
}
