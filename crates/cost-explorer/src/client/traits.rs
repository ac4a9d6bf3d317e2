//! Connection trait and provider errors.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{CostAndUsagePage, CostAndUsageRequest};

/// Error codes AWS uses for throttling.
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "LimitExceededException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Errors that can occur while talking to the billing API.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, code, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
                    || THROTTLING_CODES.contains(&code.as_str())
            }
            Self::RateLimited(_) => true,
            Self::Serialization(_) | Self::Config(_) => false,
        }
    }
}

/// A pre-authenticated billing API connection.
///
/// Implementations own transport concerns (signing, timeouts, retries); callers
/// only see the final outcome of a call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CostExplorerClient: Send + Sync {
    /// Fetch one page of cost and usage data.
    ///
    /// # Errors
    ///
    /// Returns an error if the call still fails after the client's retry policy.
    async fn get_cost_and_usage(
        &self,
        request: &CostAndUsageRequest,
    ) -> Result<CostAndUsagePage, ProviderError>;
}
