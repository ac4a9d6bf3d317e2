//! Cost Explorer client over the AWS JSON 1.1 protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::models::{AwsErrorBody, CostAndUsagePage, CostAndUsageRequest};
use super::traits::{CostExplorerClient, ProviderError};
use crate::config::ClientConfig;

/// Cost Explorer is a global service served from `us-east-1`.
pub const DEFAULT_ENDPOINT: &str = "https://ce.us-east-1.amazonaws.com";

const TARGET_GET_COST_AND_USAGE: &str = "AWSInsightsIndexService.GetCostAndUsage";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// HTTP connection to the Cost Explorer API.
///
/// Requests are sent unsigned; credentials are expected to be attached by the
/// endpoint in front of the API (a signing proxy) or through the extra headers
/// in [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct HttpCostExplorer {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl HttpCostExplorer {
    /// Create a client for `endpoint` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProviderError> {
        Self::from_config(&ClientConfig {
            endpoint: endpoint.into(),
            ..ClientConfig::default()
        })
    }

    /// Create a client from its configuration block.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or a header is invalid, or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProviderError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ProviderError::Config(format!("invalid endpoint {:?}: {e}", config.endpoint))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProviderError::Config(format!("invalid header name {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ProviderError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .user_agent(concat!("tap-cost-explorer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            endpoint,
            retry: config.retry_policy(),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send_once(
        &self,
        request: &CostAndUsageRequest,
    ) -> Result<CostAndUsagePage, ProviderError> {
        let body = serde_json::to_vec(request)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, AMZ_JSON)
            .header("X-Amz-Target", TARGET_GET_COST_AND_USAGE)
            .body(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response(
        response: reqwest::Response,
    ) -> Result<CostAndUsagePage, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "Failed to parse Cost Explorer response");
                ProviderError::Serialization(e)
            });
        }

        let parsed = serde_json::from_str::<AwsErrorBody>(&text).ok();
        let code = parsed
            .as_ref()
            .and_then(AwsErrorBody::code)
            .unwrap_or_default()
            .to_string();
        let message = parsed.and_then(|body| body.message).unwrap_or(text);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited(message));
        }

        Err(ProviderError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl CostExplorerClient for HttpCostExplorer {
    #[instrument(
        skip_all,
        fields(
            start = %request.time_period.start,
            end = %request.time_period.end,
            paged = request.next_page_token.is_some()
        )
    )]
    async fn get_cost_and_usage(
        &self,
        request: &CostAndUsageRequest,
    ) -> Result<CostAndUsagePage, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(page) => {
                    debug!(
                        buckets = page.results_by_time.len(),
                        has_next = page.next_token().is_some(),
                        "Cost Explorer page received"
                    );
                    return Ok(page);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "Transient Cost Explorer error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
