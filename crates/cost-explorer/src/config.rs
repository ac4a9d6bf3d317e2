//! Extractor configuration.
//!
//! All request-shape variants are enumerated here and selected once when the
//! configuration is loaded: the grouping dimensions ([`DimensionSet`]), the
//! date rendering ([`DateFormat`]), the credit filter, and whether bucket
//! totals become records.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{Expression, Granularity, GroupDefinition, RetryPolicy, DEFAULT_ENDPOINT};
use crate::error::TapError;
use crate::window::parse_date;

/// Dimension value marking credit line items.
const CREDIT_RECORD_TYPE: &str = "Credit";

/// Ordered dimension sets the extractor can group by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DimensionSet {
    /// `LINKED_ACCOUNT`, `SERVICE`, `AZ`.
    #[default]
    LinkedAccountServiceAz,
    /// `LINKED_ACCOUNT`, `SERVICE`.
    LinkedAccountService,
}

impl DimensionSet {
    /// Dimension keys in request order.
    #[must_use]
    pub fn dimensions(self) -> &'static [&'static str] {
        match self {
            Self::LinkedAccountServiceAz => &["LINKED_ACCOUNT", "SERVICE", "AZ"],
            Self::LinkedAccountService => &["LINKED_ACCOUNT", "SERVICE"],
        }
    }

    /// `GroupBy` entries for this set.
    #[must_use]
    pub fn group_definitions(self) -> Vec<GroupDefinition> {
        self.dimensions()
            .iter()
            .map(|key| GroupDefinition::dimension(*key))
            .collect()
    }
}

/// How the query window is rendered in `TimePeriod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateFormat {
    /// `YYYY-MM-DD`.
    #[default]
    Date,
    /// `YYYY-MM-DDTHH:MM:SSZ`.
    Timestamp,
}

impl DateFormat {
    /// Render a timestamp in this format.
    #[must_use]
    pub fn render(self, value: &DateTime<Utc>) -> String {
        match self {
            Self::Date => value.format("%Y-%m-%d").to_string(),
            Self::Timestamp => value.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// Connection settings for [`crate::client::HttpCostExplorer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for throttling and 5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Backoff policy described by this block.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Top-level extractor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapConfig {
    /// Floor for the first run, used when no bookmark exists.
    #[serde(default)]
    pub start_date: Option<String>,
    /// Exclusive end of the query window. Defaults to yesterday.
    #[serde(default)]
    pub end_date: Option<String>,
    /// Bucket granularity.
    pub granularity: Granularity,
    /// Metric names requested from the API.
    pub metrics: Vec<String>,
    /// Exclude credit line items.
    #[serde(default)]
    pub filter_credits: bool,
    /// Grouping dimensions.
    #[serde(default)]
    pub group_by: DimensionSet,
    /// `TimePeriod` rendering.
    #[serde(default)]
    pub date_format: DateFormat,
    /// Emit ungrouped bucket totals as records with `group_keys = null`.
    #[serde(default = "default_include_totals")]
    pub include_totals: bool,
    /// Emit a state message every this many records.
    #[serde(default = "default_state_interval")]
    pub state_interval: usize,
    /// Connection settings.
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_include_totals() -> bool {
    true
}

fn default_state_interval() -> usize {
    1000
}

impl TapConfig {
    /// Minimal configuration for the given granularity and metrics.
    ///
    /// Nothing is checked here, since fields are usually adjusted afterwards.
    /// [`Extractor::extract`](crate::Extractor::extract) and
    /// [`singer::sync`](crate::singer::sync) run [`TapConfig::validate`]
    /// before any request is made.
    #[must_use]
    pub fn new(granularity: Granularity, metrics: Vec<String>) -> Self {
        Self {
            start_date: None,
            end_date: None,
            granularity,
            metrics,
            filter_credits: false,
            group_by: DimensionSet::default(),
            date_format: DateFormat::default(),
            include_totals: default_include_totals(),
            state_interval: default_state_interval(),
            client: ClientConfig::default(),
        }
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, TapError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails validation.
    pub fn from_json(content: &str) -> Result<Self, TapError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| TapError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), TapError> {
        if self.metrics.is_empty() {
            return Err(TapError::config("metrics must not be empty"));
        }
        if let Some(blank) = self.metrics.iter().position(|m| m.trim().is_empty()) {
            return Err(TapError::config(format!("metrics[{blank}] is blank")));
        }
        if self.state_interval == 0 {
            return Err(TapError::config("state_interval must be positive"));
        }
        for (field, value) in [("start_date", &self.start_date), ("end_date", &self.end_date)] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                parse_date(value).map_err(|_| {
                    TapError::config(format!("{field} {value:?} is not a valid date"))
                })?;
            }
        }
        Ok(())
    }

    /// The `Filter` expression sent with every request, if any.
    #[must_use]
    pub fn filter(&self) -> Option<Expression> {
        self.filter_credits.then(|| {
            Expression::negate(Expression::dimension(
                "RECORD_TYPE",
                vec![CREDIT_RECORD_TYPE.to_string()],
            ))
        })
    }
}
