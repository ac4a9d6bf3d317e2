//! Cost Explorer `GetCostAndUsage` request and response models.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Shared types
// ============================================================================

/// Time period sent to and returned by the API.
///
/// Both bounds are kept as the provider's strings. `start` is inclusive and
/// `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DateInterval {
    /// Start of the period (inclusive).
    pub start: String,
    /// End of the period (exclusive).
    pub end: String,
}

/// Time bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    /// One bucket per day.
    #[default]
    Daily,
    /// One bucket per calendar month.
    Monthly,
    /// One bucket per hour (requires hourly granularity to be enabled on the account).
    Hourly,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "DAILY"),
            Self::Monthly => write!(f, "MONTHLY"),
            Self::Hourly => write!(f, "HOURLY"),
        }
    }
}

// ============================================================================
// Request types
// ============================================================================

/// Kind of grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupDefinitionType {
    /// A built-in dimension such as `SERVICE`.
    Dimension,
    /// A cost allocation tag.
    Tag,
    /// A cost category.
    CostCategory,
}

/// A single `GroupBy` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Grouping kind.
    #[serde(rename = "Type")]
    pub kind: GroupDefinitionType,
    /// Dimension, tag or category key.
    #[serde(rename = "Key")]
    pub key: String,
}

impl GroupDefinition {
    /// Group by a built-in dimension.
    #[must_use]
    pub fn dimension(key: impl Into<String>) -> Self {
        Self {
            kind: GroupDefinitionType::Dimension,
            key: key.into(),
        }
    }
}

/// Values matched for one dimension inside a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DimensionValues {
    /// Dimension key (e.g. `RECORD_TYPE`).
    pub key: String,
    /// Matched values.
    pub values: Vec<String>,
}

/// Filter expression.
///
/// Only the subset of the expression grammar the extractor sends is modeled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Expression {
    /// Negated sub-expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Expression>>,
    /// Dimension match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<DimensionValues>,
}

impl Expression {
    /// Match rows whose `dimension` is one of `values`.
    #[must_use]
    pub fn dimension(dimension: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            not: None,
            dimensions: Some(DimensionValues {
                key: dimension.into(),
                values,
            }),
        }
    }

    /// Negate an expression.
    #[must_use]
    pub fn negate(inner: Self) -> Self {
        Self {
            not: Some(Box::new(inner)),
            dimensions: None,
        }
    }
}

/// Body of a `GetCostAndUsage` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostAndUsageRequest {
    /// Queried period.
    pub time_period: DateInterval,
    /// Bucket granularity.
    pub granularity: Granularity,
    /// Metric names (e.g. `UnblendedCost`, `UsageQuantity`).
    pub metrics: Vec<String>,
    /// Ordered grouping keys.
    pub group_by: Vec<GroupDefinition>,
    /// Optional filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expression>,
    /// Opaque pagination cursor from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ============================================================================
// Response types
// ============================================================================

/// One page of `GetCostAndUsage` results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostAndUsagePage {
    /// Time buckets, in provider order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub results_by_time: Vec<ResultByTime>,
    /// Cursor for the next page, absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl CostAndUsagePage {
    /// The cursor to request the following page with, if any.
    ///
    /// An empty token is treated the same as a missing one.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

/// Costs for one time bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultByTime {
    /// Bucket period. `None` when either bound is missing.
    #[serde(default, deserialize_with = "partial_period")]
    pub time_period: Option<DateInterval>,
    /// Ungrouped totals. Empty when the query is grouped.
    #[serde(default, deserialize_with = "nullable_metrics")]
    pub total: BTreeMap<String, MetricValue>,
    /// Per-group metrics, in provider order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<Group>,
    /// Whether the bucket is still an estimate.
    #[serde(default)]
    pub estimated: bool,
}

/// Metrics for one combination of group keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Group {
    /// Group key values, ordered like the request's `GroupBy`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub keys: Vec<String>,
    /// Metric values keyed by metric name.
    #[serde(default, deserialize_with = "nullable_metrics")]
    pub metrics: BTreeMap<String, MetricValue>,
}

/// A metric amount as returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricValue {
    /// Decimal amount, kept as a string.
    #[serde(default)]
    pub amount: Option<String>,
    /// Unit (e.g. `USD`, `Hrs`).
    #[serde(default)]
    pub unit: Option<String>,
}

impl MetricValue {
    /// Build a metric value.
    #[must_use]
    pub fn new(amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            amount: Some(amount.into()),
            unit: Some(unit.into()),
        }
    }
}

// ============================================================================
// Error response
// ============================================================================

/// Error body returned by AWS JSON protocol services.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsErrorBody {
    /// Fully qualified error type, e.g. `com.amazon.coral.service#ThrottlingException`.
    #[serde(rename = "__type", default)]
    pub error_type: Option<String>,
    /// Human readable message.
    #[serde(alias = "Message", default)]
    pub message: Option<String>,
}

impl AwsErrorBody {
    /// The short error code (the part after `#`).
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_type
            .as_deref()
            .map(|t| t.rsplit('#').next().unwrap_or(t))
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read a `TimePeriod`, dropping it unless both bounds are present.
fn partial_period<'de, D>(deserializer: D) -> Result<Option<DateInterval>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Bounds {
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
    }

    let bounds = Option::<Bounds>::deserialize(deserializer)?;
    Ok(bounds.and_then(|b| match (b.start, b.end) {
        (Some(start), Some(end)) => Some(DateInterval { start, end }),
        _ => None,
    }))
}

/// Read a metric map where the map itself or any value may be `null`.
fn nullable_metrics<'de, D>(deserializer: D) -> Result<BTreeMap<String, MetricValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let metrics = Option::<BTreeMap<String, Option<MetricValue>>>::deserialize(deserializer)?;
    Ok(metrics
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, value.unwrap_or_default()))
        .collect())
}
