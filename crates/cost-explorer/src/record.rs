//! The `cost_and_usage` output stream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stream name used in catalogs, messages and state.
pub const STREAM_NAME: &str = "cost_and_usage";

/// Properties forming the primary key.
pub const KEY_PROPERTIES: [&str; 3] = ["group_keys", "metric_name", "time_period_start"];

/// Incremental replication key.
pub const REPLICATION_KEY: &str = "time_period_start";

/// One metric for one group (or the ungrouped total) in one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Bucket start, verbatim from the API.
    pub time_period_start: String,
    /// Bucket end, verbatim from the API.
    pub time_period_end: String,
    /// Group key values, or `None` for a bucket total.
    pub group_keys: Option<Vec<String>>,
    /// Metric name, e.g. `UnblendedCost`.
    pub metric_name: String,
    /// Decimal amount as a string.
    pub amount: String,
    /// Amount unit, e.g. `USD`.
    pub amount_unit: String,
}

/// JSON schema of [`CostRecord`].
#[must_use]
pub fn record_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "time_period_start": {"type": ["string", "null"], "format": "date-time"},
            "time_period_end": {"type": ["string", "null"], "format": "date-time"},
            "group_keys": {"type": ["array", "null"], "items": {"type": ["string"]}},
            "metric_name": {"type": ["string", "null"]},
            "amount": {"type": ["string", "null"]},
            "amount_unit": {"type": ["string", "null"]}
        }
    })
}
