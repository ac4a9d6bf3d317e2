//! Flattening of nested result pages into [`CostRecord`]s.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::client::{CostAndUsagePage, DateInterval, MetricValue, ResultByTime};
use crate::record::CostRecord;

/// Flatten one page into records.
///
/// Buckets keep provider order. Within a bucket the ungrouped totals come first
/// (when `include_totals` is set), then each group in order. Metrics within a
/// map are visited in name order, so identical input always yields identical
/// output.
#[must_use]
pub fn flatten_page(page: &CostAndUsagePage, include_totals: bool) -> Vec<CostRecord> {
    page.results_by_time
        .iter()
        .flat_map(|bucket| flatten_bucket(bucket, include_totals))
        .collect()
}

fn flatten_bucket(bucket: &ResultByTime, include_totals: bool) -> Vec<CostRecord> {
    let Some(period) = &bucket.time_period else {
        warn!(
            groups = bucket.groups.len(),
            "Skipping result bucket without a time period"
        );
        return Vec::new();
    };

    let mut records = Vec::new();

    if include_totals {
        push_metrics(&mut records, period, None, &bucket.total);
    }

    for group in &bucket.groups {
        push_metrics(&mut records, period, Some(&group.keys), &group.metrics);
    }

    records
}

fn push_metrics(
    records: &mut Vec<CostRecord>,
    period: &DateInterval,
    group_keys: Option<&[String]>,
    metrics: &BTreeMap<String, MetricValue>,
) {
    for (name, value) in metrics {
        let (Some(amount), Some(unit)) = (&value.amount, &value.unit) else {
            debug!(metric = %name, ?group_keys, "Skipping metric without amount or unit");
            continue;
        };

        records.push(CostRecord {
            time_period_start: period.start.clone(),
            time_period_end: period.end.clone(),
            group_keys: group_keys.map(<[String]>::to_vec),
            metric_name: name.clone(),
            amount: amount.clone(),
            amount_unit: unit.clone(),
        });
    }
}
