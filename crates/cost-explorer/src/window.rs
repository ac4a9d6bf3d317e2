//! Query window resolution.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::client::DateInterval;
use crate::config::DateFormat;
use crate::error::TapError;

/// The period one extraction run queries. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    /// Start of the window, from replication state.
    pub start: DateTime<Utc>,
    /// End of the window.
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Render the window as the API's `TimePeriod`.
    #[must_use]
    pub fn render(&self, format: DateFormat) -> DateInterval {
        DateInterval {
            start: format.render(&self.start),
            end: format.render(&self.end),
        }
    }

    /// Whether nothing can be queried once rendered in `format`.
    ///
    /// The API rejects periods whose start is not before their end, so a window
    /// that collapses after rendering (e.g. a bookmark of today) is empty.
    #[must_use]
    pub fn is_empty(&self, format: DateFormat) -> bool {
        let interval = self.render(format);
        // Both bounds share one ISO 8601 layout, so string order is time order.
        interval.start >= interval.end
    }
}

/// Resolve the window for a run starting at `starting_timestamp`.
///
/// The end is `configured_end_date` when it is set and non-blank, otherwise
/// yesterday (UTC), so the current, still-changing billing day is never queried.
///
/// # Errors
///
/// Returns [`TapError::Configuration`] if `configured_end_date` is not a date.
pub fn resolve_window(
    starting_timestamp: DateTime<Utc>,
    configured_end_date: Option<&str>,
) -> Result<QueryWindow, TapError> {
    resolve_window_at(
        starting_timestamp,
        configured_end_date,
        Utc::now().date_naive(),
    )
}

/// [`resolve_window`] with an explicit current date.
///
/// # Errors
///
/// Returns [`TapError::Configuration`] if `configured_end_date` is not a date.
pub fn resolve_window_at(
    starting_timestamp: DateTime<Utc>,
    configured_end_date: Option<&str>,
    today: NaiveDate,
) -> Result<QueryWindow, TapError> {
    let end = match configured_end_date.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => parse_date(value)?,
        None => start_of_day(today.pred_opt().unwrap_or(today)),
    };

    Ok(QueryWindow {
        start: starting_timestamp,
        end,
    })
}

/// Parse a configured date.
///
/// Accepts `YYYY-MM-DD` (midnight UTC), RFC 3339 timestamps, and naive
/// `YYYY-MM-DDTHH:MM:SS` timestamps (taken as UTC).
///
/// # Errors
///
/// Returns [`TapError::Configuration`] if none of the formats match.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, TapError> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(start_of_day(date));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts.and_utc());
    }

    Err(TapError::config(format!("invalid date {value:?}")))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
