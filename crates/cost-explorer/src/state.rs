//! Incremental replication state.
//!
//! State is kept in the Singer layout so it can be handed back on the next run:
//!
//! ```json
//! {"bookmarks": {"cost_and_usage": {
//!     "replication_key": "time_period_start",
//!     "replication_key_value": "2024-01-31"
//! }}}
//! ```
//!
//! Records are not sorted across pages, so the highest value seen during a
//! run is only a progress marker. It becomes the bookmark through
//! [`TapState::commit`] once the whole window has been extracted.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TapError;
use crate::record::{CostRecord, REPLICATION_KEY, STREAM_NAME};
use crate::window::parse_date;

const PROGRESS_NOTE: &str = "Progress is not resumable if interrupted.";

/// Watermark for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Name of the replication key property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Highest replication key value of the last completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<String>,
    /// Highest value seen by the run in progress. Never resumed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_markers: Option<ProgressMarkers>,
}

/// Uncommitted progress of a running extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarkers {
    /// Reminder for whoever reads the state file.
    #[serde(rename = "Note", default)]
    pub note: String,
    /// Name of the replication key property.
    pub replication_key: String,
    /// Highest value seen so far.
    pub replication_key_value: String,
}

/// Replication state across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapState {
    /// Bookmarks keyed by stream name.
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,
}

impl TapState {
    /// Load state from a JSON file. A missing file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, TapError> {
        if !path.exists() {
            debug!(path = %path.display(), "No state file, starting fresh");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            TapError::config(format!("invalid state file {}: {e}", path.display()))
        })
    }

    /// Save state to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), TapError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The `cost_and_usage` watermark, if one was recorded.
    #[must_use]
    pub fn bookmark(&self) -> Option<&str> {
        self.bookmarks
            .get(STREAM_NAME)
            .and_then(|b| b.replication_key_value.as_deref())
    }

    /// Where the next run starts: the bookmark, else `start_date`, else the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Configuration`] if the chosen value is not a date.
    pub fn starting_timestamp(&self, start_date: Option<&str>) -> Result<DateTime<Utc>, TapError> {
        if let Some(bookmark) = self.bookmark() {
            return parse_date(bookmark);
        }
        match start_date.map(str::trim).filter(|v| !v.is_empty()) {
            Some(start_date) => parse_date(start_date),
            None => Ok(DateTime::UNIX_EPOCH),
        }
    }

    /// The highest replication key value seen by the current run, if any.
    #[must_use]
    pub fn progress(&self) -> Option<&str> {
        self.bookmarks
            .get(STREAM_NAME)
            .and_then(|b| b.progress_markers.as_ref())
            .map(|p| p.replication_key_value.as_str())
    }

    /// Drop progress left behind by an earlier, unfinished run.
    pub fn clear_progress(&mut self) {
        if let Some(bookmark) = self.bookmarks.get_mut(STREAM_NAME) {
            bookmark.progress_markers = None;
        }
    }

    /// Track `record` as progress if it is newer than what this run has seen.
    ///
    /// The bookmark itself is left alone until [`TapState::commit`]. Values
    /// that do not parse as dates never replace a parsable marker.
    pub fn observe(&mut self, record: &CostRecord) {
        let Ok(candidate) = parse_date(&record.time_period_start) else {
            return;
        };
        if !is_newer(candidate, self.progress()) {
            return;
        }

        self.bookmarks
            .entry(STREAM_NAME.to_string())
            .or_default()
            .progress_markers = Some(ProgressMarkers {
            note: PROGRESS_NOTE.to_string(),
            replication_key: REPLICATION_KEY.to_string(),
            replication_key_value: record.time_period_start.clone(),
        });
    }

    /// Promote the run's progress into the bookmark.
    ///
    /// Call only after the query window was extracted in full. The bookmark
    /// never moves backwards.
    pub fn commit(&mut self) {
        let Some(bookmark) = self.bookmarks.get_mut(STREAM_NAME) else {
            return;
        };
        let Some(progress) = bookmark.progress_markers.take() else {
            return;
        };
        let Ok(candidate) = parse_date(&progress.replication_key_value) else {
            return;
        };

        if is_newer(candidate, bookmark.replication_key_value.as_deref()) {
            debug!(bookmark = %progress.replication_key_value, "Committing bookmark");
            bookmark.replication_key = Some(REPLICATION_KEY.to_string());
            bookmark.replication_key_value = Some(progress.replication_key_value);
        }
    }
}

fn is_newer(candidate: DateTime<Utc>, current: Option<&str>) -> bool {
    current
        .and_then(|current| parse_date(current).ok())
        .map_or(true, |current| candidate > current)
}
