//! Singer message output.
//!
//! The extractor writes one JSON message per line: a `SCHEMA` message first,
//! then `RECORD` messages, with `STATE` messages carrying the bookmark.

use std::io::Write;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::TapError;
use crate::extract::Extractor;
use crate::record::{record_schema, CostRecord, KEY_PROPERTIES, REPLICATION_KEY, STREAM_NAME};
use crate::state::TapState;

/// A single Singer message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message<'a> {
    /// Describes the records that follow.
    Schema {
        stream: &'a str,
        schema: Value,
        key_properties: Vec<&'a str>,
        bookmark_properties: Vec<&'a str>,
    },
    /// One extracted row.
    Record {
        stream: &'a str,
        record: &'a CostRecord,
        time_extracted: DateTime<Utc>,
    },
    /// Replication state to persist.
    State { value: &'a TapState },
}

impl Message<'_> {
    /// The `SCHEMA` message for the `cost_and_usage` stream.
    #[must_use]
    pub fn schema() -> Self {
        Message::Schema {
            stream: STREAM_NAME,
            schema: record_schema(),
            key_properties: KEY_PROPERTIES.to_vec(),
            bookmark_properties: vec![REPLICATION_KEY],
        }
    }
}

/// Catalog entry printed in discovery mode.
#[must_use]
pub fn catalog() -> Value {
    json!({
        "streams": [{
            "tap_stream_id": STREAM_NAME,
            "stream": STREAM_NAME,
            "schema": record_schema(),
            "key_properties": KEY_PROPERTIES,
            "replication_key": REPLICATION_KEY,
            "replication_method": "INCREMENTAL",
            "metadata": [{
                "breadcrumb": [],
                "metadata": {
                    "inclusion": "available",
                    "selected": true,
                    "table-key-properties": KEY_PROPERTIES,
                    "valid-replication-keys": [REPLICATION_KEY],
                    "forced-replication-method": "INCREMENTAL"
                }
            }]
        }]
    })
}

/// Writes messages as JSON lines.
pub struct MessageWriter<W: Write> {
    out: W,
    records: usize,
}

impl<W: Write> MessageWriter<W> {
    /// Wrap an output sink.
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    /// Number of `RECORD` messages written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Write any serializable value as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_line<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), TapError> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Write the stream's `SCHEMA` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn schema(&mut self) -> Result<(), TapError> {
        self.write_line(&Message::schema())
    }

    /// Write a `RECORD` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record(&mut self, record: &CostRecord) -> Result<(), TapError> {
        self.write_line(&Message::Record {
            stream: STREAM_NAME,
            record,
            time_extracted: Utc::now(),
        })?;
        self.records += 1;
        Ok(())
    }

    /// Write a `STATE` message and flush, so the state never runs ahead of
    /// records still sitting in a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn state(&mut self, state: &TapState) -> Result<(), TapError> {
        self.write_line(&Message::State { value: state })?;
        self.out.flush()?;
        Ok(())
    }

    /// Flush and return the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn into_inner(mut self) -> Result<W, TapError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Run one extraction and write `SCHEMA`, `RECORD` and `STATE` messages.
///
/// The starting timestamp comes from the bookmark in `state`. Records only
/// advance the run's progress markers; the bookmark moves once the stream has
/// been drained without error or cancellation. A `STATE` message follows every
/// `state_interval` records, a failure, and the end of the run. Returns the
/// number of records written.
///
/// # Errors
///
/// Returns a configuration error before any output if the configuration is
/// invalid, otherwise the first extraction or output error.
pub async fn sync<W: Write>(
    extractor: &Extractor,
    state: &mut TapState,
    writer: &mut MessageWriter<W>,
    cancel: CancellationToken,
) -> Result<usize, TapError> {
    let config = extractor.config();
    config.validate()?;
    let start = state.starting_timestamp(config.start_date.as_deref())?;
    let interval = config.state_interval;

    state.clear_progress();
    writer.schema()?;

    let mut records = extractor.extract(start, cancel.clone());
    let mut written = 0usize;

    while let Some(item) = records.next().await {
        match item {
            Ok(record) => {
                writer.record(&record)?;
                state.observe(&record);
                written += 1;
                if written % interval == 0 {
                    writer.state(state)?;
                }
            }
            Err(e) => {
                warn!(records = written, error = %e, "Extraction failed, bookmark not advanced");
                writer.state(state)?;
                return Err(e);
            }
        }
    }

    let cancelled = cancel.is_cancelled();
    if cancelled {
        warn!(records = written, "Extraction cancelled, bookmark not advanced");
    } else {
        state.commit();
    }
    writer.state(state)?;

    info!(
        records = written,
        cancelled,
        bookmark = state.bookmark().unwrap_or_default(),
        "Extraction finished"
    );
    Ok(written)
}
