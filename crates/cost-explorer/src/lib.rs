#![allow(clippy::doc_markdown)] // Allow brand names like CloudWatch, AWS without backticks

//! Incremental extractor for AWS Cost Explorer cost and usage data.
//!
//! This crate turns the nested, paginated `GetCostAndUsage` response into a
//! flat stream of [`CostRecord`]s, one row per metric per group per time
//! bucket, ready to be loaded into a warehouse.
//!
//! ## Features
//!
//! - Query window derived from the replication bookmark, ending yesterday
//! - Strictly sequential pagination driven by `NextPageToken`
//! - Deterministic flattening of bucket totals and groups into rows
//! - Configurable grouping dimensions, date format and credit filter
//! - Cancellation between records via [`CancellationToken`]
//! - Bookmarks that only advance once a whole window has been extracted
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cost_explorer::{Extractor, HttpCostExplorer, TapConfig, TapState};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TapConfig::from_file("config.json".as_ref())?;
//!     let client = HttpCostExplorer::from_config(&config.client)?;
//!
//!     let mut state = TapState::default();
//!     let start = state.starting_timestamp(config.start_date.as_deref())?;
//!
//!     let extractor = Extractor::new(Arc::new(client), config);
//!     let mut records = extractor.extract(start, CancellationToken::new());
//!
//!     while let Some(record) = records.next().await {
//!         let record = record?;
//!         state.observe(&record);
//!         println!("{} {} {}", record.time_period_start, record.metric_name, record.amount);
//!     }
//!     state.commit();
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Record layout
//!
//! | field               | type                 |
//! |---------------------|----------------------|
//! | `time_period_start` | date-time string     |
//! | `time_period_end`   | date-time string     |
//! | `group_keys`        | string array or null |
//! | `metric_name`       | string               |
//! | `amount`            | string               |
//! | `amount_unit`       | string               |
//!
//! The primary key is `(group_keys, metric_name, time_period_start)` and
//! `time_period_start` is the replication key.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod record;
pub mod singer;
pub mod state;
pub mod window;

pub use client::{
    CostAndUsagePage, CostAndUsageRequest, CostExplorerClient, Granularity, HttpCostExplorer,
    ProviderError, RetryPolicy,
};
pub use config::{ClientConfig, DateFormat, DimensionSet, TapConfig};
pub use error::TapError;
pub use extract::{fetch_pages, Extractor};
pub use flatten::flatten_page;
pub use record::{CostRecord, KEY_PROPERTIES, REPLICATION_KEY, STREAM_NAME};
pub use singer::MessageWriter;
pub use state::TapState;
pub use window::{resolve_window, QueryWindow};
