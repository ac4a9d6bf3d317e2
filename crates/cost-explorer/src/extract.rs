//! The record extraction loop.
//!
//! [`Extractor::extract`] resolves the query window once, then pulls pages
//! from the API one at a time and yields each page's flattened records before
//! the next page is requested. Nothing is buffered beyond the current page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{CostAndUsagePage, CostAndUsageRequest, CostExplorerClient, ProviderError};
use crate::config::TapConfig;
use crate::error::TapError;
use crate::flatten::flatten_page;
use crate::record::CostRecord;
use crate::window::{resolve_window, QueryWindow};

/// Position in the page sequence.
enum Cursor {
    First,
    Next(String),
    Done,
}

/// Fetch pages for `template` until the API stops returning a page token.
///
/// Requests are strictly sequential: the next request is only built once the
/// previous page has been consumed. Once `cancel` fires, no further request
/// is issued and an in-flight request is abandoned. A failed request is
/// yielded as an error and ends the stream.
pub fn fetch_pages(
    client: Arc<dyn CostExplorerClient>,
    template: CostAndUsageRequest,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<CostAndUsagePage, ProviderError>> {
    stream::try_unfold((Cursor::First, 0usize), move |(cursor, fetched)| {
        let client = Arc::clone(&client);
        let template = template.clone();
        let cancel = cancel.clone();

        async move {
            let next_page_token = match cursor {
                Cursor::Done => return Ok(None),
                Cursor::First => None,
                Cursor::Next(token) => Some(token),
            };

            if cancel.is_cancelled() {
                debug!(pages = fetched, "Extraction cancelled before next page");
                return Ok(None);
            }

            let request = CostAndUsageRequest {
                next_page_token,
                ..template
            };

            let page = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(pages = fetched, "Extraction cancelled during page request");
                    return Ok(None);
                }
                result = client.get_cost_and_usage(&request) => result?,
            };

            let next = page
                .next_token()
                .map_or(Cursor::Done, |token| Cursor::Next(token.to_owned()));

            debug!(
                page = fetched + 1,
                buckets = page.results_by_time.len(),
                more = matches!(next, Cursor::Next(_)),
                "Fetched cost and usage page"
            );

            Ok::<_, ProviderError>(Some((page, (next, fetched + 1))))
        }
    })
    .boxed()
}

/// Drives one extraction run against a billing API connection.
#[derive(Clone)]
pub struct Extractor {
    client: Arc<dyn CostExplorerClient>,
    config: Arc<TapConfig>,
}

impl Extractor {
    /// Create an extractor over a shared connection.
    #[must_use]
    pub fn new(client: Arc<dyn CostExplorerClient>, config: TapConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// The configuration this extractor runs with.
    #[must_use]
    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// The first-page request for `window`. Later pages differ only in their token.
    #[must_use]
    pub fn request_template(&self, window: &QueryWindow) -> CostAndUsageRequest {
        CostAndUsageRequest {
            time_period: window.render(self.config.date_format),
            granularity: self.config.granularity,
            metrics: self.config.metrics.clone(),
            group_by: self.config.group_by.group_definitions(),
            filter: self.config.filter(),
            next_page_token: None,
        }
    }

    /// Stream every record from `starting_timestamp` to the configured end.
    ///
    /// A configuration error is yielded as the only item, before any request.
    /// An empty window yields nothing. Records already yielded stay valid if a
    /// later page fails or the run is cancelled.
    pub fn extract(
        &self,
        starting_timestamp: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<CostRecord, TapError>> {
        if let Err(e) = self.config.validate() {
            return stream::once(future::ready(Err(e))).boxed();
        }

        let window = match resolve_window(starting_timestamp, self.config.end_date.as_deref()) {
            Ok(window) => window,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };

        let template = self.request_template(&window);
        if window.is_empty(self.config.date_format) {
            info!(
                start = %template.time_period.start,
                end = %template.time_period.end,
                "Query window is empty, nothing to extract"
            );
            return stream::empty().boxed();
        }

        info!(
            start = %template.time_period.start,
            end = %template.time_period.end,
            granularity = %template.granularity,
            metrics = ?template.metrics,
            "Starting cost and usage extraction"
        );

        let include_totals = self.config.include_totals;
        let record_cancel = cancel.clone();

        fetch_pages(Arc::clone(&self.client), template, cancel)
            .map_err(TapError::from)
            .map_ok(move |page| {
                let records = flatten_page(&page, include_totals);
                stream::iter(records.into_iter().map(Ok::<_, TapError>))
            })
            .try_flatten()
            .take_while(move |_| future::ready(!record_cancel.is_cancelled()))
            .boxed()
    }
}
