//! AWS Cost Explorer connection.
//!
//! The extractor talks to the billing API only through [`CostExplorerClient`].
//! [`HttpCostExplorer`] is the network implementation: it speaks the AWS JSON
//! 1.1 protocol (`X-Amz-Target: AWSInsightsIndexService.GetCostAndUsage`) and
//! retries throttling and 5xx responses with exponential backoff.

mod http;
mod models;
mod traits;

pub use http::{HttpCostExplorer, RetryPolicy, DEFAULT_ENDPOINT};
pub use models::*;
#[cfg(test)]
pub use traits::MockCostExplorerClient;
pub use traits::{CostExplorerClient, ProviderError};
