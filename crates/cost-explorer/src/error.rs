//! Extractor errors.

use thiserror::Error;

use crate::client::ProviderError;

/// Errors surfaced by the extraction loop and its configuration.
#[derive(Error, Debug)]
pub enum TapError {
    /// Invalid or unreadable configuration or state. Raised before any fetch.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The billing API call failed after the client's retries.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding JSON failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TapError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
