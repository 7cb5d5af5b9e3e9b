//! Data source error types
//!
//! Every collaborator (candle sources, price source, instrument catalog,
//! notification sink) reports failures through `SourceError` so the monitor
//! can decide per instrument or per batch whether to retry or skip.

use thiserror::Error;

/// Errors raised by external data sources and sinks
#[derive(Error, Debug)]
pub enum SourceError {
    /// Transport or HTTP failure (connection refused, 5xx, timeout)
    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    /// Upstream throttling, retryable with backoff
    #[error("Rate limited by {0}")]
    RateLimited(String),

    /// Identifier lookup failed upstream
    #[error("Instrument unresolvable: {0}")]
    InstrumentUnresolvable(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Outbound notification could not be delivered
    #[error("Notification failed: {0}")]
    Notify(String),
}

impl SourceError {
    /// Whether a later attempt may succeed without any change on our side
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }
}

impl SourceError {
    /// Map a non-success HTTP status from `source`
    ///
    /// 429 is throttling, 404 means the requested identifier is unknown
    /// upstream, everything else is a plain fetch failure.
    pub fn from_status(source: &str, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            429 => SourceError::RateLimited(source.to_string()),
            404 => SourceError::InstrumentUnresolvable(format!("{} ({}): {}", source, status, body)),
            _ => SourceError::DataFetch(format!("{} ({}): {}", source, status, body)),
        }
    }
}

// URLs are stripped: the Telegram endpoint embeds the bot token
impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            SourceError::RateLimited(err.to_string())
        } else {
            SourceError::DataFetch(err.to_string())
        }
    }
}

/// Result type alias for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;
