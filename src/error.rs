//! Application-wide error types using thiserror
//!
//! Startup and wiring errors are wrapped in AppError. Per-instrument fetch
//! failures never reach this type; the monitor logs and skips them.

use thiserror::Error;
use crate::adapters::errors::SourceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials: {0}")]
    Credentials(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
