//! Centralized logging configuration for breakout_bot
//!
//! Structured logging through `tracing`:
//! - JSON output by default (parseable by log aggregation tools)
//! - Pretty-print output with `LOG_FORMAT=pretty`
//! - Level filter via `RUST_LOG`
//! - Redaction helpers for API tokens
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `breakout_bot=info` | Log level filter (standard tracing format) |
//! | `LOG_FORMAT` | `json` | Output format: `json` or `pretty` |
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use breakout_bot::core::logging::{init_logging, SanitizedValue};
//!
//! init_logging();
//!
//! let token = "t.1234567890abcdef";
//! tracing::info!(token = %SanitizedValue::new(token), "Connecting to broker");
//! // Output: token = "t.12...REDACTED"
//! ```

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt as ts_fmt, fmt::format::FmtSpan, prelude::*, EnvFilter};

/// Flag to track if logging has been initialized (prevents double-init)
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Default log level when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "breakout_bot=info";

/// Wrapper for sensitive data that should be redacted in logs.
///
/// Values longer than 8 characters keep their first 4 characters followed by
/// "...REDACTED"; shorter values are fully redacted.
#[derive(Clone)]
pub struct SanitizedValue<'a>(&'a str);

impl<'a> SanitizedValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self(value)
    }
}

impl<'a> fmt::Display for SanitizedValue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get(..4) {
            Some(prefix) if self.0.len() > 8 => write!(f, "{}...REDACTED", prefix),
            _ => write!(f, "REDACTED"),
        }
    }
}

impl<'a> fmt::Debug for SanitizedValue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizedValue(***)")
    }
}

/// Shorthand for `SanitizedValue::new(value)`.
pub fn sanitize(value: &str) -> SanitizedValue<'_> {
    SanitizedValue::new(value)
}

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter string (e.g., "breakout_bot=debug,breakout_bot::adapters=trace")
    pub level_filter: String,
    /// Use pretty format instead of JSON
    pub use_pretty_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level_filter: DEFAULT_LOG_LEVEL.to_string(),
            use_pretty_format: false,
        }
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG` and `LOG_FORMAT`
    pub fn from_env() -> Self {
        let level_filter = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        let use_pretty_format = env::var("LOG_FORMAT")
            .map(|v| v.to_lowercase() == "pretty")
            .unwrap_or(false);

        Self {
            level_filter,
            use_pretty_format,
        }
    }
}

/// Initialize logging from environment variables.
///
/// Subsequent calls are no-ops.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::from_env());
}

/// Initialize logging with an explicit configuration.
pub fn init_logging_with_config(config: LoggingConfig) {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let env_filter = EnvFilter::try_new(&config.level_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if config.use_pretty_format {
        tracing_subscriber::registry()
            .with(
                ts_fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                ts_fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_current_span(true),
            )
            .with(env_filter)
            .init();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
