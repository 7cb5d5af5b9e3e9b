//! Application-wide constants and configuration defaults
//!
//! Values that are operational rather than strategic live here instead of
//! the YAML file. Each can be overridden via an environment variable.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Files
// =============================================================================

/// Path of the YAML configuration (default: `config.yaml`)
///
/// Environment variable: `BREAKOUT_CONFIG`
pub fn config_path() -> PathBuf {
    std::env::var("BREAKOUT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yaml"))
}

// =============================================================================
// HTTP
// =============================================================================

/// Per-request timeout for every upstream API (default: 30 seconds)
///
/// Environment variable: `HTTP_TIMEOUT_SECS`
pub fn http_timeout() -> Duration {
    let secs = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    Duration::from_secs(secs)
}

/// Rows per page requested from the exchange ISS API (default: 500)
///
/// Environment variable: `MOEX_PAGE_SIZE`
pub fn moex_page_size() -> usize {
    std::env::var("MOEX_PAGE_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(500)
}

// =============================================================================
// Channels
// =============================================================================

/// Capacity of the monitor -> notifier queue (default: 256 messages)
///
/// Environment variable: `NOTIFICATION_CHANNEL_CAPACITY`
pub fn notification_channel_capacity() -> usize {
    std::env::var("NOTIFICATION_CHANNEL_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(256)
}

/// Print all operational values (for startup logs)
pub fn log_configuration() {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("  - Config path: {}", config_path().display());
    tracing::info!("  - HTTP timeout: {:?}", http_timeout());
    tracing::info!("  - MOEX page size: {}", moex_page_size());
    tracing::info!("  - Notification capacity: {}", notification_channel_capacity());
    tracing::info!("==================================");
}
