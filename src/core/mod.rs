//! Core module - candles, regression channels, breakout detection, monitor loop
//!
//! This module uses **explicit re-exports** instead of glob exports (`pub use module::*`)
//! to keep the public API visible in one place.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{BreakoutMonitor, ChannelState, CandleSeries};
//! ```

pub mod candles;
pub mod channel;
pub mod channels;
pub mod detector;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod runtime;
pub mod summary;

// Explicit re-exports for candles module
pub use candles::{merge, resample, Candle, CandleSeries};

// Explicit re-exports for channel module
pub use channel::{
    classify, compute_channel, ema, fit_linear, ChannelState, LinearFit, PricePosition, Trend,
    DEFAULT_EMA_SPAN,
};

// Explicit re-exports for detector module
pub use detector::{BreakoutEvent, Direction, SignalState};

// Explicit re-exports for registry module
pub use registry::{load_registry, Instrument, InstrumentRegistry};

// Explicit re-exports for summary module
pub use summary::{snapshot, Summary, SummaryEntry, SummaryReport};

// Explicit re-exports for channels module
pub use channels::{ChannelBundle, Notification, DEFAULT_CHANNEL_CAPACITY};

// Explicit re-exports for logging module
pub use logging::{
    init_logging, init_logging_with_config, sanitize, LoggingConfig, SanitizedValue,
    DEFAULT_LOG_LEVEL,
};

// Explicit re-exports for monitor module
pub use monitor::{price_batches, BreakoutMonitor, MonitorSources, MonitorStatus, RefreshStats};

// Explicit re-exports for runtime module
pub use runtime::notification_task;
