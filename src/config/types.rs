//! Configuration types for the breakout monitor
//!
//! Loaded from YAML. Every section has defaults matching the production
//! setup (10-minute candles, 200-bar regression, 4 sigma band), so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adapters::retry::RetryConfig;
use crate::adapters::traits::MAX_PRICE_BATCH;
use crate::core::channel::DEFAULT_EMA_SPAN;
use crate::error::AppError;

/// Candle intervals served natively by both the exchange history and the broker API
pub const NATIVE_INTERVALS: &[u32] = &[1, 10, 60];

/// Timeframes accepted in config; non-native ones are resampled from a native interval
pub const SUPPORTED_TIMEFRAMES: &[u32] = &[1, 5, 10, 15, 20, 30, 60];

// ============================================================================
// Configuration Structs
// ============================================================================

/// Channel calculation parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    /// Candle interval in minutes, also the channel refresh cadence
    pub timeframe_minutes: u32,
    /// Number of trailing candles in the regression window (N)
    pub regression_length: usize,
    /// Band half-width in residual standard deviations (k)
    pub std_dev_multiplier: f64,
    /// Span of the trend EMA
    pub ema_span: usize,
    /// Calendar days of history requested from the exchange
    pub history_days: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            timeframe_minutes: 10,
            regression_length: 200,
            std_dev_multiplier: 4.0,
            ema_span: DEFAULT_EMA_SPAN,
            history_days: 10,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !SUPPORTED_TIMEFRAMES.contains(&self.timeframe_minutes) {
            return Err(AppError::Config(format!(
                "timeframe_minutes must be one of {:?} (got {})",
                SUPPORTED_TIMEFRAMES, self.timeframe_minutes
            )));
        }

        if self.regression_length < 2 {
            return Err(AppError::Config(format!(
                "regression_length must be >= 2 (got {})",
                self.regression_length
            )));
        }

        if !(self.std_dev_multiplier > 0.0) {
            return Err(AppError::Config(format!(
                "std_dev_multiplier must be > 0 (got {})",
                self.std_dev_multiplier
            )));
        }

        // EMA runs over the regression window, so a longer span never resolves
        if self.ema_span == 0 || self.ema_span > self.regression_length {
            return Err(AppError::Config(format!(
                "ema_span must be between 1 and regression_length ({}), got {}",
                self.regression_length, self.ema_span
            )));
        }

        if self.history_days == 0 {
            return Err(AppError::Config("history_days must be > 0".to_string()));
        }

        Ok(())
    }

    /// Largest native interval that divides the timeframe
    pub fn source_interval(&self) -> u32 {
        NATIVE_INTERVALS
            .iter()
            .rev()
            .copied()
            .find(|n| self.timeframe_minutes % n == 0)
            .unwrap_or(1)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeframe_minutes) * 60)
    }
}

/// Control loop cadences and concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    /// Price poll period in milliseconds
    pub poll_interval_ms: u64,
    /// Identifiers per last-price request (upstream cap: 100)
    pub price_batch_size: usize,
    /// Instruments refreshed concurrently within one refresh pass
    pub refresh_concurrency: usize,
    /// Pause between refresh batches in milliseconds
    pub refresh_batch_pause_ms: u64,
    /// Sleep after an unexpected loop error in seconds
    pub error_cooldown_secs: u64,
    /// Send a digest of out-of-channel instruments after each refresh
    pub send_summary: bool,
    /// Entries per digest list
    pub summary_limit: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            price_batch_size: MAX_PRICE_BATCH,
            refresh_concurrency: 5,
            refresh_batch_pause_ms: 500,
            error_cooldown_secs: 5,
            send_summary: true,
            summary_limit: 10,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be > 0".to_string()));
        }

        if self.price_batch_size == 0 || self.price_batch_size > MAX_PRICE_BATCH {
            return Err(AppError::Config(format!(
                "price_batch_size must be 1-{}, got {}",
                MAX_PRICE_BATCH, self.price_batch_size
            )));
        }

        if self.refresh_concurrency == 0 {
            return Err(AppError::Config("refresh_concurrency must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Which instrument classes to monitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UniverseConfig {
    pub shares: bool,
    pub futures: bool,
    pub bonds: bool,
    /// Skip futures whose underlying is a single security
    pub exclude_stock_futures: bool,
    /// Keep only the nearest expiration per underlying
    pub nearest_futures_only: bool,
    /// Skip shares not quoted in roubles
    pub only_rub_shares: bool,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            shares: true,
            futures: true,
            bonds: false,
            exclude_stock_futures: true,
            nearest_futures_only: true,
            only_rub_shares: true,
        }
    }
}

/// Notification targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NotifyConfig {
    /// Telegram chat ids receiving breakouts and digests
    pub chat_ids: Vec<i64>,
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    pub monitor: MonitorSettings,
    pub universe: UniverseConfig,
    pub retry: RetryConfig,
    pub notify: NotifyConfig,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        self.strategy.validate()?;
        self.monitor.validate()?;

        if !(self.universe.shares || self.universe.futures || self.universe.bonds) {
            return Err(AppError::Config(
                "universe must enable at least one of shares, futures, bonds".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be >= 1".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
