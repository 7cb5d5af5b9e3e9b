//! Regression-channel breakout monitor for MOEX instruments
//!
//! - Adapters for MOEX ISS history, Tinkoff Invest market data and Telegram
//! - Linear regression channels over merged historical + intraday candles
//! - Hysteresis breakout detection with periodic summaries

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;

pub use error::AppError;
