//! Configuration module
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `StrategyConfig`, `MonitorSettings`, `UniverseConfig`)
//! - YAML loading functionality (`load_config`)
//! - API credentials from the environment (`Credentials`)
//! - Operational constants with environment variable overrides

pub mod constants;
mod credentials;
mod loader;
mod types;

// Re-export types
pub use types::{
    AppConfig, MonitorSettings, NotifyConfig, StrategyConfig, UniverseConfig, NATIVE_INTERVALS,
    SUPPORTED_TIMEFRAMES,
};

pub use credentials::{Credentials, BOT_TOKEN_VAR, TINKOFF_TOKEN_VAR};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
