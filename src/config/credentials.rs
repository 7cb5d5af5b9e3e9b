//! API credentials loaded from environment variables
//!
//! Both tokens are required; a missing token is the one condition that
//! stops the process before it starts monitoring.

use std::fmt;

use tracing::info;

use crate::core::logging::sanitize;
use crate::error::AppError;

/// Environment variable holding the Tinkoff Invest API token
pub const TINKOFF_TOKEN_VAR: &str = "TINKOFF_TOKEN";

/// Environment variable holding the Telegram bot token
pub const BOT_TOKEN_VAR: &str = "BOT_TOKEN";

#[derive(Clone)]
pub struct Credentials {
    pub tinkoff_token: String,
    pub bot_token: String,
}

impl Credentials {
    /// Load both tokens from the environment
    ///
    /// Empty values count as missing.
    pub fn from_env() -> Result<Self, AppError> {
        let tinkoff_token = required(TINKOFF_TOKEN_VAR)?;
        let bot_token = required(BOT_TOKEN_VAR)?;

        info!(
            tinkoff_token = %sanitize(&tinkoff_token),
            bot_token = %sanitize(&bot_token),
            "Credentials loaded"
        );

        Ok(Self {
            tinkoff_token,
            bot_token,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tinkoff_token", &sanitize(&self.tinkoff_token))
            .field("bot_token", &sanitize(&self.bot_token))
            .finish()
    }
}

fn required(var: &str) -> Result<String, AppError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Credentials(format!("{} is not set", var))),
    }
}

// ============================================================================
// Tests
// ============================================================================
