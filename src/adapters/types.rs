//! Shared types exchanged between the data sources and the core
//!
//! Instrument identity lives here because both the exchange board source
//! (keyed by ticker + board) and the broker API (keyed by FIGI) need it.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of the exchange session clock (Moscow time, no DST)
pub const SESSION_UTC_OFFSET_HOURS: i64 = 3;

/// Convert a UTC instant to the exchange session clock
pub fn to_session_time(utc: DateTime<Utc>) -> NaiveDateTime {
    utc.naive_utc() + Duration::hours(SESSION_UTC_OFFSET_HOURS)
}

/// Current trading date in the session clock
pub fn session_today() -> NaiveDate {
    to_session_time(Utc::now()).date()
}

/// Asset class of a monitored instrument
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Share,
    Future,
    Bond,
}

impl InstrumentKind {
    /// Exchange board this asset class trades on
    pub fn board(&self) -> BoardParams {
        match self {
            InstrumentKind::Share => BoardParams::new("stock", "shares", "TQBR"),
            InstrumentKind::Future => BoardParams::new("futures", "forts", "RFUD"),
            InstrumentKind::Bond => BoardParams::new("stock", "bonds", "TQOB"),
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Share => write!(f, "share"),
            InstrumentKind::Future => write!(f, "future"),
            InstrumentKind::Bond => write!(f, "bond"),
        }
    }
}

/// Exchange routing for historical candle requests (engine/market/board)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BoardParams {
    pub engine: String,
    pub market: String,
    pub board: String,
}

impl BoardParams {
    pub fn new(engine: &str, market: &str, board: &str) -> Self {
        Self {
            engine: engine.to_string(),
            market: market.to_string(),
            board: board.to_string(),
        }
    }
}

impl fmt::Display for BoardParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.engine, self.market, self.board)
    }
}

/// Everything a source needs to address one instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentRef {
    /// Broker-assigned identifier (FIGI), used by the intraday and price sources
    pub id: String,
    /// Exchange ticker, used by the historical source
    pub ticker: String,
    pub board: BoardParams,
}

/// Catalog entry as listed by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentInfo {
    pub id: String,
    pub ticker: String,
    pub name: String,
    pub kind: InstrumentKind,
}
