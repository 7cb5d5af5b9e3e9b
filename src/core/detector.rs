//! Breakout hysteresis state machine
//!
//! Each instrument carries a `SignalState`. A breakout event fires only when
//! price leaves the channel from a different prior state; staying outside
//! on subsequent polls is silent, and returning inside re-arms the detector.
//!
//! | price              | state != Above/Below | state already on that side |
//! |--------------------|----------------------|----------------------------|
//! | `p > upper`        | -> Above, emit Up    | stay, no event             |
//! | `p < lower`        | -> Below, emit Down  | stay, no event             |
//! | `lower..=upper`    | -> None              | -> None                    |
//!
//! `Above -> Below` (and back) emits when price gaps through the whole band
//! between two polls.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::types::InstrumentKind;
use crate::core::channel::ChannelState;

/// Last side of the channel the instrument was reported on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalState {
    #[default]
    None,
    Above,
    Below,
}

/// Breakout direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

impl SignalState {
    /// Apply one price observation against `[lower, upper]`
    ///
    /// Returns the next state and the breakout to emit, if any. A NaN
    /// price matches no branch and leaves the state untouched.
    pub fn transition(self, price: f64, upper: f64, lower: f64) -> (SignalState, Option<Direction>) {
        if price > upper {
            if self == SignalState::Above {
                (self, None)
            } else {
                (SignalState::Above, Some(Direction::Up))
            }
        } else if price < lower {
            if self == SignalState::Below {
                (self, None)
            } else {
                (SignalState::Below, Some(Direction::Down))
            }
        } else if price >= lower && price <= upper {
            (SignalState::None, None)
        } else {
            (self, None)
        }
    }
}

/// Emitted once per channel crossing
#[derive(Debug, Clone, PartialEq)]
pub struct BreakoutEvent {
    pub instrument_id: String,
    pub ticker: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub direction: Direction,
    pub price: f64,
    /// Channel the price was compared against
    pub channel: ChannelState,
    pub detected_at: DateTime<Utc>,
}

impl BreakoutEvent {
    pub fn deviation_percent(&self) -> f64 {
        self.channel.deviation_percent(self.price)
    }

    /// Whether price sits above the trend EMA; `None` when the EMA is undefined
    pub fn above_ema(&self) -> Option<bool> {
        self.channel.ema.map(|ema| self.price > ema)
    }
}
