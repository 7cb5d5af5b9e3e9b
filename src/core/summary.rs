//! Read-only digest of instruments currently outside their channel
//!
//! The snapshot never touches `signal_state`: an instrument that is already
//! outside its band when a digest is produced still gets its breakout event
//! on the next poll if it has not been reported yet.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::channel::PricePosition;
use crate::core::registry::InstrumentRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub id: String,
    pub ticker: String,
    pub price: f64,
    pub deviation_percent: f64,
}

/// Instruments above / below their channel at snapshot time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Sorted by deviation, largest first
    pub above: Vec<SummaryEntry>,
    /// Sorted by deviation, most negative first
    pub below: Vec<SummaryEntry>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.above.is_empty() && self.below.is_empty()
    }
}

/// Summary plus delivery metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    /// Display cap per list
    pub limit: usize,
}

/// Classify every channelled instrument with a known price
///
/// Instruments without a channel, without a positive price, or whose
/// regression value is not positive are skipped.
pub fn snapshot(registry: &InstrumentRegistry, prices: &HashMap<String, f64>) -> Summary {
    let mut summary = Summary::default();

    for instrument in registry.iter() {
        let Some(channel) = instrument.channel.as_ref() else {
            continue;
        };
        let Some(&price) = prices.get(&instrument.id) else {
            continue;
        };
        // deviation is undefined against a non-positive regression
        if price <= 0.0 || channel.regression <= 0.0 {
            continue;
        }

        let entry = SummaryEntry {
            id: instrument.id.clone(),
            ticker: instrument.ticker.clone(),
            price,
            deviation_percent: channel.deviation_percent(price),
        };
        match channel.classify(price) {
            PricePosition::AboveUpper => summary.above.push(entry),
            PricePosition::BelowLower => summary.below.push(entry),
            PricePosition::Inside => {}
        }
    }

    summary
        .above
        .sort_by(|a, b| b.deviation_percent.partial_cmp(&a.deviation_percent).unwrap_or(Ordering::Equal));
    summary
        .below
        .sort_by(|a, b| a.deviation_percent.partial_cmp(&b.deviation_percent).unwrap_or(Ordering::Equal));

    summary
}
