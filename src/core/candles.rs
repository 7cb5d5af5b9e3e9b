//! Candle series and the hybrid historical/intraday merge
//!
//! A `CandleSeries` is one instrument, one interval, one contiguous window,
//! sorted ascending by timestamp with unique timestamps. Every transformation
//! (merge, tail, resample) returns a new series.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// One OHLCV bar, `timestamp` is the bar open time in the session clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time-ordered, timestamp-unique sequence of candles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series from candles in arbitrary order
    ///
    /// Sorts ascending; on duplicate timestamps the later element in the
    /// input wins.
    pub fn from_candles(candles: Vec<Candle>) -> Self {
        let by_time: BTreeMap<NaiveDateTime, Candle> =
            candles.into_iter().map(|c| (c.timestamp, c)).collect();
        Self {
            candles: by_time.into_values().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Strictly ascending timestamps
    pub fn is_valid(&self) -> bool {
        self.candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
    }

    /// Trailing `n` candles (the whole series if shorter)
    pub fn tail(&self, n: usize) -> CandleSeries {
        let start = self.candles.len().saturating_sub(n);
        CandleSeries {
            candles: self.candles[start..].to_vec(),
        }
    }
}

/// Combine authoritative history with the provisional intraday series
///
/// If either side is empty the other is returned unchanged. Otherwise the
/// result is deduplicated by timestamp, intraday winning on conflict, and
/// sorted ascending.
pub fn merge(historical: &CandleSeries, intraday: &CandleSeries) -> CandleSeries {
    if historical.is_empty() {
        return intraday.clone();
    }
    if intraday.is_empty() {
        return historical.clone();
    }

    let mut by_time: BTreeMap<NaiveDateTime, Candle> = BTreeMap::new();
    for candle in historical.candles.iter().chain(intraday.candles.iter()) {
        by_time.insert(candle.timestamp, *candle);
    }

    CandleSeries {
        candles: by_time.into_values().collect(),
    }
}

/// Aggregate candles into `minutes`-wide buckets aligned to midnight
///
/// open = first, high = max, low = min, close = last, volume = sum.
/// Buckets without any source candle are not emitted.
pub fn resample(series: &CandleSeries, minutes: u32) -> CandleSeries {
    if series.is_empty() || minutes == 0 {
        return series.clone();
    }

    let mut buckets: BTreeMap<NaiveDateTime, Candle> = BTreeMap::new();
    for candle in &series.candles {
        let key = bucket_start(candle.timestamp, minutes);
        buckets
            .entry(key)
            .and_modify(|agg| {
                agg.high = agg.high.max(candle.high);
                agg.low = agg.low.min(candle.low);
                agg.close = candle.close;
                agg.volume += candle.volume;
            })
            .or_insert(Candle {
                timestamp: key,
                ..*candle
            });
    }

    CandleSeries {
        candles: buckets.into_values().collect(),
    }
}

fn bucket_start(ts: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    let minute_of_day = ts.hour() * 60 + ts.minute();
    let floored = minute_of_day - minute_of_day % minutes;
    ts.date().and_hms_opt(0, 0, 0).unwrap_or(ts) + Duration::minutes(i64::from(floored))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    pub(crate) fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    pub(crate) fn candle(timestamp: NaiveDateTime, close: f64) -> Candle {
        Candle {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn test_merge_empty_historical_returns_intraday() {
        let intraday = CandleSeries::from_candles(vec![candle(ts(5, 10, 0), 1.0)]);
        let merged = merge(&CandleSeries::empty(), &intraday);
        assert_eq!(merged, intraday);
    }

    #[test]
    fn test_merge_empty_intraday_returns_historical() {
        let historical = CandleSeries::from_candles(vec![candle(ts(4, 10, 0), 1.0)]);
        let merged = merge(&historical, &CandleSeries::empty());
        assert_eq!(merged, historical);
    }

    #[test]
    fn test_merge_intraday_wins_on_conflict() {
        let historical = CandleSeries::from_candles(vec![
            candle(ts(5, 10, 0), 100.0),
            candle(ts(5, 10, 10), 101.0),
        ]);
        let intraday = CandleSeries::from_candles(vec![
            candle(ts(5, 10, 10), 202.0),
            candle(ts(5, 10, 20), 203.0),
        ]);

        let merged = merge(&historical, &intraday);

        assert_eq!(merged.len(), 3);
        assert!(merged.is_valid());
        assert_eq!(merged.closes(), vec![100.0, 202.0, 203.0]);
    }

    #[test]
    fn test_merge_interleaved_sources_sorted() {
        let historical = CandleSeries::from_candles(vec![candle(ts(4, 18, 0), 1.0)]);
        let intraday = CandleSeries::from_candles(vec![candle(ts(3, 12, 0), 2.0)]);
        let merged = merge(&historical, &intraday);
        assert_eq!(merged.closes(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_from_candles_sorts_and_dedups() {
        let series = CandleSeries::from_candles(vec![
            candle(ts(5, 11, 0), 3.0),
            candle(ts(5, 10, 0), 1.0),
            candle(ts(5, 11, 0), 4.0),
        ]);
        assert_eq!(series.closes(), vec![1.0, 4.0]);
        assert!(series.is_valid());
    }

    #[test]
    fn test_tail() {
        let series = CandleSeries::from_candles(
            (0..5).map(|i| candle(ts(5, 10, i * 10), i as f64)).collect(),
        );
        assert_eq!(series.tail(2).closes(), vec![3.0, 4.0]);
        assert_eq!(series.tail(10).len(), 5);
        assert_eq!(series.len(), 5);
    }

    #[test]
    fn test_resample_aggregates_ohlcv() {
        let series = CandleSeries::from_candles(vec![
            Candle { timestamp: ts(5, 10, 0), open: 10.0, high: 12.0, low: 9.0, close: 11.0, volume: 1.0 },
            Candle { timestamp: ts(5, 10, 1), open: 11.0, high: 15.0, low: 10.0, close: 14.0, volume: 2.0 },
            Candle { timestamp: ts(5, 10, 14), open: 14.0, high: 14.5, low: 8.0, close: 13.0, volume: 3.0 },
            Candle { timestamp: ts(5, 10, 15), open: 13.0, high: 13.0, low: 13.0, close: 13.0, volume: 4.0 },
        ]);

        let resampled = resample(&series, 15);

        assert_eq!(resampled.len(), 2);
        let first = resampled.candles()[0];
        assert_eq!(first.timestamp, ts(5, 10, 0));
        assert_eq!(first.open, 10.0);
        assert_eq!(first.high, 15.0);
        assert_eq!(first.low, 8.0);
        assert_eq!(first.close, 13.0);
        assert_eq!(first.volume, 6.0);
        assert_eq!(resampled.candles()[1].timestamp, ts(5, 10, 15));
    }

    #[test]
    fn test_resample_skips_empty_buckets() {
        let series = CandleSeries::from_candles(vec![
            candle(ts(5, 10, 0), 1.0),
            candle(ts(5, 12, 0), 2.0),
        ]);
        let resampled = resample(&series, 60);
        assert_eq!(resampled.len(), 2);
    }

    fn arb_series() -> impl Strategy<Value = CandleSeries> {
        prop::collection::vec((0u32..500, 1.0f64..1000.0), 0..60).prop_map(|points| {
            CandleSeries::from_candles(
                points
                    .into_iter()
                    .map(|(offset, close)| candle(ts(1, 0, 0) + Duration::minutes(i64::from(offset) * 10), close))
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_sorted_unique_and_prefers_intraday(
            historical in arb_series(),
            intraday in arb_series(),
        ) {
            let merged = merge(&historical, &intraday);

            prop_assert!(merged.is_valid());
            prop_assert!(merged.len() <= historical.len() + intraday.len());

            for c in intraday.candles() {
                let found = merged.candles().iter().find(|m| m.timestamp == c.timestamp);
                prop_assert_eq!(found, Some(c));
            }
            for c in historical.candles() {
                prop_assert!(merged.candles().iter().any(|m| m.timestamp == c.timestamp));
            }
        }
    }
}
