//! Linear regression channel over the trailing N closes
//!
//! The fit uses a synthetic index `x = 0..N-1` rather than wall-clock time so
//! overnight and weekend gaps do not bias the slope toward dense periods.
//! Channel width uses the population standard deviation (divisor N) of the
//! residuals, which is what charting platforms plot; it must not be swapped
//! for the sample estimator or channels stop matching previously published
//! values.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::candles::CandleSeries;

/// Default span of the trend EMA
pub const DEFAULT_EMA_SPAN: usize = 50;

/// Where a price sits relative to the channel bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricePosition {
    AboveUpper,
    Inside,
    BelowLower,
}

/// Trend direction derived from the regression slope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

/// Channel parameters for one instrument, replaced wholesale on recompute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Fitted value at the last index
    pub regression: f64,
    pub upper: f64,
    pub lower: f64,
    /// Population standard deviation of residuals
    pub std: f64,
    pub slope: f64,
    /// Trend EMA, absent when fewer than `ema_span` closes were available
    pub ema: Option<f64>,
    pub last_candle_time: NaiveDateTime,
    pub last_volume: f64,
    pub last_close: f64,
    /// Classification of `last_close`; informational only, the monitor's
    /// signal state is tracked separately
    pub position: PricePosition,
}

impl ChannelState {
    pub fn classify(&self, price: f64) -> PricePosition {
        classify(price, self.upper, self.lower)
    }

    pub fn trend(&self) -> Trend {
        if self.slope > 0.0 {
            Trend::Rising
        } else if self.slope < 0.0 {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }

    /// `(price - regression) / regression * 100`, 0 when regression is 0
    pub fn deviation_percent(&self, price: f64) -> f64 {
        if self.regression == 0.0 {
            0.0
        } else {
            (price - self.regression) / self.regression * 100.0
        }
    }

    /// Band width relative to the regression value, in percent
    pub fn width_percent(&self) -> f64 {
        if self.regression == 0.0 {
            0.0
        } else {
            (self.upper - self.lower) / self.regression * 100.0
        }
    }

    /// Traded value of the last candle (volume x close)
    pub fn last_turnover(&self) -> f64 {
        self.last_volume * self.last_close
    }
}

/// Classify a price against channel bounds with zero tolerance
pub fn classify(price: f64, upper: f64, lower: f64) -> PricePosition {
    if price > upper {
        PricePosition::AboveUpper
    } else if price < lower {
        PricePosition::BelowLower
    } else {
        PricePosition::Inside
    }
}

/// Result of an ordinary least squares fit over `x = 0..n-1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Population standard deviation of residuals
    pub residual_std: f64,
}

impl LinearFit {
    pub fn value_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit `y ~ m*x + c` by OLS against the synthetic index
///
/// Values are shifted by `y[0]` before fitting so a flat series produces
/// residuals of exactly zero. Returns `None` for an empty input.
pub fn fit_linear(y: &[f64]) -> Option<LinearFit> {
    let first = *y.first()?;
    let n = y.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let shifted: Vec<f64> = y.iter().map(|v| v - first).collect();
    let y_mean = shifted.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, v) in shifted.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (v - y_mean);
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let shifted_intercept = y_mean - slope * x_mean;

    let sum_sq: f64 = shifted
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let residual = v - (slope * i as f64 + shifted_intercept);
            residual * residual
        })
        .sum();

    Some(LinearFit {
        slope,
        intercept: shifted_intercept + first,
        residual_std: (sum_sq / n).sqrt(),
    })
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with
/// the first value
///
/// Returns `None` when fewer than `span` values are available.
pub fn ema(values: &[f64], span: usize) -> Option<f64> {
    if span == 0 || values.len() < span {
        return None;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut iter = values.iter();
    let seed = *iter.next()?;
    Some(iter.fold(seed, |acc, v| alpha * v + (1.0 - alpha) * acc))
}

/// Compute the regression channel over the trailing `length` closes
///
/// Returns `None` when the series holds fewer than `length` candles; this
/// is the normal "channel unavailable" outcome, not an error.
pub fn compute_channel(
    series: &CandleSeries,
    length: usize,
    std_multiplier: f64,
    ema_span: usize,
) -> Option<ChannelState> {
    if length == 0 || series.len() < length {
        return None;
    }

    let window = series.tail(length);
    let closes = window.closes();
    let fit = fit_linear(&closes)?;
    let last = *window.last()?;

    let regression = fit.value_at((length - 1) as f64);
    let band = std_multiplier * fit.residual_std;
    let upper = regression + band;
    let lower = regression - band;

    Some(ChannelState {
        regression,
        upper,
        lower,
        std: fit.residual_std,
        slope: fit.slope,
        ema: ema(&closes, ema_span),
        last_candle_time: last.timestamp,
        last_volume: last.volume,
        last_close: last.close,
        position: classify(last.close, upper, lower),
    })
}
