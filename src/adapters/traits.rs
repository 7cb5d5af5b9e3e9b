//! Collaborator traits consumed by the core
//!
//! The monitor only ever talks to these traits. Concrete HTTP clients
//! (`MoexClient`, `TinkoffClient`, `TelegramSink`) implement them, and tests
//! plug in mocks.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::adapters::errors::SourceResult;
use crate::adapters::types::{BoardParams, InstrumentInfo, InstrumentRef};
use crate::core::candles::CandleSeries;
use crate::core::detector::BreakoutEvent;
use crate::core::summary::SummaryReport;

/// Upstream cap on identifiers per last-price request
pub const MAX_PRICE_BATCH: usize = 100;

/// Slow, authoritative candle history
#[async_trait]
pub trait HistoricalCandleSource: Send + Sync {
    /// Fetch candles from `days_back` days ago up to, but excluding, the
    /// current trading day
    ///
    /// Implementations paginate transparently when the upstream caps rows
    /// per call. Timestamps are in the exchange's local session clock.
    async fn fetch_until(
        &self,
        instrument: &InstrumentRef,
        interval_minutes: u32,
        days_back: u32,
    ) -> SourceResult<CandleSeries>;
}

/// Fast, provisional candles for the current trading day only
#[async_trait]
pub trait IntradaySource: Send + Sync {
    /// Timestamps must use the same session clock as the historical source
    async fn fetch_today(
        &self,
        instrument: &InstrumentRef,
        interval_minutes: u32,
    ) -> SourceResult<CandleSeries>;
}

/// Real-time last traded prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch last prices for at most `MAX_PRICE_BATCH` identifiers
    ///
    /// Identifiers without a positive price are absent from the result.
    /// Throttling surfaces as `SourceError::RateLimited`.
    async fn fetch_last_prices(&self, ids: &[String]) -> SourceResult<HashMap<String, f64>>;
}

/// Broker-side instrument listing
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    async fn shares(&self, only_rub: bool) -> SourceResult<Vec<InstrumentInfo>>;

    async fn futures(
        &self,
        exclude_stock_futures: bool,
        nearest_only: bool,
    ) -> SourceResult<Vec<InstrumentInfo>>;

    async fn bonds(&self) -> SourceResult<Vec<InstrumentInfo>>;
}

/// Exchange-side ticker listing per trading board
#[async_trait]
pub trait ExchangeBoardSource: Send + Sync {
    async fn board_tickers(&self, board: &BoardParams) -> SourceResult<Vec<String>>;
}

/// Outbound notifications
///
/// Fire-and-forget from the core's perspective: errors are logged by the
/// caller and never retried.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &BreakoutEvent) -> SourceResult<()>;

    async fn send_summary(&self, report: &SummaryReport) -> SourceResult<()>;
}
