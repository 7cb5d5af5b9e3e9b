//! Data source and notification adapters
//!
//! MOEX ISS supplies authoritative candle history and board listings,
//! Tinkoff Invest supplies the catalog, intraday candles and last prices,
//! and Telegram receives the alerts. The core only sees the traits.

pub mod errors;
pub mod moex;
pub mod retry;
pub mod telegram;
pub mod tinkoff;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use errors::{SourceError, SourceResult};
pub use moex::MoexClient;
pub use retry::{retry_with_backoff, FetchOutcome, RetryConfig};
pub use telegram::TelegramSink;
pub use tinkoff::TinkoffClient;
pub use traits::{
    ExchangeBoardSource, HistoricalCandleSource, InstrumentCatalog, IntradaySource,
    NotificationSink, PriceSource, MAX_PRICE_BATCH,
};
pub use types::{BoardParams, InstrumentInfo, InstrumentKind, InstrumentRef};
