//! Tinkoff Invest REST client
//!
//! Serves three roles for the monitor: today's intraday candles, batched
//! last prices, and the broker-side instrument catalog. Every call is a
//! JSON POST to `{base}/tinkoff.public.invest.api.contract.v1.{Service}/{Method}`
//! with a Bearer token.
//!
//! Prices arrive as `Quotation { units, nano }` where `units` is an int64
//! encoded as a JSON string; the value is `units + nano / 1e9`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::debug;

use crate::adapters::errors::{SourceError, SourceResult};
use crate::adapters::traits::{InstrumentCatalog, IntradaySource, PriceSource, MAX_PRICE_BATCH};
use crate::adapters::types::{to_session_time, InstrumentInfo, InstrumentKind, InstrumentRef};
use crate::config::constants::http_timeout;
use crate::core::candles::{Candle, CandleSeries};

pub const DEFAULT_BASE_URL: &str = "https://invest-public-api.tinkoff.ru/rest";

const API_PREFIX: &str = "tinkoff.public.invest.api.contract.v1";

const SOURCE: &str = "tinkoff";

// =============================================================================
// Wire types
// =============================================================================

/// int64 fields are strings in the REST mapping, but accept plain numbers too
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(i64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Quotation {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl Quotation {
    pub fn to_f64(self) -> f64 {
        self.units as f64 + f64::from(self.nano) / 1e9
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricCandle {
    #[serde(default)]
    open: Quotation,
    #[serde(default)]
    high: Quotation,
    #[serde(default)]
    low: Quotation,
    #[serde(default)]
    close: Quotation,
    #[serde(default, deserialize_with = "lenient_i64")]
    volume: i64,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<HistoricCandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastPrice {
    #[serde(default)]
    figi: String,
    price: Option<Quotation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastPricesResponse {
    #[serde(default)]
    last_prices: Vec<LastPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentItem {
    #[serde(default)]
    figi: String,
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    asset_type: String,
    #[serde(default)]
    basic_asset: String,
    expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    #[serde(default)]
    instruments: Vec<InstrumentItem>,
}

/// REST enum name for a candle interval
pub fn candle_interval(minutes: u32) -> Option<&'static str> {
    match minutes {
        1 => Some("CANDLE_INTERVAL_1_MIN"),
        5 => Some("CANDLE_INTERVAL_5_MIN"),
        10 => Some("CANDLE_INTERVAL_10_MIN"),
        15 => Some("CANDLE_INTERVAL_15_MIN"),
        60 => Some("CANDLE_INTERVAL_HOUR"),
        _ => None,
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct TinkoffClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TinkoffClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(http_timeout())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> SourceResult<T> {
        let url = format!("{}/{}.{}", self.base_url, API_PREFIX, method);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(SourceError::from_status(SOURCE, status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| SourceError::InvalidResponse(format!("{}: {}", method, e)))
    }

    async fn instruments(&self, method: &str) -> SourceResult<Vec<InstrumentItem>> {
        let response: InstrumentsResponse = self
            .post(method, json!({ "instrumentStatus": "INSTRUMENT_STATUS_BASE" }))
            .await?;
        Ok(response.instruments)
    }
}

fn info(item: InstrumentItem, kind: InstrumentKind) -> InstrumentInfo {
    InstrumentInfo {
        id: item.figi,
        ticker: item.ticker,
        name: item.name,
        kind,
    }
}

/// Apply the futures filters to a raw listing
fn select_futures(items: Vec<InstrumentItem>, exclude_stock_futures: bool, nearest_only: bool) -> Vec<InstrumentInfo> {
    let eligible = items
        .into_iter()
        .filter(|item| !(exclude_stock_futures && item.asset_type.to_uppercase().contains("SECURITY")));

    if !nearest_only {
        return eligible.map(|item| info(item, InstrumentKind::Future)).collect();
    }

    // ISO dates compare correctly as strings; missing expirations sort last
    let mut nearest: BTreeMap<String, InstrumentItem> = BTreeMap::new();
    for item in eligible {
        let expiry = item.expiration_date.clone().unwrap_or_else(|| "9999-12-31".to_string());
        let replace = match nearest.get(&item.basic_asset) {
            Some(current) => expiry < current.expiration_date.clone().unwrap_or_else(|| "9999-12-31".to_string()),
            None => true,
        };
        if replace {
            nearest.insert(item.basic_asset.clone(), item);
        }
    }

    nearest
        .into_values()
        .map(|item| info(item, InstrumentKind::Future))
        .collect()
}

#[async_trait]
impl IntradaySource for TinkoffClient {
    /// Candles from 00:00 UTC today until now, in the session clock
    async fn fetch_today(&self, instrument: &InstrumentRef, interval_minutes: u32) -> SourceResult<CandleSeries> {
        let interval = candle_interval(interval_minutes).ok_or_else(|| {
            SourceError::DataFetch(format!("unsupported candle interval: {} min", interval_minutes))
        })?;

        let now = Utc::now();
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        let response: CandlesResponse = self
            .post(
                "MarketDataService/GetCandles",
                json!({
                    "figi": instrument.id,
                    "from": day_start.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "to": now.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "interval": interval,
                    "candleSourceType": "CANDLE_SOURCE_EXCHANGE",
                }),
            )
            .await?;

        let candles: Vec<Candle> = response
            .candles
            .into_iter()
            .map(|c| Candle {
                timestamp: to_session_time(c.time),
                open: c.open.to_f64(),
                high: c.high.to_f64(),
                low: c.low.to_f64(),
                close: c.close.to_f64(),
                volume: c.volume as f64,
            })
            .collect();

        debug!(ticker = %instrument.ticker, candles = candles.len(), "Intraday candles fetched");
        Ok(CandleSeries::from_candles(candles))
    }
}

#[async_trait]
impl PriceSource for TinkoffClient {
    async fn fetch_last_prices(&self, ids: &[String]) -> SourceResult<HashMap<String, f64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        if ids.len() > MAX_PRICE_BATCH {
            return Err(SourceError::DataFetch(format!(
                "price batch of {} exceeds limit {}",
                ids.len(),
                MAX_PRICE_BATCH
            )));
        }

        let response: LastPricesResponse = self
            .post("MarketDataService/GetLastPrices", json!({ "figi": ids }))
            .await?;

        Ok(response
            .last_prices
            .into_iter()
            .filter_map(|lp| {
                let price = lp.price?.to_f64();
                (!lp.figi.is_empty() && price > 0.0).then_some((lp.figi, price))
            })
            .collect())
    }
}

#[async_trait]
impl InstrumentCatalog for TinkoffClient {
    async fn shares(&self, only_rub: bool) -> SourceResult<Vec<InstrumentInfo>> {
        let items = self.instruments("InstrumentsService/Shares").await?;
        Ok(items
            .into_iter()
            .filter(|item| !only_rub || item.currency.eq_ignore_ascii_case("rub"))
            .map(|item| info(item, InstrumentKind::Share))
            .collect())
    }

    async fn futures(&self, exclude_stock_futures: bool, nearest_only: bool) -> SourceResult<Vec<InstrumentInfo>> {
        let items = self.instruments("InstrumentsService/Futures").await?;
        Ok(select_futures(items, exclude_stock_futures, nearest_only))
    }

    async fn bonds(&self) -> SourceResult<Vec<InstrumentInfo>> {
        let items = self.instruments("InstrumentsService/Bonds").await?;
        Ok(items
            .into_iter()
            .map(|item| info(item, InstrumentKind::Bond))
            .collect())
    }
}
