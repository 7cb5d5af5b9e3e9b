//! MOEX ISS client
//!
//! Authoritative candle history and board ticker listings from the public
//! ISS JSON API. ISS answers with column-oriented tables
//! (`{"candles": {"columns": [...], "data": [[...], ...]}}`) and caps rows
//! per call, so candle requests are paginated with `start` until a short
//! page comes back.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::errors::{SourceError, SourceResult};
use crate::adapters::traits::{ExchangeBoardSource, HistoricalCandleSource};
use crate::adapters::types::{session_today, BoardParams, InstrumentRef};
use crate::config::constants::{http_timeout, moex_page_size};
use crate::core::candles::{Candle, CandleSeries};

pub const DEFAULT_BASE_URL: &str = "https://iss.moex.com/iss";

/// Hard stop for runaway pagination
const MAX_PAGES: usize = 200;

const SOURCE: &str = "moex";

/// Column-oriented ISS table
#[derive(Debug, Deserialize)]
struct IssTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl IssTable {
    fn column(&self, name: &str) -> SourceResult<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| SourceError::InvalidResponse(format!("ISS table has no '{}' column", name)))
    }
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: IssTable,
}

#[derive(Debug, Deserialize)]
struct SecuritiesResponse {
    securities: IssTable,
}

pub struct MoexClient {
    http_client: reqwest::Client,
    base_url: String,
    page_size: usize,
}

impl MoexClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(http_timeout())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: moex_page_size(),
        }
    }

    /// Override the expected rows per page (the upstream cap)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SourceResult<T> {
        let response = self.http_client.get(url).query(query).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(SourceError::from_status(SOURCE, status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| SourceError::InvalidResponse(format!("ISS JSON: {}", e)))
    }

    /// Fetch every page of candles between two dates, inclusive
    async fn fetch_candles(
        &self,
        instrument: &InstrumentRef,
        interval_minutes: u32,
        from: &str,
        till: &str,
    ) -> SourceResult<Vec<Candle>> {
        let board = &instrument.board;
        let url = format!(
            "{}/engines/{}/markets/{}/boards/{}/securities/{}/candles.json",
            self.base_url, board.engine, board.market, board.board, instrument.ticker
        );

        let mut candles = Vec::new();
        for page in 0..MAX_PAGES {
            let query = [
                ("interval", interval_minutes.to_string()),
                ("from", from.to_string()),
                ("till", till.to_string()),
                ("start", candles.len().to_string()),
            ];
            let response: CandlesResponse = self.get(&url, &query).await?;
            let rows = parse_candles(&response.candles)?;
            let row_count = rows.len();
            candles.extend(rows);

            if row_count < self.page_size {
                debug!(ticker = %instrument.ticker, pages = page + 1, candles = candles.len(), "ISS candles fetched");
                return Ok(candles);
            }
        }

        warn!(ticker = %instrument.ticker, pages = MAX_PAGES, "ISS pagination limit reached");
        Ok(candles)
    }
}

impl Default for MoexClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_candles(table: &IssTable) -> SourceResult<Vec<Candle>> {
    let open = table.column("open")?;
    let high = table.column("high")?;
    let low = table.column("low")?;
    let close = table.column("close")?;
    let volume = table.column("volume")?;
    let begin = table.column("begin")?;

    table
        .data
        .iter()
        .map(|row| {
            let timestamp = row
                .get(begin)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
                .ok_or_else(|| SourceError::InvalidResponse(format!("bad candle begin: {:?}", row.get(begin))))?;

            Ok(Candle {
                timestamp,
                open: number(row, open)?,
                high: number(row, high)?,
                low: number(row, low)?,
                close: number(row, close)?,
                volume: number(row, volume).unwrap_or(0.0),
            })
        })
        .collect()
}

/// ISS emits numbers, occasionally as strings
fn number(row: &[Value], idx: usize) -> SourceResult<f64> {
    match row.get(idx) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| SourceError::InvalidResponse(format!("bad number in column {}: {:?}", idx, row.get(idx))))
}

#[async_trait]
impl HistoricalCandleSource for MoexClient {
    /// Candles from `days_back` days ago through yesterday (session clock)
    async fn fetch_until(
        &self,
        instrument: &InstrumentRef,
        interval_minutes: u32,
        days_back: u32,
    ) -> SourceResult<CandleSeries> {
        let today = session_today();
        let from = (today - Duration::days(i64::from(days_back))).format("%Y-%m-%d").to_string();
        let till = (today - Duration::days(1)).format("%Y-%m-%d").to_string();

        let candles = self.fetch_candles(instrument, interval_minutes, &from, &till).await?;
        Ok(CandleSeries::from_candles(candles))
    }
}

#[async_trait]
impl ExchangeBoardSource for MoexClient {
    async fn board_tickers(&self, board: &BoardParams) -> SourceResult<Vec<String>> {
        let url = format!(
            "{}/engines/{}/markets/{}/boards/{}/securities.json",
            self.base_url, board.engine, board.market, board.board
        );
        let query = [
            ("iss.only", "securities".to_string()),
            ("securities.columns", "SECID".to_string()),
        ];

        let response: SecuritiesResponse = self.get(&url, &query).await?;
        let secid = response.securities.column("SECID")?;

        Ok(response
            .securities
            .data
            .iter()
            .filter_map(|row| row.get(secid).and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}
