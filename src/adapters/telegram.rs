//! Telegram Bot API notification sink
//!
//! Messages go to every configured chat via `sendMessage` with HTML markup.
//! One unreachable chat does not block the others; the call fails only when
//! no chat accepted the message.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::adapters::errors::{SourceError, SourceResult};
use crate::adapters::traits::NotificationSink;
use crate::adapters::types::to_session_time;
use crate::config::constants::http_timeout;
use crate::core::channel::Trend;
use crate::core::detector::{BreakoutEvent, Direction};
use crate::core::summary::{SummaryEntry, SummaryReport};

pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

pub struct TelegramSink {
    http_client: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_ids: Vec<i64>,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_ids: Vec<i64>) -> Self {
        Self::with_base_url(bot_token, chat_ids, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        bot_token: impl Into<String>,
        chat_ids: Vec<i64>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(http_timeout())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_ids,
        }
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> SourceResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Notify(format!("chat {}: HTTP {} {}", chat_id, status.as_u16(), body)));
        }
        Ok(())
    }

    /// Deliver `text` to all chats
    pub async fn broadcast(&self, text: &str) -> SourceResult<()> {
        if self.chat_ids.is_empty() {
            return Err(SourceError::Notify("no chat ids configured".to_string()));
        }

        let mut delivered = 0usize;
        for &chat_id in &self.chat_ids {
            match self.send_to(chat_id, text).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(chat_id, error = %e, "Telegram delivery failed"),
            }
        }

        if delivered == 0 {
            return Err(SourceError::Notify(format!(
                "message rejected by all {} chats",
                self.chat_ids.len()
            )));
        }

        debug!(delivered, chats = self.chat_ids.len(), "Telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn notify(&self, event: &BreakoutEvent) -> SourceResult<()> {
        self.broadcast(&format_breakout(event)).await
    }

    async fn send_summary(&self, report: &SummaryReport) -> SourceResult<()> {
        self.broadcast(&format_summary(report)).await
    }
}

// =============================================================================
// Formatting
// =============================================================================

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Compact ruble amount: 1.5K, 12.3M, 4.1B
pub fn format_turnover(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.1}B ₽", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.1}M ₽", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}K ₽", value / 1e3)
    } else {
        format!("{:.0} ₽", value)
    }
}

pub fn format_breakout(event: &BreakoutEvent) -> String {
    let channel = &event.channel;
    let (icon, label) = match event.direction {
        Direction::Up => ("🟢", "UPPER BREAKOUT"),
        Direction::Down => ("🔴", "LOWER BREAKOUT"),
    };
    let trend = match channel.trend() {
        Trend::Rising => "rising",
        Trend::Falling => "falling",
        Trend::Flat => "flat",
    };
    let ema = match event.above_ema() {
        Some(true) => "above EMA",
        Some(false) => "below EMA",
        None => "n/a",
    };

    format!(
        "{icon} <b>{label}</b>\n\
         <b>{ticker}</b> {name} ({kind})\n\
         Price: <b>{price:.4}</b>\n\
         Regression: {regression:.4} ({deviation:+.2}%)\n\
         Upper: {upper:.4}\n\
         Lower: {lower:.4}\n\
         Width: {width:.2}%\n\
         Trend: {trend}\n\
         EMA: {ema}\n\
         Turnover: {turnover}",
        ticker = escape_html(&event.ticker),
        name = escape_html(&event.name),
        kind = event.kind,
        price = event.price,
        regression = channel.regression,
        deviation = event.deviation_percent(),
        upper = channel.upper,
        lower = channel.lower,
        width = channel.width_percent(),
        turnover = format_turnover(channel.last_turnover()),
    )
}

fn push_entries(out: &mut String, entries: &[SummaryEntry], limit: usize) {
    for entry in entries.iter().take(limit) {
        out.push_str(&format!(
            "\n• <b>{}</b> {:.4} ({:+.2}%)",
            escape_html(&entry.ticker),
            entry.price,
            entry.deviation_percent
        ));
    }
    if entries.len() > limit {
        out.push_str(&format!("\n... and {} more", entries.len() - limit));
    }
}

pub fn format_summary(report: &SummaryReport) -> String {
    let time = to_session_time(report.generated_at).format("%H:%M");
    let summary = &report.summary;

    let mut out = format!("📊 <b>Channel summary</b> {} MSK", time);
    if summary.is_empty() {
        out.push_str("\nAll instruments are inside their channels");
        return out;
    }

    if !summary.above.is_empty() {
        out.push_str(&format!("\n\n⬆️ Above upper band: {}", summary.above.len()));
        push_entries(&mut out, &summary.above, report.limit);
    }
    if !summary.below.is_empty() {
        out.push_str(&format!("\n\n⬇️ Below lower band: {}", summary.below.len()));
        push_entries(&mut out, &summary.below, report.limit);
    }
    out
}
