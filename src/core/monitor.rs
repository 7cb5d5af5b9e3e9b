//! Breakout monitor control loop
//!
//! One loop drives two cadences off a single poll clock:
//! - **Channel refresh** every `timeframe_minutes`: historical and intraday
//!   candles are fetched per instrument, merged, optionally resampled, and
//!   the regression channel is recomputed. Instruments are processed in
//!   batches of `refresh_concurrency` with a short pause between batches.
//! - **Price poll** on every other tick: last prices for all instruments
//!   with a channel are fetched in parallel batches of at most 100 ids and
//!   fed through the hysteresis state machine.
//!
//! A refresh that is due preempts that tick's poll. The registry is owned
//! by the monitor and mutated only from the loop, so no locking is needed.
//! Breakouts and summaries leave through a bounded mpsc queue with
//! `try_send`; the loop never waits on delivery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::adapters::errors::{SourceError, SourceResult};
use crate::adapters::retry::{retry_with_backoff, FetchOutcome, RetryConfig};
use crate::adapters::traits::{HistoricalCandleSource, IntradaySource, PriceSource, MAX_PRICE_BATCH};
use crate::adapters::types::InstrumentRef;
use crate::config::{AppConfig, MonitorSettings, StrategyConfig};
use crate::core::candles::{merge, resample, CandleSeries};
use crate::core::channel::{compute_channel, ChannelState};
use crate::core::channels::Notification;
use crate::core::detector::BreakoutEvent;
use crate::core::registry::InstrumentRegistry;
use crate::core::summary::{snapshot, SummaryReport};
use crate::error::{AppError, Result};

/// Data collaborators used by the monitor
#[derive(Clone)]
pub struct MonitorSources {
    pub history: Arc<dyn HistoricalCandleSource>,
    pub intraday: Arc<dyn IntradaySource>,
    pub prices: Arc<dyn PriceSource>,
}

/// Point-in-time view of the monitor for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub running: bool,
    pub instruments: usize,
    pub with_channel: usize,
    pub subscribers: usize,
}

/// Outcome counts of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub updated: usize,
    /// Fewer candles than the regression length; previous channel kept
    pub insufficient: usize,
    /// Fetch failed after retries; previous channel kept
    pub failed: usize,
    /// Shutdown arrived mid-pass; remaining batches were not started
    pub interrupted: bool,
}

/// Split ids into request-sized batches, never above `MAX_PRICE_BATCH`
pub fn price_batches(ids: &[String], batch_size: usize) -> std::slice::Chunks<'_, String> {
    ids.chunks(batch_size.clamp(1, MAX_PRICE_BATCH))
}

pub struct BreakoutMonitor {
    registry: InstrumentRegistry,
    sources: MonitorSources,
    strategy: StrategyConfig,
    settings: MonitorSettings,
    retry: RetryConfig,
    notify_tx: mpsc::Sender<Notification>,
    subscribers: usize,
    last_refresh: Option<Instant>,
    running: bool,
}

impl BreakoutMonitor {
    pub fn new(
        registry: InstrumentRegistry,
        sources: MonitorSources,
        config: &AppConfig,
        notify_tx: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            registry,
            sources,
            strategy: config.strategy.clone(),
            settings: config.monitor.clone(),
            retry: config.retry.clone(),
            notify_tx,
            subscribers: config.notify.chat_ids.len(),
            last_refresh: None,
            running: false,
        }
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.running,
            instruments: self.registry.len(),
            with_channel: self.registry.with_channel_count(),
            subscribers: self.subscribers,
        }
    }

    /// Run until the shutdown broadcast fires
    ///
    /// Tick errors are logged and followed by a cooldown; they never end
    /// the loop.
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        self.running = true;
        info!(
            instruments = self.registry.len(),
            timeframe_minutes = self.strategy.timeframe_minutes,
            poll_interval_ms = self.settings.poll_interval_ms,
            "Breakout monitor started"
        );

        let mut poll_interval = interval(Duration::from_millis(self.settings.poll_interval_ms));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cooldown = Duration::from_secs(self.settings.error_cooldown_secs);

        loop {
            tokio::select! {
                biased;
                // Shutdown takes priority
                _ = shutdown_rx.recv() => {
                    info!("Breakout monitor shutting down");
                    break;
                }
                _ = poll_interval.tick() => {
                    match self.step(Some(&mut shutdown_rx)).await {
                        Ok(true) => {
                            info!("Breakout monitor shutting down during refresh");
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            error!(error = %e, cooldown_secs = cooldown.as_secs(), "Monitor tick failed");
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!("Breakout monitor shutting down during cooldown");
                                    break;
                                }
                                _ = sleep(cooldown) => {}
                            }
                        }
                    }
                }
            }
        }

        self.running = false;
        info!("Breakout monitor stopped");
    }

    /// One scheduler step: a due refresh preempts the price poll
    pub async fn tick(&mut self) -> Result<()> {
        self.step(None).await.map(|_| ())
    }

    /// Returns `true` when shutdown was observed during a refresh
    async fn step(&mut self, shutdown_rx: Option<&mut broadcast::Receiver<()>>) -> Result<bool> {
        if self.refresh_due(Instant::now()) {
            let stats = self.refresh_until(shutdown_rx).await;
            if stats.interrupted {
                return Ok(true);
            }
            if self.settings.send_summary {
                self.send_summary().await?;
            }
            return Ok(false);
        }

        self.poll_prices().await.map(|_| false)
    }

    fn refresh_due(&self, now: Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(last) => now.duration_since(last) >= self.strategy.refresh_interval(),
        }
    }

    /// Recompute channels for every instrument
    ///
    /// A failed history fetch or a short series keeps the previous channel;
    /// a failed intraday fetch falls back to history alone. Signal state is
    /// never reset by a recompute.
    pub async fn refresh_channels(&mut self) -> RefreshStats {
        self.refresh_until(None).await
    }

    /// Refresh pass that stops scheduling batches once shutdown fires
    ///
    /// A batch already in flight completes; the inter-batch pause is raced
    /// against the shutdown signal.
    pub async fn refresh_until(
        &mut self,
        mut shutdown_rx: Option<&mut broadcast::Receiver<()>>,
    ) -> RefreshStats {
        self.last_refresh = Some(Instant::now());
        let started = Instant::now();
        let references = self.registry.references();
        let concurrency = self.settings.refresh_concurrency.max(1);
        let pause = Duration::from_millis(self.settings.refresh_batch_pause_ms);
        let mut stats = RefreshStats::default();

        info!(instruments = references.len(), "[REFRESH] Channel refresh started");

        for (batch_idx, chunk) in references.chunks(concurrency).enumerate() {
            if let Some(rx) = shutdown_rx.as_deref_mut() {
                if shutdown_pending(rx) {
                    stats.interrupted = true;
                    break;
                }
            }

            if batch_idx > 0 && !pause.is_zero() {
                match shutdown_rx.as_deref_mut() {
                    Some(rx) => {
                        tokio::select! {
                            biased;
                            _ = rx.recv() => {
                                stats.interrupted = true;
                                break;
                            }
                            _ = sleep(pause) => {}
                        }
                    }
                    None => sleep(pause).await,
                }
            }

            let results = join_all(chunk.iter().map(|r| self.compute_for(r))).await;

            for (reference, result) in chunk.iter().zip(results) {
                match result {
                    Ok(Some(channel)) => {
                        self.registry.set_channel(&reference.id, channel);
                        stats.updated += 1;
                    }
                    Ok(None) => {
                        debug!(ticker = %reference.ticker, "Not enough candles for channel");
                        stats.insufficient += 1;
                    }
                    Err(e) => {
                        warn!(ticker = %reference.ticker, error = %e, "Channel refresh failed, keeping previous");
                        stats.failed += 1;
                    }
                }
            }
        }

        info!(
            updated = stats.updated,
            insufficient = stats.insufficient,
            failed = stats.failed,
            interrupted = stats.interrupted,
            with_channel = self.registry.with_channel_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[REFRESH] Channel refresh complete"
        );
        stats
    }

    /// Fetch both candle sources, merge, and fit the channel
    async fn compute_for(&self, reference: &InstrumentRef) -> SourceResult<Option<ChannelState>> {
        let source_interval = self.strategy.source_interval();
        let days_back = self.strategy.history_days;
        let history = &self.sources.history;
        let intraday = &self.sources.intraday;
        let history_label = format!("history {}", reference.ticker);
        let intraday_label = format!("intraday {}", reference.ticker);

        let (historical, today) = tokio::join!(
            retry_with_backoff(&self.retry, &history_label, move || async move {
                FetchOutcome::from(history.fetch_until(reference, source_interval, days_back).await)
            }),
            retry_with_backoff(&self.retry, &intraday_label, move || async move {
                FetchOutcome::from(intraday.fetch_today(reference, source_interval).await)
            }),
        );

        // Intraday bars are provisional; without them the history alone still
        // yields a channel
        let today = today.unwrap_or_else(|e| {
            warn!(ticker = %reference.ticker, error = %e, "Intraday fetch failed, using history only");
            CandleSeries::empty()
        });
        let merged = merge(&historical?, &today);
        let series = if source_interval == self.strategy.timeframe_minutes {
            merged
        } else {
            resample(&merged, self.strategy.timeframe_minutes)
        };

        Ok(compute_channel(
            &series,
            self.strategy.regression_length,
            self.strategy.std_dev_multiplier,
            self.strategy.ema_span,
        ))
    }

    /// Fetch last prices in parallel capped batches
    ///
    /// A failed batch is logged and contributes nothing; the other batches
    /// are unaffected.
    pub async fn fetch_prices(&self, ids: &[String]) -> HashMap<String, f64> {
        let source = &self.sources.prices;
        let retry = &self.retry;

        let results = join_all(price_batches(ids, self.settings.price_batch_size).enumerate().map(
            move |(batch_idx, batch)| async move {
                let label = format!("prices batch {}", batch_idx);
                let result = retry_with_backoff(retry, &label, move || async move {
                    FetchOutcome::from(source.fetch_last_prices(batch).await)
                })
                .await;
                (batch_idx, batch.len(), result)
            },
        ))
        .await;

        let mut prices = HashMap::with_capacity(ids.len());
        for (batch_idx, size, result) in results {
            match result {
                Ok(batch_prices) => prices.extend(batch_prices),
                Err(e) => warn!(batch = batch_idx, size, error = %e, "Price batch failed, skipped"),
            }
        }
        prices
    }

    /// Poll prices for channelled instruments and apply the state machine
    ///
    /// Returns the breakouts emitted this poll. Instruments without a
    /// channel are never requested.
    pub async fn poll_prices(&mut self) -> Result<Vec<BreakoutEvent>> {
        let ids = self.registry.ids_with_channel();
        if ids.is_empty() {
            debug!("No channels computed yet, skipping price poll");
            return Ok(Vec::new());
        }

        let prices = self.fetch_prices(&ids).await;

        let mut events = Vec::new();
        for id in &ids {
            let Some(&price) = prices.get(id) else {
                continue;
            };
            if let Some(event) = self.apply_price(id, price) {
                events.push(event);
            }
        }

        let mut delivered = true;
        for event in &events {
            info!(
                ticker = %event.ticker,
                direction = %event.direction,
                price = event.price,
                upper = event.channel.upper,
                lower = event.channel.lower,
                deviation = %format!("{:.2}%", event.deviation_percent()),
                "[BREAKOUT] Channel breakout detected"
            );
            delivered &= self.emit(Notification::Breakout(event.clone()));
        }

        if !delivered {
            return Err(closed_channel());
        }
        Ok(events)
    }

    /// Feed one price through the instrument's hysteresis state machine
    pub fn apply_price(&mut self, id: &str, price: f64) -> Option<BreakoutEvent> {
        let instrument = self.registry.get_mut(id)?;
        let channel = instrument.channel.as_ref()?;

        let (next, direction) = instrument
            .signal_state
            .transition(price, channel.upper, channel.lower);
        instrument.signal_state = next;

        Some(BreakoutEvent {
            instrument_id: instrument.id.clone(),
            ticker: instrument.ticker.clone(),
            name: instrument.name.clone(),
            kind: instrument.kind,
            direction: direction?,
            price,
            channel: channel.clone(),
            detected_at: Utc::now(),
        })
    }

    /// Build the read-only digest and queue it if non-empty
    pub async fn send_summary(&self) -> Result<()> {
        let ids = self.registry.ids_with_channel();
        if ids.is_empty() {
            return Ok(());
        }

        let prices = self.fetch_prices(&ids).await;
        let summary = snapshot(&self.registry, &prices);
        if summary.is_empty() {
            debug!("All instruments inside their channel, no summary");
            return Ok(());
        }

        info!(above = summary.above.len(), below = summary.below.len(), "Summary snapshot built");
        let report = SummaryReport {
            generated_at: Utc::now(),
            summary,
            limit: self.settings.summary_limit,
        };

        if self.emit(Notification::Summary(report)) {
            Ok(())
        } else {
            Err(closed_channel())
        }
    }

    /// Non-blocking send; returns false only when the receiver is gone
    fn emit(&self, notification: Notification) -> bool {
        match self.notify_tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification channel full, dropping notification");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Notification channel closed");
                false
            }
        }
    }
}

/// A pending signal, a lagged receiver, or a dropped sender all mean stop
fn shutdown_pending(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
}

fn closed_channel() -> AppError {
    AppError::Source(SourceError::Notify("notification channel closed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::InstrumentKind;
    use crate::core::candles::{Candle, CandleSeries};
    use crate::core::channel::tests::series_from_closes;
    use crate::core::detector::{Direction, SignalState};
    use crate::core::registry::tests::sample_channel;
    use crate::core::registry::Instrument;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockHistory {
        series: HashMap<String, CandleSeries>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoricalCandleSource for MockHistory {
        async fn fetch_until(
            &self,
            instrument: &InstrumentRef,
            _interval_minutes: u32,
            _days_back: u32,
        ) -> SourceResult<CandleSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.series
                .get(&instrument.id)
                .cloned()
                .ok_or_else(|| SourceError::DataFetch(format!("no history for {}", instrument.ticker)))
        }
    }

    #[derive(Default)]
    struct MockIntraday {
        series: HashMap<String, CandleSeries>,
        unresolvable: bool,
    }

    #[async_trait]
    impl IntradaySource for MockIntraday {
        async fn fetch_today(
            &self,
            instrument: &InstrumentRef,
            _interval_minutes: u32,
        ) -> SourceResult<CandleSeries> {
            if self.unresolvable {
                return Err(SourceError::InstrumentUnresolvable(instrument.id.clone()));
            }
            Ok(self
                .series
                .get(&instrument.id)
                .cloned()
                .unwrap_or_else(CandleSeries::empty))
        }
    }

    #[derive(Default)]
    struct MockPrices {
        prices: Mutex<HashMap<String, f64>>,
        requests: Mutex<Vec<Vec<String>>>,
        rate_limited: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockPrices {
        fn set(&self, id: &str, price: f64) {
            self.prices.lock().unwrap().insert(id.to_string(), price);
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PriceSource for MockPrices {
        async fn fetch_last_prices(&self, ids: &[String]) -> SourceResult<HashMap<String, f64>> {
            self.requests.lock().unwrap().push(ids.to_vec());
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::DataFetch("connection reset".into()));
            }
            if self.rate_limited.load(Ordering::SeqCst) > 0 {
                self.rate_limited.fetch_sub(1, Ordering::SeqCst);
                return Err(SourceError::RateLimited("mock".into()));
            }
            let prices = self.prices.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| prices.get(id).map(|&p| (id.clone(), p)))
                .collect())
        }
    }

    struct Harness {
        monitor: BreakoutMonitor,
        rx: mpsc::Receiver<Notification>,
        history: Arc<MockHistory>,
        prices: Arc<MockPrices>,
    }

    fn instruments(ids: &[&str]) -> InstrumentRegistry {
        InstrumentRegistry::new(
            ids.iter()
                .map(|id| Instrument::new(id, &format!("T{}", id), id, InstrumentKind::Share))
                .collect(),
        )
    }

    fn harness(
        registry: InstrumentRegistry,
        history: MockHistory,
        intraday: MockIntraday,
        config: AppConfig,
    ) -> Harness {
        let history = Arc::new(history);
        let prices = Arc::new(MockPrices::default());
        let (tx, rx) = mpsc::channel(64);
        let sources = MonitorSources {
            history: history.clone(),
            intraday: Arc::new(intraday),
            prices: prices.clone(),
        };
        Harness {
            monitor: BreakoutMonitor::new(registry, sources, &config, tx),
            rx,
            history,
            prices,
        }
    }

    fn linear_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + 0.5 * i as f64).collect()
    }

    fn with_history(entries: Vec<(&str, CandleSeries)>) -> MockHistory {
        MockHistory {
            series: entries.into_iter().map(|(id, s)| (id.to_string(), s)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_price_batches_split_at_cap() {
        let ids: Vec<String> = (0..250).map(|i| format!("FIGI{}", i)).collect();
        let sizes: Vec<usize> = price_batches(&ids, 100).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        // configured size above the cap is clamped
        let sizes: Vec<usize> = price_batches(&ids, 500).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_fetch_prices_issues_capped_batches() {
        let ids: Vec<String> = (0..250).map(|i| format!("FIGI{}", i)).collect();
        let h = harness(
            InstrumentRegistry::default(),
            MockHistory::default(),
            MockIntraday::default(),
            AppConfig::default(),
        );
        for id in &ids {
            h.prices.set(id, 10.0);
        }

        let prices = h.monitor.fetch_prices(&ids).await;

        assert_eq!(prices.len(), 250);
        let mut sizes: Vec<usize> = h.prices.requests.lock().unwrap().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100, 100]);
    }

    #[tokio::test]
    async fn test_refresh_updates_and_skips_failures() {
        let history = with_history(vec![
            ("A", series_from_closes(&linear_closes(200))),
            ("B", series_from_closes(&linear_closes(50))),
        ]);
        let mut h = harness(instruments(&["A", "B", "C"]), history, MockIntraday::default(), AppConfig::default());

        let stats = h.monitor.refresh_channels().await;

        assert_eq!(
            stats,
            RefreshStats {
                updated: 1,
                insufficient: 1,
                failed: 1,
                interrupted: false
            }
        );
        let channel = h.monitor.registry().get("A").unwrap().channel.clone().unwrap();
        assert_eq!(channel.std, 0.0);
        assert_eq!(channel.regression, 199.5);
        assert!(h.monitor.registry().get("B").unwrap().channel.is_none());
        assert!(h.monitor.registry().get("C").unwrap().channel.is_none());
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refresh_keeps_stale_channel_and_signal_state() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.monitor.registry.get_mut("A").unwrap().signal_state = SignalState::Above;

        let stats = h.monitor.refresh_channels().await;

        assert_eq!(stats.failed, 1);
        let instrument = h.monitor.registry().get("A").unwrap();
        assert_eq!(instrument.channel.as_ref().unwrap().upper, 110.0);
        assert_eq!(instrument.signal_state, SignalState::Above);
    }

    #[tokio::test]
    async fn test_refresh_merges_intraday_over_history() {
        let full = series_from_closes(&linear_closes(200));
        let history = with_history(vec![("A", full.clone())]);

        let last = *full.last().unwrap();
        let revised = Candle {
            close: last.close + 1.0,
            volume: 555.0,
            ..last
        };
        let intraday = MockIntraday {
            series: HashMap::from([("A".to_string(), CandleSeries::from_candles(vec![revised]))]),
            ..Default::default()
        };
        let mut h = harness(instruments(&["A"]), history, intraday, AppConfig::default());

        h.monitor.refresh_channels().await;

        let channel = h.monitor.registry().get("A").unwrap().channel.clone().unwrap();
        assert_eq!(channel.last_close, last.close + 1.0);
        assert_eq!(channel.last_volume, 555.0);
        assert_eq!(channel.last_candle_time, last.timestamp);
    }

    #[tokio::test]
    async fn test_refresh_resamples_non_native_timeframe() {
        // 1-minute source candles, 5-minute channel
        let closes = linear_closes(60);
        let base = series_from_closes(&closes);
        let minute_series = CandleSeries::from_candles(
            base.candles()
                .iter()
                .enumerate()
                .map(|(i, c)| Candle {
                    timestamp: base.candles()[0].timestamp + chrono::Duration::minutes(i as i64),
                    ..*c
                })
                .collect(),
        );
        let mut config = AppConfig::default();
        config.strategy.timeframe_minutes = 5;
        config.strategy.regression_length = 12;
        config.strategy.ema_span = 5;
        let mut h = harness(instruments(&["A"]), with_history(vec![("A", minute_series)]), MockIntraday::default(), config);

        let stats = h.monitor.refresh_channels().await;

        assert_eq!(stats.updated, 1);
        let channel = h.monitor.registry().get("A").unwrap().channel.clone().unwrap();
        // 60 one-minute candles -> 12 buckets, each closing on its 5th minute
        assert_eq!(channel.last_close, closes[59]);
        assert_eq!(channel.last_volume, 500.0);
        assert!((channel.slope - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_poll_skips_instruments_without_channel() {
        let mut h = harness(instruments(&["A", "B"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.set("A", 100.0);
        h.prices.set("B", 1000.0);

        let events = h.monitor.poll_prices().await.unwrap();

        assert!(events.is_empty());
        let requests = h.prices.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![vec!["A".to_string()]]);
    }

    #[tokio::test]
    async fn test_poll_with_no_channels_makes_no_requests() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        assert!(h.monitor.poll_prices().await.unwrap().is_empty());
        assert_eq!(h.prices.request_count(), 0);
    }

    #[tokio::test]
    async fn test_hysteresis_over_polls() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));

        let mut emitted = Vec::new();
        for price in [111.0, 111.0, 111.0, 100.0, 111.0] {
            h.prices.set("A", price);
            emitted.extend(h.monitor.poll_prices().await.unwrap());
        }

        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|e| e.direction == Direction::Up));
        assert_eq!(h.monitor.registry().get("A").unwrap().signal_state, SignalState::Above);

        let mut queued = 0;
        while let Ok(notification) = h.rx.try_recv() {
            assert!(matches!(notification, Notification::Breakout(_)));
            queued += 1;
        }
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn test_noisy_line_spike_emits_single_breakout() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + 0.5 * i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let history = with_history(vec![("A", series_from_closes(&closes))]);
        let mut h = harness(instruments(&["A"]), history, MockIntraday::default(), AppConfig::default());
        h.monitor.refresh_channels().await;
        let regression = h.monitor.registry().get("A").unwrap().channel.as_ref().unwrap().regression;

        h.prices.set("A", regression + 50.0);
        let first = h.monitor.poll_prices().await.unwrap();
        let second = h.monitor.poll_prices().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].direction, Direction::Up);
        assert_eq!(first[0].ticker, "TA");
        assert!(first[0].deviation_percent() > 0.0);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_breakout_down_then_gap_up() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));

        let down = h.monitor.apply_price("A", 80.0).unwrap();
        let up = h.monitor.apply_price("A", 120.0).unwrap();

        assert_eq!(down.direction, Direction::Down);
        assert_eq!(up.direction, Direction::Up);
        assert!(h.monitor.apply_price("A", 121.0).is_none());
        assert!(h.monitor.apply_price("missing", 121.0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_batch_is_retried() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.set("A", 111.0);
        h.prices.rate_limited.store(1, Ordering::SeqCst);

        let events = h.monitor.poll_prices().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(h.prices.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_skip_the_tick() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.set("A", 111.0);
        h.prices.rate_limited.store(10, Ordering::SeqCst);

        let events = h.monitor.poll_prices().await.unwrap();

        assert!(events.is_empty());
        assert_eq!(h.prices.request_count(), 3);
        assert_eq!(h.monitor.registry().get("A").unwrap().signal_state, SignalState::None);
    }

    #[tokio::test]
    async fn test_hard_price_failure_not_retried() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.fail.store(true, Ordering::SeqCst);

        assert!(h.monitor.poll_prices().await.unwrap().is_empty());
        assert_eq!(h.prices.request_count(), 1);
    }

    #[tokio::test]
    async fn test_summary_is_read_only() {
        let mut h = harness(instruments(&["A", "B"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.monitor.registry.set_channel("B", sample_channel(110.0, 90.0));
        h.prices.set("A", 150.0);
        h.prices.set("B", 100.0);

        h.monitor.send_summary().await.unwrap();

        match h.rx.try_recv() {
            Ok(Notification::Summary(report)) => {
                assert_eq!(report.summary.above.len(), 1);
                assert!(report.summary.below.is_empty());
                assert_eq!(report.limit, 10);
            }
            other => panic!("expected summary, got {:?}", other),
        }
        assert_eq!(h.monitor.registry().get("A").unwrap().signal_state, SignalState::None);

        // instrument already outside at summary time still gets its breakout
        let events = h.monitor.poll_prices().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instrument_id, "A");
    }

    #[tokio::test]
    async fn test_empty_summary_not_sent() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.set("A", 100.0);

        h.monitor.send_summary().await.unwrap();

        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_notification_channel_is_an_error() {
        let mut h = harness(instruments(&["A"]), MockHistory::default(), MockIntraday::default(), AppConfig::default());
        h.monitor.registry.set_channel("A", sample_channel(110.0, 90.0));
        h.prices.set("A", 111.0);
        drop(h.rx);

        let result = h.monitor.poll_prices().await;

        assert!(matches!(result, Err(AppError::Source(SourceError::Notify(_)))));
        // state still advanced so the breakout is not repeated
        assert_eq!(h.monitor.registry().get("A").unwrap().signal_state, SignalState::Above);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_refresh_preempts_poll() {
        let mut config = AppConfig::default();
        config.monitor.send_summary = false;
        let history = with_history(vec![("A", series_from_closes(&linear_closes(200)))]);
        let mut h = harness(instruments(&["A"]), history, MockIntraday::default(), config);

        h.monitor.tick().await.unwrap();
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.prices.request_count(), 0);

        h.monitor.tick().await.unwrap();
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.prices.request_count(), 1);

        tokio::time::advance(Duration::from_secs(600)).await;
        h.monitor.tick().await.unwrap();
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.prices.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let mut config = AppConfig::default();
        config.notify.chat_ids = vec![1, 2];
        let history = with_history(vec![("A", series_from_closes(&linear_closes(200)))]);
        let mut h = harness(instruments(&["A", "B"]), history, MockIntraday::default(), config);
        h.prices.set("A", 150.0);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let stopper = async {
            sleep(Duration::from_millis(3500)).await;
            shutdown_tx.send(()).unwrap();
        };
        tokio::join!(h.monitor.run(shutdown_rx), stopper);

        let status = h.monitor.status();
        assert_eq!(
            status,
            MonitorStatus {
                running: false,
                instruments: 2,
                with_channel: 1,
                subscribers: 2
            }
        );
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 2);
        // summary fetch plus at least the polls at 1s, 2s, 3s
        assert!(h.prices.request_count() >= 3);
        assert!(matches!(h.rx.try_recv(), Ok(Notification::Summary(_))));
        assert!(matches!(h.rx.try_recv(), Ok(Notification::Breakout(_))));
    }
    #[tokio::test]
    async fn test_intraday_failure_falls_back_to_history() {
        let history = with_history(vec![("A", series_from_closes(&linear_closes(200)))]);
        let intraday = MockIntraday {
            unresolvable: true,
            ..Default::default()
        };
        let mut h = harness(instruments(&["A"]), history, intraday, AppConfig::default());

        let stats = h.monitor.refresh_channels().await;

        assert_eq!(stats.updated, 1);
        assert_eq!(stats.failed, 0);
        let channel = h.monitor.registry().get("A").unwrap().channel.clone().unwrap();
        assert_eq!(channel.regression, 199.5);
    }

    fn wide_universe(n: usize) -> (InstrumentRegistry, MockHistory) {
        let ids: Vec<String> = (0..n).map(|i| format!("I{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let history = with_history(
            id_refs
                .iter()
                .map(|&id| (id, series_from_closes(&linear_closes(200))))
                .collect(),
        );
        (instruments(&id_refs), history)
    }

    fn paced_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.monitor.refresh_concurrency = 5;
        config.monitor.refresh_batch_pause_ms = 500;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stops_scheduling_batches_after_shutdown() {
        let (registry, history) = wide_universe(20);
        let mut h = harness(registry, history, MockIntraday::default(), paced_config());
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let stopper = async {
            sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(()).unwrap();
        };
        let (stats, _) = tokio::join!(h.monitor.refresh_until(Some(&mut shutdown_rx)), stopper);

        assert!(stats.interrupted);
        assert_eq!(stats.updated, 5);
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 5);
        assert_eq!(h.monitor.registry().with_channel_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_mid_refresh_without_summary() {
        let (registry, history) = wide_universe(20);
        let mut h = harness(registry, history, MockIntraday::default(), paced_config());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let stopper = async {
            sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(()).unwrap();
        };
        tokio::join!(h.monitor.run(shutdown_rx), stopper);

        assert!(!h.monitor.status().running);
        assert_eq!(h.history.calls.load(Ordering::SeqCst), 5);
        assert_eq!(h.prices.request_count(), 0);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_shutdown_receiver_runs_every_batch() {
        let (registry, history) = wide_universe(12);
        let mut config = paced_config();
        config.monitor.refresh_batch_pause_ms = 0;
        let mut h = harness(registry, history, MockIntraday::default(), config);

        let stats = h.monitor.refresh_channels().await;

        assert!(!stats.interrupted);
        assert_eq!(stats.updated, 12);
    }
}
