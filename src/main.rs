//! Breakout bot entry point
//!
//! 1. Loads `.env`, logging and the YAML configuration
//! 2. Builds the MOEX, Tinkoff and Telegram clients
//! 3. Matches the instrument universe across both listings
//! 4. Runs the monitor loop until Ctrl+C

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use breakout_bot::adapters::{MoexClient, TelegramSink, TinkoffClient};
use breakout_bot::config::{self, constants, Credentials};
use breakout_bot::core::{
    init_logging, load_registry, notification_task, BreakoutMonitor, ChannelBundle, MonitorSources,
};

/// How long the notifier gets to flush after the monitor stops
const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    init_logging();
    info!("🚀 Breakout bot starting...");
    constants::log_configuration();

    let config_path = constants::config_path();
    let config = config::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        timeframe_minutes = config.strategy.timeframe_minutes,
        regression_length = config.strategy.regression_length,
        std_dev_multiplier = config.strategy.std_dev_multiplier,
        history_days = config.strategy.history_days,
        "[CONFIG] Strategy loaded"
    );

    let credentials = Credentials::from_env().context("reading credentials")?;
    if config.notify.chat_ids.is_empty() {
        warn!("[CONFIG] No Telegram chat ids configured, alerts will not be delivered");
    }

    let moex = Arc::new(MoexClient::new());
    let tinkoff = Arc::new(TinkoffClient::new(credentials.tinkoff_token.clone()));
    let telegram = Arc::new(TelegramSink::new(
        credentials.bot_token.clone(),
        config.notify.chat_ids.clone(),
    ));

    let registry = load_registry(tinkoff.as_ref(), moex.as_ref(), &config.universe)
        .await
        .context("building instrument universe")?;

    let bundle = ChannelBundle::new(constants::notification_channel_capacity());

    // SIGINT handler
    let shutdown_signal = bundle.shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("[SHUTDOWN] Graceful shutdown initiated");
                let _ = shutdown_signal.send(());
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let notifier = tokio::spawn(notification_task(
        bundle.notification_rx,
        telegram,
        bundle.shutdown_tx.subscribe(),
    ));

    let sources = MonitorSources {
        history: moex,
        intraday: tinkoff.clone(),
        prices: tinkoff,
    };
    let mut monitor = BreakoutMonitor::new(registry, sources, &config, bundle.notification_tx);
    monitor.run(bundle.shutdown_tx.subscribe()).await;

    let status = monitor.status();
    info!(
        instruments = status.instruments,
        with_channel = status.with_channel,
        "Monitor stopped"
    );
    drop(monitor);

    if tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, notifier).await.is_err() {
        warn!("[SHUTDOWN] Notification task did not stop in time");
    }

    info!("👋 Breakout bot stopped");
    Ok(())
}
