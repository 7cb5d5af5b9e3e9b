//! Runtime tasks
//!
//! The notification task drains the monitor's queue and hands each message
//! to the sink. Delivery failures are logged and dropped; nothing here
//! feeds back into the monitor. On shutdown, messages already queued are
//! delivered before the task exits.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::adapters::traits::NotificationSink;
use crate::core::channels::Notification;

/// Consume notifications until shutdown or until every sender is dropped
pub async fn notification_task(
    mut notification_rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Notification task started");
    let mut delivered: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                while let Ok(notification) = notification_rx.try_recv() {
                    if deliver(sink.as_ref(), &notification).await {
                        delivered += 1;
                    } else {
                        failed += 1;
                    }
                }
                info!(delivered, failed, "Notification task shutting down");
                break;
            }
            message = notification_rx.recv() => {
                let Some(notification) = message else {
                    info!(delivered, failed, "Notification channel closed");
                    break;
                };

                if deliver(sink.as_ref(), &notification).await {
                    delivered += 1;
                    debug!(delivered, "Notification delivered");
                } else {
                    failed += 1;
                }
            }
        }
    }

    info!("Notification task stopped");
}

async fn deliver(sink: &dyn NotificationSink, notification: &Notification) -> bool {
    let result = match notification {
        Notification::Breakout(event) => sink.notify(event).await,
        Notification::Summary(report) => sink.send_summary(report).await,
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Notification delivery failed");
            false
        }
    }
}
