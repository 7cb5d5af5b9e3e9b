//! Inter-task channels
//!
//! The monitor loop never awaits delivery: it pushes `Notification`s into a
//! bounded mpsc queue drained by the notification task, and every task
//! listens on one shutdown broadcast.

use tokio::sync::{broadcast, mpsc};

use crate::core::detector::BreakoutEvent;
use crate::core::summary::SummaryReport;

/// Default channel capacity for bounded channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Message from the monitor to the notification task
#[derive(Debug, Clone)]
pub enum Notification {
    Breakout(BreakoutEvent),
    Summary(SummaryReport),
}

/// Bundle of all inter-task communication channels
#[derive(Debug)]
pub struct ChannelBundle {
    /// Monitor -> notifier
    pub notification_tx: mpsc::Sender<Notification>,
    pub notification_rx: mpsc::Receiver<Notification>,

    /// Shutdown broadcast: main -> all tasks
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ChannelBundle {
    pub fn new(capacity: usize) -> Self {
        let (notification_tx, notification_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            notification_tx,
            notification_rx,
            shutdown_tx,
        }
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
