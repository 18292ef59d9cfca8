//! Channel type definitions for inter-task communication

use tokio::sync::{mpsc, watch};

use super::types::Candle;

/// Default candle channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1024;

/// Sender half of a cancellation signal
pub type ShutdownSender = watch::Sender<bool>;

/// Receiver half of a cancellation signal, cloned into every worker
pub type ShutdownReceiver = watch::Receiver<bool>;

/// Create a new candle channel with the default buffer size
pub fn create_candle_channel() -> (mpsc::Sender<Candle>, mpsc::Receiver<Candle>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Create an un-fired cancellation signal
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Resolve once the signal has fired or its sender is gone
pub async fn cancelled(shutdown: &mut ShutdownReceiver) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Non-blocking check of the signal
pub fn is_cancelled(shutdown: &ShutdownReceiver) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
