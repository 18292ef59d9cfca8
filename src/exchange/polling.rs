//! Candle feeds built by polling a REST endpoint

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

use crate::common::channels::{cancelled, create_candle_channel, ShutdownReceiver};
use crate::common::errors::Result;
use crate::common::types::Candle;

/// Drop candles at or before `last`, then advance it
pub fn newer_than(candles: Vec<Candle>, last: &mut Option<DateTime<Utc>>) -> Vec<Candle> {
    let fresh: Vec<Candle> = candles
        .into_iter()
        .filter(|c| last.map_or(true, |t| c.time > t))
        .collect();
    if let Some(candle) = fresh.last() {
        *last = Some(candle.time);
    }
    fresh
}

/// Emit `initial`, then poll `fetch` every `poll_interval` until cancelled
///
/// Each candle is emitted once even though polls return overlapping windows.
/// A failed poll is logged and the next one is attempted on schedule.
pub fn spawn_candle_poller<F, Fut>(
    market: String,
    initial: Vec<Candle>,
    poll_interval: Duration,
    mut shutdown: ShutdownReceiver,
    mut fetch: F,
) -> mpsc::Receiver<Candle>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<Candle>>> + Send + 'static,
{
    let (tx, rx) = create_candle_channel();
    tokio::spawn(async move {
        let mut last = None;
        let mut batch = initial;
        loop {
            for candle in newer_than(batch, &mut last) {
                if tx.send(candle).await.is_err() {
                    return;
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return,
                _ = tokio::time::sleep(poll_interval) => {}
            }

            batch = match fetch().await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(symbol = %market, error = %e, "candle poll failed");
                    Vec::new()
                }
            };
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::channels::shutdown_channel;
    use crate::common::errors::EngineError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_newer_than_skips_seen_candles() {
        let t0 = Utc::now();
        let at = |m: i64, close| Candle::flat(t0 + chrono::Duration::minutes(m), close);
        let mut last = None;

        let first = newer_than(vec![at(0, dec!(1)), at(1, dec!(2))], &mut last);
        assert_eq!(first.len(), 2);

        let second = newer_than(vec![at(0, dec!(1)), at(1, dec!(2)), at(2, dec!(3))], &mut last);
        assert_eq!(second, vec![at(2, dec!(3))]);

        assert!(newer_than(vec![at(2, dec!(3))], &mut last).is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_feed_alive() {
        let t0 = Utc::now();
        let polls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = shutdown_channel();

        let counter = polls.clone();
        let mut feed = spawn_candle_poller(
            "BTCUSD".to_string(),
            vec![Candle::flat(t0, dec!(1))],
            Duration::from_millis(5),
            rx,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(EngineError::TransientAdapter("502".to_string()))
                    } else {
                        Ok(vec![Candle::flat(t0 + chrono::Duration::minutes(1), dec!(2))])
                    }
                }
            },
        );

        assert_eq!(feed.recv().await.map(|c| c.close), Some(dec!(1)));
        assert_eq!(feed.recv().await.map(|c| c.close), Some(dec!(2)));
        assert!(polls.load(Ordering::SeqCst) >= 2);

        tx.send(true).unwrap();
        assert!(feed.recv().await.is_none());
    }
}
