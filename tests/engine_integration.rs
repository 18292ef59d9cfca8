//! Integration tests for the engine lifecycle and live wiring

mod common;

use std::sync::Arc;
use std::time::Duration;

use candle_trader::common::channels::shutdown_channel;
use candle_trader::common::traits::{ExchangeAdapter, OrderExecutor, RiskManager, Store};
use candle_trader::common::types::{Order, OrderRequest, Side, Trade};
use candle_trader::config::AppConfig;
use candle_trader::engine::{Engine, EngineStatus, FixedPercentRisk, IdempotencyRegistry, LiveOrderManager};
use candle_trader::exchange::MockExchange;
use candle_trader::store::InMemoryStore;
use candle_trader::strategy::{build_strategies, StrategySelection};
use chrono::Utc;
use common::{candles_from_closes, wait_until, RecordingStrategy, ScriptedExchange};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn closes(n: usize) -> Vec<Decimal> {
    (1..=n).map(Decimal::from).collect()
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_no_candles_after_stop() {
    let exchange = Arc::new(
        ScriptedExchange::new()
            .with_feed("BTCUSD", candles_from_closes(&closes(10_000)))
            .with_feed("ETHUSD", candles_from_closes(&closes(10_000)))
            .with_feed_pacing(Duration::from_millis(1)),
    );
    let btc = Arc::new(RecordingStrategy::new("btc", "BTCUSD"));
    let eth = Arc::new(RecordingStrategy::new("eth", "ETHUSD"));

    let mut engine = Engine::new(exchange);
    engine.register_strategy(btc.clone());
    engine.register_strategy(eth.clone());
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });

    let (b, e) = (&btc, &eth);
    wait_until(|| async move { b.candles_seen().await > 3 && e.candles_seen().await > 3 }).await;
    assert_eq!(engine.status().await, EngineStatus::Running);

    engine.stop().await;
    assert_eq!(engine.status().await, EngineStatus::Stopped);

    let seen_at_stop = (btc.candles_seen().await, eth.candles_seen().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        (btc.candles_seen().await, eth.candles_seen().await),
        seen_at_stop
    );
    assert!(btc.was_stopped() && eth.was_stopped());
    assert!(!btc.saw_candle_after_stop() && !eth.saw_candle_after_stop());

    let returned = tokio::time::timeout(Duration::from_secs(1), runner).await;
    assert!(matches!(returned, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn test_parent_cancellation_ends_start() {
    let exchange = Arc::new(
        ScriptedExchange::new().with_feed("BTCUSD", candles_from_closes(&closes(3))),
    );
    let strategy = Arc::new(RecordingStrategy::new("btc", "BTCUSD"));
    let mut engine = Engine::new(exchange);
    engine.register_strategy(strategy.clone());
    let engine = Arc::new(engine);

    let (parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });

    let s = &strategy;
    wait_until(|| async move { s.candles_seen().await == 3 }).await;
    parent_tx.send(true).unwrap();

    let returned = tokio::time::timeout(Duration::from_secs(1), runner).await;
    assert!(matches!(returned, Ok(Ok(Ok(())))));

    engine.stop().await;
    assert_eq!(engine.status().await, EngineStatus::Stopped);
    assert!(strategy.was_stopped());
}

#[tokio::test]
async fn test_failed_subscription_skips_only_that_strategy() {
    let exchange = Arc::new(
        ScriptedExchange::new()
            .with_feed("BTCUSD", candles_from_closes(&closes(5)))
            .with_broken_symbol("DOGEUSD"),
    );
    let healthy = Arc::new(RecordingStrategy::new("healthy", "BTCUSD"));
    let broken = Arc::new(RecordingStrategy::new("broken", "DOGEUSD"));

    let mut engine = Engine::new(exchange);
    engine.register_strategy(broken.clone());
    engine.register_strategy(healthy.clone());
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });

    let h = &healthy;
    wait_until(|| async move { h.candles_seen().await == 5 }).await;
    engine.stop().await;
    runner.await.unwrap().unwrap();

    assert_eq!(broken.candles_seen().await, 0);
    assert_eq!(healthy.candles_seen().await, 5);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let exchange = Arc::new(ScriptedExchange::new());
    let mut engine = Engine::new(exchange);
    engine.register_strategy(Arc::new(RecordingStrategy::new("idle", "BTCUSD")));
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        let parent_rx = parent_rx.clone();
        async move { engine.start(parent_rx).await }
    });
    let e = &engine;
    wait_until(|| async move { e.status().await == EngineStatus::Running }).await;

    assert!(engine.start(parent_rx).await.is_err());

    engine.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let engine = Engine::new(Arc::new(ScriptedExchange::new()));
    engine.stop().await;
    assert_eq!(engine.status().await, EngineStatus::Idle);
}

#[tokio::test]
async fn test_run_record_and_candles_are_persisted() {
    let exchange = Arc::new(
        ScriptedExchange::new().with_feed("BTCUSD", candles_from_closes(&closes(4))),
    );
    let store = Arc::new(InMemoryStore::new());
    let strategy = Arc::new(RecordingStrategy::new("btc", "BTCUSD"));
    let mut engine = Engine::new(exchange).with_store(store.clone());
    engine.register_strategy(strategy.clone());
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });
    let s = &strategy;
    wait_until(|| async move { s.candles_seen().await == 4 }).await;
    engine.stop().await;
    runner.await.unwrap().unwrap();

    let runs = store.runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].strategies, vec!["btc".to_string()]);
    assert!(runs[0].stopped_at.is_some());
    assert_eq!(runs[0].final_value, Some(Decimal::ZERO));
    assert_eq!(store.load_candles("BTCUSD", 100).await.unwrap().len(), 4);
}

fn filled_trade(id: &str, side: Side, price: Decimal) -> Trade {
    let request = OrderRequest::market("BTCUSD", side, price, dec!(1));
    Trade::from_order(&Order::accepted(id, &request, Utc::now()).fill(price))
}

#[tokio::test]
async fn test_run_pnl_excludes_earlier_ledger_history() {
    let store = Arc::new(InMemoryStore::new());
    // an earlier live round trip and a backtest round trip on the same symbol
    store.save_trade(&filled_trade("live-1", Side::Buy, dec!(100))).await.unwrap();
    store.save_trade(&filled_trade("live-2", Side::Sell, dec!(110))).await.unwrap();
    for trade in [
        filled_trade("bt-1", Side::Buy, dec!(100)),
        filled_trade("bt-2", Side::Sell, dec!(150)),
    ] {
        store.save_trade(&trade.in_run("backtest_1")).await.unwrap();
    }
    assert_eq!(store.realized_pnl("BTCUSD").await.unwrap(), dec!(10));

    let exchange = Arc::new(
        ScriptedExchange::new().with_feed("BTCUSD", candles_from_closes(&closes(2))),
    );
    let strategy = Arc::new(RecordingStrategy::new("quiet", "BTCUSD"));
    let mut engine = Engine::new(exchange).with_store(store.clone());
    engine.register_strategy(strategy.clone());
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });
    let s = &strategy;
    wait_until(|| async move { s.candles_seen().await == 2 }).await;
    engine.stop().await;
    runner.await.unwrap().unwrap();

    let runs = store.runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].final_value, Some(Decimal::ZERO));
}

#[tokio::test]
async fn test_stop_is_not_blocked_by_slow_subscriptions() {
    let exchange = Arc::new(ScriptedExchange::new().with_subscribe_delay(Duration::from_millis(500)));
    let mut engine = Engine::new(exchange.clone());
    for (name, symbol) in [("btc", "BTCUSD"), ("eth", "ETHUSD"), ("sol", "SOLUSD")] {
        engine.register_strategy(Arc::new(RecordingStrategy::new(name, symbol)));
    }
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });
    let e = &engine;
    wait_until(|| async move { e.status().await == EngineStatus::Running }).await;

    // the first subscription is still opening
    let status = tokio::time::timeout(Duration::from_millis(100), engine.status()).await;
    assert_eq!(status.ok(), Some(EngineStatus::Running));
    let stopped = tokio::time::timeout(Duration::from_millis(200), engine.stop()).await;
    assert!(stopped.is_ok());
    assert_eq!(engine.status().await, EngineStatus::Stopped);

    let returned = tokio::time::timeout(Duration::from_secs(2), runner).await;
    assert!(matches!(returned, Ok(Ok(Ok(())))));
    // no further subscriptions are opened once the run is cancelled
    assert!(exchange.subscribed() <= 1);
}

#[test_log::test(tokio::test)]
async fn test_mock_exchange_live_pipeline() {
    let mut series = vec![dec!(100); 10];
    series.extend(vec![dec!(110); 10]);
    let exchange = Arc::new(MockExchange::default().with_scripted_feed(candles_from_closes(&series)));
    let store = Arc::new(InMemoryStore::new());

    let executor: Arc<dyn OrderExecutor> = Arc::new(
        LiveOrderManager::new(exchange.clone(), Arc::new(IdempotencyRegistry::new()))
            .with_store(store.clone()),
    );
    let mut config = AppConfig::default();
    config.strategies.ema.short_period = 3;
    config.strategies.ema.long_period = 5;
    let risk: Arc<dyn RiskManager> = Arc::new(FixedPercentRisk::new(config.risk.percent));

    let mut engine = Engine::new(exchange.clone()).with_store(store.clone());
    for strategy in
        build_strategies(StrategySelection::Ema, &config.strategies, &config.risk, executor, risk).await
    {
        engine.register_strategy(strategy);
    }
    let engine = Arc::new(engine);

    let (_parent_tx, parent_rx) = shutdown_channel();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(parent_rx).await }
    });
    let ledger = &store;
    wait_until(|| async move { ledger.load_candles("BTCUSD", 100).await.unwrap().len() == 20 }).await;
    wait_until(|| async move { !ledger.trades().await.is_empty() }).await;
    engine.stop().await;
    runner.await.unwrap().unwrap();

    // 300 * 0.005 / 110, truncated to 8 places
    let trades = store.trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].quantity, dec!(0.01363636));

    let position = exchange.get_position("BTCUSD").await.unwrap();
    assert_eq!(position.quantity, dec!(0.01363636));
    assert_eq!(position.avg_price, dec!(110));
    assert_eq!(store.counts().await.unwrap().runs, 1);
}
