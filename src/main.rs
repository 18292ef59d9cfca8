//! CandleTrader - Main Entry Point
//!
//! Runs the strategies live against the configured exchange, or backtests
//! them over candles recorded in the ledger.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use candle_trader::backtest::run_backtest;
use candle_trader::common::channels::shutdown_channel;
use candle_trader::common::traits::{OrderExecutor, RiskManager};
use candle_trader::config::{load_config, AppConfig};
use candle_trader::engine::{
    Engine, FixedPercentRisk, IdempotencyRegistry, LiveOrderManager, RetryPolicy,
};
use candle_trader::exchange::build_exchange;
use candle_trader::store::open_store;
use candle_trader::strategy::{build_strategies, StrategySelection};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade live until Ctrl-C
    Live {
        /// Strategies to run: ema, mean or all
        #[arg(long, default_value = "all")]
        strategy: String,
    },
    /// Replay stored candles and print the stats as JSON
    Backtest {
        /// Strategies to run: ema, mean or all (defaults to the config value)
        #[arg(long)]
        strategy: Option<String>,

        /// Symbol to replay (defaults to the config value)
        #[arg(long)]
        symbol: Option<String>,
    },
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run_live(config: AppConfig, selection: StrategySelection) -> Result<()> {
    let store = open_store(&config.database).await?;
    let exchange = build_exchange(&config.exchange)?;

    let executor: Arc<dyn OrderExecutor> = Arc::new(
        LiveOrderManager::new(exchange.clone(), Arc::new(IdempotencyRegistry::new()))
            .with_store(store.clone())
            .with_retry_policy(RetryPolicy::from_settings(&config.settings)),
    );
    let risk: Arc<dyn RiskManager> = Arc::new(FixedPercentRisk::new(config.risk.percent));

    let mut engine = Engine::new(exchange)
        .with_store(store.clone())
        .with_candle_interval(Duration::from_secs(config.settings.candle_interval_seconds));
    for strategy in
        build_strategies(selection, &config.strategies, &config.risk, executor, risk).await
    {
        engine.register_strategy(strategy);
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("Received shutdown signal, cleaning up...");
        let _ = shutdown_tx.send(true);
    });

    engine.start(shutdown_rx).await?;
    engine.stop().await;

    let counts = store.counts().await?;
    info!(
        orders = counts.orders,
        trades = counts.trades,
        runs = counts.runs,
        "ledger totals"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(Some(&args.config))?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.settings.log_level))?;

    info!("Starting CandleTrader");
    info!("Configuration file: {}", args.config);

    match args.command {
        Command::Live { strategy } => {
            let selection: StrategySelection = strategy.parse()?;
            run_live(config, selection).await?;
        }
        Command::Backtest { strategy, symbol } => {
            let selection: StrategySelection = strategy
                .as_deref()
                .unwrap_or(&config.backtest.strategy)
                .parse()?;
            let symbol = symbol.unwrap_or_else(|| config.backtest.symbol.clone());
            let store = open_store(&config.database).await?;

            let stats = run_backtest(&config, store, selection, &symbol).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
