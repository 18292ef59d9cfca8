use std::str::FromStr;
use std::sync::Arc;

use super::ema::EmaCrossover;
use super::mean_reversion::MeanReversion;
use super::router::OrderRouter;
use super::traits::SharedStrategy;
use crate::common::errors::EngineError;
use crate::common::traits::{OrderExecutor, RiskManager};
use crate::config::types::{RiskConfig, StrategiesConfig};

/// Which built-in strategies take part in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategySelection {
    Ema,
    MeanReversion,
    All,
}

impl StrategySelection {
    pub fn includes_ema(self) -> bool {
        matches!(self, Self::Ema | Self::All)
    }

    pub fn includes_mean_reversion(self) -> bool {
        matches!(self, Self::MeanReversion | Self::All)
    }
}

impl FromStr for StrategySelection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ema" => Ok(Self::Ema),
            "mean" | "mean_reversion" => Ok(Self::MeanReversion),
            "all" => Ok(Self::All),
            other => Err(EngineError::Configuration(format!(
                "unknown strategy selection: {}",
                other
            ))),
        }
    }
}

/// Build the selected strategies wired to `executor`, each seeded with the configured balance
pub async fn build_strategies(
    selection: StrategySelection,
    config: &StrategiesConfig,
    risk_config: &RiskConfig,
    executor: Arc<dyn OrderExecutor>,
    risk: Arc<dyn RiskManager>,
) -> Vec<SharedStrategy> {
    let mut strategies: Vec<SharedStrategy> = Vec::new();

    if selection.includes_ema() {
        let router = OrderRouter::new(&config.ema.symbol, executor.clone(), risk.clone());
        strategies.push(Arc::new(EmaCrossover::new(
            router,
            config.ema.short_period,
            config.ema.long_period,
        )));
    }

    if selection.includes_mean_reversion() {
        let mr = &config.mean_reversion;
        let router = OrderRouter::new(&mr.symbol, executor.clone(), risk.clone());
        strategies.push(Arc::new(MeanReversion::new(router, mr.window, mr.k)));
    }

    for strategy in &strategies {
        strategy
            .set_account_balance(risk_config.account_balance)
            .await;
    }

    strategies
}
