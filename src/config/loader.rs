//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{EngineError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP__, e.g. `APP__RISK__PERCENT`)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    // Pick up a .env file if one is present
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| EngineError::Configuration(e.to_string()))?;

    let app: AppConfig = config
        .try_deserialize()
        .map_err(|e| EngineError::Configuration(e.to_string()))?;

    validate(&app)?;
    Ok(app)
}

/// Reject parameter combinations the strategies cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    let ema = &config.strategies.ema;
    if ema.short_period == 0 || ema.long_period == 0 {
        return Err(EngineError::Configuration(
            "EMA periods must be positive".to_string(),
        ));
    }
    if ema.short_period >= ema.long_period {
        return Err(EngineError::Configuration(format!(
            "EMA short period ({}) must be below long period ({})",
            ema.short_period, ema.long_period
        )));
    }
    if config.strategies.mean_reversion.window == 0 {
        return Err(EngineError::Configuration(
            "mean reversion window must be positive".to_string(),
        ));
    }
    if config.settings.max_order_attempts == 0 {
        return Err(EngineError::Configuration(
            "max_order_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}
