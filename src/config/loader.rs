//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::info;

use super::{AppConfig, VenueKind};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    contract = %config.strategy.contract_id,
    direction = %config.strategy.direction,
    quantity = %config.strategy.quantity,
    take_profit = %config.strategy.take_profit,
    max_orders = config.strategy.max_orders,
    venue = ?config.venue.exchange,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive size, take-profit and tick
/// - Non-zero order ceiling and cadence
/// - Consistent paper quotes
pub fn validate_config(config: &AppConfig) -> Result<()> {
  let s = &config.strategy;

  anyhow::ensure!(!s.ticker.is_empty(), "strategy.ticker must not be empty");
  anyhow::ensure!(
    !s.contract_id.is_empty(),
    "strategy.contract_id must not be empty"
  );
  anyhow::ensure!(
    s.quantity > Decimal::ZERO,
    "strategy.quantity must be positive, got {}",
    s.quantity
  );
  anyhow::ensure!(
    s.take_profit > Decimal::ZERO,
    "strategy.take_profit must be positive, got {}",
    s.take_profit
  );
  anyhow::ensure!(
    s.tick_size > Decimal::ZERO,
    "strategy.tick_size must be positive, got {}",
    s.tick_size
  );
  anyhow::ensure!(s.max_orders > 0, "strategy.max_orders must be at least 1");
  anyhow::ensure!(
    s.cycle_interval_ms > 0,
    "strategy.cycle_interval_ms must be positive"
  );
  anyhow::ensure!(
    s.resync_interval_secs > 0,
    "strategy.resync_interval_secs must be positive"
  );

  // Thresholds: negative disables, zero is a legal price only for sell-side stops.
  if s.stop_price >= Decimal::ZERO && s.pause_price >= Decimal::ZERO {
    anyhow::ensure!(
      s.stop_price != s.pause_price,
      "strategy.stop_price and strategy.pause_price must differ when both are set"
    );
  }

  if config.venue.exchange == VenueKind::Paper {
    let p = &config.venue.paper;
    anyhow::ensure!(
      p.best_bid > Decimal::ZERO && p.best_bid < p.best_ask,
      "venue.paper quotes must satisfy 0 < best_bid < best_ask, got {} / {}",
      p.best_bid,
      p.best_ask
    );
  } else {
    anyhow::ensure!(!config.venue.rest_url.is_empty(), "venue.rest_url must not be empty");
    anyhow::ensure!(!config.venue.ws_url.is_empty(), "venue.ws_url must not be empty");
    anyhow::ensure!(
      config.venue.max_requests_per_second > 0,
      "venue.max_requests_per_second must be positive"
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::GridPolicy;
  use crate::domain::order::Direction;
  use rust_decimal_macros::dec;

  const MINIMAL: &str = r#"
[bot]
name = "eth-long"

[strategy]
ticker = "ETH"
contract_id = "ETHUSDT"
quantity = 0.1
take_profit = 0.02
tick_size = 0.01
direction = "buy"
max_orders = 10
wait_time_secs = 30

[venue]
exchange = "paper"
"#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_defaults_disable_guards() {
    let config = parse_config(MINIMAL).unwrap();
    let s = &config.strategy;
    assert_eq!(s.direction, Direction::Buy);
    assert_eq!(s.grid_step, dec!(-100));
    assert_eq!(s.stop_price, dec!(-1));
    assert_eq!(s.pause_price, dec!(-1));
    assert_eq!(s.grid_policy, GridPolicy::Defer);
    assert!(!s.adaptive_cooldown);
    assert_eq!(s.order_timeout(), s.wait_time());
    assert_eq!(config.persistence.data_dir, "data");
  }

  #[test]
  fn test_rejects_zero_max_orders() {
    let text = MINIMAL.replace("max_orders = 10", "max_orders = 0");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_rejects_non_positive_take_profit() {
    let text = MINIMAL.replace("take_profit = 0.02", "take_profit = 0");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_rejects_unknown_direction() {
    let text = MINIMAL.replace("direction = \"buy\"", "direction = \"long\"");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_example_config_is_valid() {
    let config = parse_config(include_str!("../../config.example.toml")).unwrap();
    assert_eq!(config.venue.exchange, VenueKind::Paper);
    assert_eq!(config.strategy.max_orders, 40);
    assert_eq!(config.strategy.order_timeout(), config.strategy.wait_time());
    assert!(config.metrics.enabled);
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, MINIMAL).unwrap();
    let config = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(config.strategy.contract_id, "ETHUSDT");
  }
}
