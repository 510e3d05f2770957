//! Configuration Module - TOML-based Bot Configuration
//!
//! Loads and validates configuration from `config.toml`. Credentials
//! never live in the file; venue adapters read them from the
//! environment. The loaded record is immutable for the run's lifetime.

pub mod loader;

use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::order::Direction;

/// Top-level bot configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the bot begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Bot identity and metadata.
  pub bot: BotConfig,
  /// Cycle strategy parameters.
  pub strategy: StrategyConfig,
  /// Venue selection and connectivity.
  pub venue: VenueConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
  /// Human-readable bot name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// What to do when the grid guard rejects a close price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridPolicy {
  /// Keep the close pending and retry next cycle.
  #[default]
  Defer,
  /// Move the close one tick past the guard boundary, if still profitable.
  Adjust,
}

/// Strategy parameters for one contract.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
  /// Base asset ticker (e.g. "ETH").
  pub ticker: String,
  /// Venue contract / symbol (e.g. "ETHUSDT").
  pub contract_id: String,
  /// Size of each open order.
  pub quantity: Decimal,
  /// Take-profit in percent (0.02 = 0.02%).
  pub take_profit: Decimal,
  /// Venue price increment.
  pub tick_size: Decimal,
  /// Open direction.
  pub direction: Direction,
  /// Ceiling on non-terminal orders, both roles.
  pub max_orders: usize,
  /// Minimum interval between open placements (seconds).
  pub wait_time_secs: u64,
  /// Minimum close spacing in percent; non-positive disables.
  #[serde(default = "default_disabled_grid")]
  pub grid_step: Decimal,
  /// Reaction to grid guard rejections.
  #[serde(default)]
  pub grid_policy: GridPolicy,
  /// Stop threshold; negative disables.
  #[serde(default = "default_disabled_price")]
  pub stop_price: Decimal,
  /// Pause threshold; negative disables.
  #[serde(default = "default_disabled_price")]
  pub pause_price: Decimal,
  /// Scale the open interval by close-book fullness.
  #[serde(default)]
  pub adaptive_cooldown: bool,
  /// Age at which unfilled open orders are cancelled (seconds).
  /// Defaults to `wait_time_secs`.
  pub order_timeout_secs: Option<u64>,
  /// Scheduler cadence (milliseconds).
  #[serde(default = "default_cycle_interval")]
  pub cycle_interval_ms: u64,
  /// Full poll-based resync interval (seconds).
  #[serde(default = "default_resync_interval")]
  pub resync_interval_secs: u64,
  /// Position diagnostics interval (seconds).
  #[serde(default = "default_status_interval")]
  pub status_log_interval_secs: u64,
}

impl StrategyConfig {
  pub fn wait_time(&self) -> TimeDelta {
    TimeDelta::seconds(secs_i64(self.wait_time_secs))
  }

  pub fn order_timeout(&self) -> TimeDelta {
    TimeDelta::seconds(secs_i64(self.order_timeout_secs.unwrap_or(self.wait_time_secs)))
  }

  pub fn resync_interval(&self) -> TimeDelta {
    TimeDelta::seconds(secs_i64(self.resync_interval_secs))
  }

  pub fn status_log_interval(&self) -> TimeDelta {
    TimeDelta::seconds(secs_i64(self.status_log_interval_secs))
  }
}

fn secs_i64(secs: u64) -> i64 {
  i64::try_from(secs).unwrap_or(i64::MAX / 1_000)
}

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
  /// In-memory simulated venue.
  Paper,
  /// Aster perpetual futures.
  Aster,
}

/// Venue selection and connectivity.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
  /// Which adapter drives this run.
  pub exchange: VenueKind,
  /// Account selector; suffixes credential env vars (`ASTER_API_KEY_<account>`).
  pub account: Option<String>,
  /// REST base URL.
  #[serde(default = "default_rest_url")]
  pub rest_url: String,
  /// WebSocket base URL.
  #[serde(default = "default_ws_url")]
  pub ws_url: String,
  /// Signed request validity window (milliseconds).
  #[serde(default = "default_recv_window")]
  pub recv_window_ms: u64,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Client-side REST rate limit.
  #[serde(default = "default_requests_per_second")]
  pub max_requests_per_second: u32,
  /// Paper venue settings.
  #[serde(default)]
  pub paper: PaperConfig,
}

/// Paper venue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
  /// Initial best bid.
  #[serde(default = "default_paper_bid")]
  pub best_bid: Decimal,
  /// Initial best ask.
  #[serde(default = "default_paper_ask")]
  pub best_ask: Decimal,
  /// Drive the simulated book from the live venue's public book ticker.
  #[serde(default)]
  pub follow_live_quotes: bool,
  /// Quote refresh interval when following live quotes (milliseconds).
  #[serde(default = "default_quote_poll")]
  pub quote_poll_ms: u64,
}

impl Default for PaperConfig {
  fn default() -> Self {
    Self {
      best_bid: default_paper_bid(),
      best_ask: default_paper_ask(),
      follow_live_quotes: false,
      quote_poll_ms: default_quote_poll(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for JSONL transaction logs.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_disabled_grid() -> Decimal {
  Decimal::from(-100)
}

fn default_disabled_price() -> Decimal {
  Decimal::NEGATIVE_ONE
}

fn default_cycle_interval() -> u64 {
  1_000
}

fn default_resync_interval() -> u64 {
  30
}

fn default_status_interval() -> u64 {
  30
}

fn default_rest_url() -> String {
  "https://fapi.asterdex.com".to_string()
}

fn default_ws_url() -> String {
  "wss://fstream.asterdex.com".to_string()
}

fn default_recv_window() -> u64 {
  5_000
}

fn default_timeout() -> u64 {
  10
}

fn default_requests_per_second() -> u32 {
  10
}

fn default_paper_bid() -> Decimal {
  Decimal::from(1_999)
}

fn default_paper_ask() -> Decimal {
  Decimal::from(2_000)
}

fn default_quote_poll() -> u64 {
  1_000
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}

fn default_data_dir() -> String {
  "data".to_string()
}
