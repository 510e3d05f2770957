//! Exchange Port - Venue Capability Set
//!
//! Defines the trait the strategy controller drives every venue
//! through, plus the value types crossing that boundary.
//!
//! Key design decisions:
//! - Venue-reported failures (rejections, unknown orders) come back as
//!   `Ok(OrderResult { success: false, .. })`; transport, auth and
//!   configuration failures come back as `Err(AdapterError)`
//! - Push updates are delivered over a broadcast channel that the
//!   controller drains at its own yield points
//! - One adapter instance per venue/account context; no shared state

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::order::{Direction, OrderStatus, Side, VenueOrderId};

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Classified adapter failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
  /// Timeout, 5xx, dropped connection. Retried next cycle.
  #[error("Transient venue error: {0}")]
  Transient(String),

  /// Venue or client-side rate limit hit.
  #[error("Rate limit exceeded: {0}")]
  RateLimited(String),

  /// Invalid key, bad signature, permission denied.
  #[error("Authentication error: {0}")]
  Auth(String),

  /// Unknown symbol, bad precision, missing credentials.
  #[error("Configuration error: {0}")]
  Config(String),

  /// Request refused for a reason specific to this request.
  #[error("Request rejected: {0}")]
  Rejected(String),

  /// Call issued while the adapter is disconnected.
  #[error("Not connected")]
  NotConnected,
}

impl AdapterError {
  /// Authentication and configuration failures halt the run.
  pub const fn is_fatal(&self) -> bool {
    matches!(self, Self::Auth(_) | Self::Config(_))
  }

  /// The request may have been executed even though no answer came back.
  pub const fn is_ambiguous(&self) -> bool {
    matches!(self, Self::Transient(_))
  }

  /// Stable label for metrics.
  pub const fn kind(&self) -> &'static str {
    match self {
      Self::Transient(_) => "transient",
      Self::RateLimited(_) => "rate_limited",
      Self::Auth(_) => "auth",
      Self::Config(_) => "config",
      Self::Rejected(_) => "rejected",
      Self::NotConnected => "not_connected",
    }
  }
}

/// Outcome of a placement or cancellation call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderResult {
  /// Whether the venue accepted the request.
  pub success: bool,
  /// Venue order id, when one was assigned.
  pub order_id: Option<VenueOrderId>,
  /// Side the venue recorded.
  pub side: Option<Side>,
  /// Order size the venue recorded.
  pub size: Option<Decimal>,
  /// Limit price the venue recorded.
  pub price: Option<Decimal>,
  /// Status immediately after the call.
  pub status: Option<OrderStatus>,
  /// Cumulative filled size, when reported.
  pub filled_size: Option<Decimal>,
  /// Human-readable failure reason.
  pub error_message: Option<String>,
}

impl OrderResult {
  /// Unsuccessful result carrying a venue message.
  pub fn failure(message: impl Into<String>) -> Self {
    Self {
      success: false,
      error_message: Some(message.into()),
      ..Self::default()
    }
  }
}

/// Venue view of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderInfo {
  /// Venue order id.
  pub order_id: VenueOrderId,
  /// Contract / symbol.
  pub contract: String,
  pub side: Side,
  /// Original order size.
  pub size: Decimal,
  /// Limit price.
  pub price: Decimal,
  pub status: OrderStatus,
  pub filled_size: Decimal,
  pub remaining_size: Decimal,
  /// Venue event / transaction time, when the source provides one.
  pub event_time: Option<DateTime<Utc>>,
}

/// Net exposure for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
  pub symbol: String,
  /// Signed size: positive long, negative short.
  pub net_size: Decimal,
  pub entry_price: Option<Decimal>,
  pub unrealized_pnl: Option<Decimal>,
}

/// Best bid / best ask snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bbo {
  pub best_bid: Decimal,
  pub best_ask: Decimal,
}

impl Bbo {
  /// Both sides present and not crossed.
  pub fn is_valid(&self) -> bool {
    self.best_bid > Decimal::ZERO && self.best_ask > Decimal::ZERO && self.best_bid < self.best_ask
  }

  /// Reference price for a direction: buy compares the ask, sell the bid.
  pub const fn reference(&self, direction: Direction) -> Decimal {
    match direction {
      Direction::Buy => self.best_ask,
      Direction::Sell => self.best_bid,
    }
  }
}

/// Message pushed by the adapter's event source.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
  /// Venue-reported order status change.
  Order(OrderInfo),
  /// Push stream lost; events may have been missed.
  Disconnected,
}

/// Capability set every venue implements.
///
/// The controller holds exactly one implementor, selected at startup.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync + 'static {
  /// Venue name for logs and metrics.
  fn name(&self) -> &'static str;

  /// Establish sessions and the push stream. Idempotent.
  async fn connect(&self) -> AdapterResult<()>;

  /// Tear down sessions. Always safe to call.
  async fn disconnect(&self) -> AdapterResult<()>;

  /// Whether the push stream is currently up.
  fn is_connected(&self) -> bool;

  /// Place a maker open order near the touch for `direction`.
  ///
  /// The adapter chooses the limit price from its own book view.
  async fn place_open_order(
    &self,
    contract: &str,
    quantity: Decimal,
    direction: Direction,
  ) -> AdapterResult<OrderResult>;

  /// Place a take-profit close order at `price`.
  async fn place_close_order(
    &self,
    contract: &str,
    quantity: Decimal,
    price: Decimal,
    side: Side,
  ) -> AdapterResult<OrderResult>;

  /// Cancel one order by venue id.
  ///
  /// The returned status reflects what the venue holds after the call,
  /// which may be `Filled` when the fill raced the cancel.
  async fn cancel_order(&self, order_id: &str) -> AdapterResult<OrderResult>;

  /// Look up one order. `None` means the venue has no record of it.
  async fn get_order_info(&self, order_id: &str) -> AdapterResult<Option<OrderInfo>>;

  /// All non-terminal orders on `contract`.
  async fn get_active_orders(&self, contract: &str) -> AdapterResult<Vec<OrderInfo>>;

  /// Positions keyed by symbol.
  async fn get_account_positions(&self) -> AdapterResult<HashMap<String, PositionSnapshot>>;

  /// Current best bid / ask for `contract`.
  async fn fetch_bbo(&self, contract: &str) -> AdapterResult<Bbo>;

  /// New receiver on the push-event channel.
  fn subscribe_order_events(&self) -> broadcast::Receiver<AdapterEvent>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn test_fatal_classification() {
    assert!(AdapterError::Auth("bad key".into()).is_fatal());
    assert!(AdapterError::Config("unknown symbol".into()).is_fatal());
    assert!(!AdapterError::Transient("timeout".into()).is_fatal());
    assert!(!AdapterError::RateLimited("429".into()).is_fatal());
    assert!(!AdapterError::NotConnected.is_fatal());
  }

  #[test]
  fn test_only_transient_errors_are_ambiguous() {
    assert!(AdapterError::Transient("request timed out".into()).is_ambiguous());
    assert!(!AdapterError::RateLimited("429".into()).is_ambiguous());
    assert!(!AdapterError::Rejected("would cross".into()).is_ambiguous());
    assert!(!AdapterError::NotConnected.is_ambiguous());
  }

  #[test]
  fn test_bbo_reference_side() {
    let bbo = Bbo {
      best_bid: dec!(1999.9),
      best_ask: dec!(2000.1),
    };
    assert!(bbo.is_valid());
    assert_eq!(bbo.reference(Direction::Buy), dec!(2000.1));
    assert_eq!(bbo.reference(Direction::Sell), dec!(1999.9));
  }

  #[test]
  fn test_crossed_bbo_invalid() {
    let bbo = Bbo {
      best_bid: dec!(2001),
      best_ask: dec!(2000),
    };
    assert!(!bbo.is_valid());
  }

  #[test]
  fn test_failure_result() {
    let r = OrderResult::failure("post-only would cross");
    assert!(!r.success);
    assert!(r.order_id.is_none());
    assert_eq!(r.error_message.as_deref(), Some("post-only would cross"));
  }
}
