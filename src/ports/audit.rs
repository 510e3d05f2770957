//! Audit Port - Terminal Order Archival
//!
//! Terminal orders are handed to a `TransactionLog` before the ledger
//! evicts them. Append-only; each record is self-contained.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{LocalOrderId, Order, OrderRole, OrderStatus, Side, VenueOrderId};

/// One archived terminal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
  /// Time the record was written.
  pub timestamp: DateTime<Utc>,
  /// Ledger identifier.
  pub local_id: LocalOrderId,
  /// Venue identifier, absent for orders never acknowledged.
  pub order_id: Option<VenueOrderId>,
  /// Contract / symbol.
  pub contract: String,
  pub role: OrderRole,
  pub side: Side,
  /// Requested size.
  pub size: Decimal,
  pub filled_size: Decimal,
  /// Limit price.
  pub price: Decimal,
  /// Terminal status.
  pub status: OrderStatus,
  /// Linked open/close order.
  pub paired_order: Option<LocalOrderId>,
  /// Order creation time.
  pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
  /// Build a record for `order` stamped at `now`.
  pub fn from_order(order: &Order, now: DateTime<Utc>) -> Self {
    Self {
      timestamp: now,
      local_id: order.local_id,
      order_id: order.venue_order_id.clone(),
      contract: order.contract.clone(),
      role: order.role,
      side: order.side,
      size: order.requested_size,
      filled_size: order.filled_size,
      price: order.price,
      status: order.status,
      paired_order: order.paired_order,
      created_at: order.created_at,
    }
  }
}

/// Durable sink for terminal orders.
#[async_trait]
pub trait TransactionLog: Send + Sync + 'static {
  /// Append one record. Returns only once the record is durable.
  async fn record(&self, record: &TransactionRecord) -> anyhow::Result<()>;
}
