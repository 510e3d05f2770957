//! Order lifecycle domain types.
//!
//! Defines the ledger's view of an order: identity, role in the
//! open/close cycle, ranked status and fill accounting. These types
//! carry no I/O and are shared by the ledger, the controller and the
//! adapters.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────

/// Ledger-assigned order identifier, unique for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalOrderId(pub u64);

impl fmt::Display for LocalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Venue-assigned order identifier.
pub type VenueOrderId = String;

// ────────────────────────────────────────────
// Direction / side / role
// ────────────────────────────────────────────

/// Direction of the strategy: which way open orders trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Open by buying, close by selling (long cycle).
    Buy,
    /// Open by selling, close by buying (short cycle).
    Sell,
}

impl Direction {
    /// Side used for open orders.
    pub const fn open_side(self) -> Side {
        match self {
            Self::Buy => Side::Buy,
            Self::Sell => Side::Sell,
        }
    }

    /// Side used for close orders.
    pub const fn close_side(self) -> Side {
        match self {
            Self::Buy => Side::Sell,
            Self::Sell => Side::Buy,
        }
    }

    pub const fn is_long(self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order side as sent to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse a venue side string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Self::Sell)
        } else {
            None
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub const fn as_venue_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Role of an order in the open/close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    /// Position-establishing limit order.
    Open,
    /// Take-profit order exiting a filled open order.
    Close,
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
        }
    }
}

// ────────────────────────────────────────────
// Status
// ────────────────────────────────────────────

/// Lifecycle status of an order.
///
/// Live statuses are totally ordered by [`OrderStatus::rank`]:
/// `Pending < Acknowledged < PartiallyFilled < Filled`. The remaining
/// terminal statuses share the top rank with `Filled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placement issued, no venue acknowledgement yet.
    Pending,
    /// Resting on the venue book.
    Acknowledged,
    /// Some quantity executed, remainder resting.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled on the venue.
    Cancelled,
    /// Refused by the venue.
    Rejected,
    /// Expired on the venue, or unknown to it.
    Expired,
}

impl OrderStatus {
    /// Position in the status total order.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Acknowledged => 1,
            Self::PartiallyFilled => 2,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired => 3,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Terminal states that end an order without a complete fill.
    pub const fn is_abort(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::Expired)
    }

    /// Map a venue status string to a ledger status.
    ///
    /// Accepts the common spellings used by perpetual venues
    /// (`NEW`/`OPEN`, `CANCELED`/`CANCELLED`, ...).
    pub fn from_venue_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" | "PENDING_NEW" => Some(Self::Pending),
            "NEW" | "OPEN" | "LIVE" | "UNTRIGGERED" => Some(Self::Acknowledged),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" | "CANCELLED" => Some(Self::Cancelled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

// ────────────────────────────────────────────
// Order
// ────────────────────────────────────────────

/// A venue order tracked by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Ledger identifier.
    pub local_id: LocalOrderId,
    /// Venue identifier, `None` until acknowledged.
    pub venue_order_id: Option<VenueOrderId>,
    /// Contract / symbol.
    pub contract: String,
    pub side: Side,
    pub role: OrderRole,
    /// Requested quantity.
    pub requested_size: Decimal,
    /// Limit price (requested, or venue-confirmed once acknowledged).
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub created_at: DateTime<Utc>,
    /// Linked order: the close for an open, the open for a close.
    pub paired_order: Option<LocalOrderId>,
    /// Venue event time of the update that moved the order into its
    /// current status, when the venue supplied one.
    pub status_time: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new pending order with nothing filled.
    pub fn new_pending(
        local_id: LocalOrderId,
        contract: String,
        side: Side,
        role: OrderRole,
        requested_size: Decimal,
        price: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id,
            venue_order_id: None,
            contract,
            side,
            role,
            requested_size,
            price,
            status: OrderStatus::Pending,
            filled_size: Decimal::ZERO,
            remaining_size: requested_size,
            created_at,
            paired_order: None,
            status_time: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `filled + remaining == requested`.
    pub fn sizes_consistent(&self) -> bool {
        self.filled_size + self.remaining_size == self.requested_size
    }
}

// ────────────────────────────────────────────
// Updates fed into reconciliation
// ────────────────────────────────────────────

/// Where an update came from.
///
/// Status ordering ignores the source. It only decides whether an
/// abort still has to be confirmed (cancels and polls) and whether an
/// aborted close gives its quantity back (placements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Result of a placement call.
    Placement,
    /// Result of a cancellation call.
    Cancel,
    /// REST polling / resynchronization.
    Poll,
    /// Venue push event.
    Push,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Placement => "placement",
            Self::Cancel => "cancel",
            Self::Poll => "poll",
            Self::Push => "push",
        };
        f.write_str(s)
    }
}

/// How an update addresses its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Local(LocalOrderId),
    Venue(VenueOrderId),
}

/// An observed order state, from any source.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub key: OrderKey,
    /// Venue id to bind when the update acknowledges a local order.
    pub venue_order_id: Option<VenueOrderId>,
    pub status: OrderStatus,
    /// Cumulative filled size, when reported.
    pub filled_size: Option<Decimal>,
    /// Venue-confirmed price, when reported.
    pub price: Option<Decimal>,
    /// Venue event time, when reported.
    pub event_time: Option<DateTime<Utc>>,
    pub source: UpdateSource,
}

impl OrderUpdate {
    /// Update addressed by venue id.
    pub fn venue(
        venue_order_id: impl Into<VenueOrderId>,
        status: OrderStatus,
        source: UpdateSource,
    ) -> Self {
        let id = venue_order_id.into();
        Self {
            key: OrderKey::Venue(id.clone()),
            venue_order_id: Some(id),
            status,
            filled_size: None,
            price: None,
            event_time: None,
            source,
        }
    }

    /// Update addressed by local id.
    pub const fn local(local_id: LocalOrderId, status: OrderStatus, source: UpdateSource) -> Self {
        Self {
            key: OrderKey::Local(local_id),
            venue_order_id: None,
            status,
            filled_size: None,
            price: None,
            event_time: None,
            source,
        }
    }

    #[must_use]
    pub fn with_venue_id(mut self, venue_order_id: impl Into<VenueOrderId>) -> Self {
        self.venue_order_id = Some(venue_order_id.into());
        self
    }

    #[must_use]
    pub const fn with_filled(mut self, filled_size: Decimal) -> Self {
        self.filled_size = Some(filled_size);
        self
    }

    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub const fn with_event_time(mut self, at: DateTime<Utc>) -> Self {
        self.event_time = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_rank_order() {
        assert!(OrderStatus::Pending.rank() < OrderStatus::Acknowledged.rank());
        assert!(OrderStatus::Acknowledged.rank() < OrderStatus::PartiallyFilled.rank());
        assert!(OrderStatus::PartiallyFilled.rank() < OrderStatus::Filled.rank());
        assert_eq!(OrderStatus::Cancelled.rank(), OrderStatus::Filled.rank());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Filled.is_abort());
        assert!(OrderStatus::Rejected.is_abort());
    }

    #[test]
    fn test_venue_status_mapping() {
        assert_eq!(OrderStatus::from_venue_str("NEW"), Some(OrderStatus::Acknowledged));
        assert_eq!(OrderStatus::from_venue_str("open"), Some(OrderStatus::Acknowledged));
        assert_eq!(OrderStatus::from_venue_str("CANCELED"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::from_venue_str("CANCELLED"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::from_venue_str("bogus"), None);
    }

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Buy.open_side(), Side::Buy);
        assert_eq!(Direction::Buy.close_side(), Side::Sell);
        assert_eq!(Direction::Sell.close_side(), Side::Buy);
    }

    #[test]
    fn test_new_pending_sizes() {
        let order = Order::new_pending(
            LocalOrderId(1),
            "ETHUSDT".to_string(),
            Side::Buy,
            OrderRole::Open,
            dec!(0.5),
            dec!(2000),
            Utc::now(),
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.venue_order_id.is_none());
        assert!(order.sizes_consistent());
        assert_eq!(format!("{}", order.local_id), "L1");
    }
}
