//! Aster API Request/Response Types
//!
//! Serialization types for the Aster futures REST API and the
//! user-data WebSocket stream, plus their conversion into the
//! venue-neutral port types.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::order::{OrderStatus, Side};
use crate::ports::exchange::{OrderInfo, PositionSnapshot};

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
  pub code: i64,
  #[serde(default)]
  pub msg: String,
}

/// `GET /fapi/v1/ticker/bookTicker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
  pub symbol: String,
  pub bid_price: Decimal,
  pub ask_price: Decimal,
}

/// Order record returned by place, cancel, query and openOrders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
  pub order_id: u64,
  pub symbol: String,
  pub side: String,
  pub status: String,
  pub price: Decimal,
  pub orig_qty: Decimal,
  #[serde(default)]
  pub executed_qty: Decimal,
  /// Last update time (ms).
  pub update_time: Option<i64>,
}

impl OrderResponse {
  /// Convert to the port type. `None` when side or status is unrecognized.
  pub fn into_order_info(self) -> Option<OrderInfo> {
    let side = Side::parse(&self.side)?;
    let status = OrderStatus::from_venue_str(&self.status)?;
    let filled = self.executed_qty.min(self.orig_qty);
    Some(OrderInfo {
      order_id: self.order_id.to_string(),
      contract: self.symbol,
      side,
      size: self.orig_qty,
      price: self.price,
      status,
      filled_size: filled,
      remaining_size: self.orig_qty - filled,
      event_time: self.update_time.and_then(millis_to_utc),
    })
  }
}

/// One entry of `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
  pub symbol: String,
  pub position_amt: Decimal,
  pub entry_price: Option<Decimal>,
  #[serde(rename = "unRealizedProfit")]
  pub unrealized_profit: Option<Decimal>,
}

impl From<PositionRisk> for PositionSnapshot {
  fn from(p: PositionRisk) -> Self {
    Self {
      symbol: p.symbol,
      net_size: p.position_amt,
      entry_price: p.entry_price.filter(|e| !e.is_zero()),
      unrealized_pnl: p.unrealized_profit,
    }
  }
}

/// `GET /fapi/v1/exchangeInfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
  pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
  pub symbol: String,
  pub status: String,
  #[serde(default)]
  pub base_asset: String,
  #[serde(default)]
  pub quote_asset: String,
  #[serde(default)]
  pub filters: Vec<SymbolFilter>,
}

/// Only the price and lot filters are inspected; others are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
  #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
  Price { tick_size: Decimal },
  #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
  LotSize { min_qty: Decimal },
  #[serde(other)]
  Other,
}

impl SymbolInfo {
  pub fn tick_size(&self) -> Option<Decimal> {
    self.filters.iter().find_map(|f| match f {
      SymbolFilter::Price { tick_size } => Some(*tick_size),
      _ => None,
    })
  }

  pub fn min_qty(&self) -> Option<Decimal> {
    self.filters.iter().find_map(|f| match f {
      SymbolFilter::LotSize { min_qty } => Some(*min_qty),
      _ => None,
    })
  }
}

/// `POST /fapi/v1/listenKey`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
  pub listen_key: String,
}

/// Envelope of a user-data stream message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserStreamEvent {
  #[serde(rename = "ORDER_TRADE_UPDATE")]
  OrderTradeUpdate {
    /// Event time (ms).
    #[serde(rename = "E")]
    event_time: i64,
    /// Transaction time (ms).
    #[serde(rename = "T")]
    transaction_time: Option<i64>,
    #[serde(rename = "o")]
    order: OrderUpdatePayload,
  },
  #[serde(rename = "listenKeyExpired")]
  ListenKeyExpired,
  #[serde(other)]
  Other,
}

/// Order body of an `ORDER_TRADE_UPDATE` event.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdatePayload {
  #[serde(rename = "s")]
  pub symbol: String,
  #[serde(rename = "S")]
  pub side: String,
  #[serde(rename = "q")]
  pub quantity: Decimal,
  #[serde(rename = "p")]
  pub price: Decimal,
  /// Order status.
  #[serde(rename = "X")]
  pub status: String,
  #[serde(rename = "i")]
  pub order_id: u64,
  /// Cumulative filled quantity.
  #[serde(rename = "z")]
  pub filled: Decimal,
}

/// Convert a trade update to the port type, stamped with the
/// transaction time when present, else the event time.
pub fn order_update_info(
  event_time: i64,
  transaction_time: Option<i64>,
  o: OrderUpdatePayload,
) -> Option<OrderInfo> {
  let side = Side::parse(&o.side)?;
  let status = OrderStatus::from_venue_str(&o.status)?;
  let filled = o.filled.min(o.quantity);
  Some(OrderInfo {
    order_id: o.order_id.to_string(),
    contract: o.symbol,
    side,
    size: o.quantity,
    price: o.price,
    status,
    filled_size: filled,
    remaining_size: o.quantity - filled,
    event_time: millis_to_utc(transaction_time.unwrap_or(event_time)),
  })
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
  Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  #[test]
  fn test_parse_book_ticker() {
    let json = r#"{"symbol":"ETHUSDT","bidPrice":"1999.90","bidQty":"3.1","askPrice":"2000.10","askQty":"1.0","time":1700000000000}"#;
    let t: BookTicker = serde_json::from_str(json).unwrap();
    assert_eq!(t.bid_price, dec!(1999.90));
    assert_eq!(t.ask_price, dec!(2000.10));
  }

  #[test]
  fn test_order_response_to_info() {
    let json = r#"{"orderId":42,"symbol":"ETHUSDT","status":"PARTIALLY_FILLED","clientOrderId":"x",
      "price":"2000.40","origQty":"0.1","executedQty":"0.04","side":"SELL","updateTime":1700000000123}"#;
    let r: OrderResponse = serde_json::from_str(json).unwrap();
    let info = r.into_order_info().unwrap();
    assert_eq!(info.order_id, "42");
    assert_eq!(info.side, Side::Sell);
    assert_eq!(info.status, OrderStatus::PartiallyFilled);
    assert_eq!(info.filled_size, dec!(0.04));
    assert_eq!(info.remaining_size, dec!(0.06));
    assert_eq!(info.event_time.unwrap().timestamp_millis(), 1_700_000_000_123);
  }

  #[test]
  fn test_order_trade_update_event() {
    let json = r#"{"e":"ORDER_TRADE_UPDATE","E":1700000000500,"T":1700000000499,
      "o":{"s":"ETHUSDT","c":"cid","S":"BUY","o":"LIMIT","f":"GTX","q":"0.1","p":"1999.99",
           "x":"TRADE","X":"FILLED","i":7,"l":"0.1","z":"0.1","L":"1999.99"}}"#;
    let event: UserStreamEvent = serde_json::from_str(json).unwrap();
    let UserStreamEvent::OrderTradeUpdate { event_time, transaction_time, order } = event else {
      panic!("expected order update");
    };
    let info = order_update_info(event_time, transaction_time, order).unwrap();
    assert_eq!(info.status, OrderStatus::Filled);
    assert_eq!(info.filled_size, dec!(0.1));
    assert_eq!(info.remaining_size, dec!(0));
    assert_eq!(info.event_time.unwrap().timestamp_millis(), 1_700_000_000_499);
  }

  #[test]
  fn test_listen_key_expired_and_unknown_events() {
    let expired: UserStreamEvent =
      serde_json::from_str(r#"{"e":"listenKeyExpired","E":1}"#).unwrap();
    assert!(matches!(expired, UserStreamEvent::ListenKeyExpired));
    let other: UserStreamEvent =
      serde_json::from_str(r#"{"e":"ACCOUNT_UPDATE","E":1,"a":{}}"#).unwrap();
    assert!(matches!(other, UserStreamEvent::Other));
  }

  #[test]
  fn test_symbol_filters() {
    let json = r#"{"symbols":[{"symbol":"ETHUSDT","status":"TRADING","baseAsset":"ETH","quoteAsset":"USDT",
      "filters":[{"filterType":"PRICE_FILTER","minPrice":"0.01","maxPrice":"100000","tickSize":"0.01"},
                 {"filterType":"LOT_SIZE","minQty":"0.001","maxQty":"10000","stepSize":"0.001"},
                 {"filterType":"MIN_NOTIONAL","notional":"5"}]}]}"#;
    let info: ExchangeInfo = serde_json::from_str(json).unwrap();
    let sym = &info.symbols[0];
    assert_eq!(sym.tick_size(), Some(dec!(0.01)));
    assert_eq!(sym.min_qty(), Some(dec!(0.001)));
  }

  #[test]
  fn test_position_snapshot_conversion() {
    let json = r#"{"symbol":"ETHUSDT","positionAmt":"-0.2","entryPrice":"2001.5","unRealizedProfit":"-0.3"}"#;
    let p: PositionRisk = serde_json::from_str(json).unwrap();
    let snap = PositionSnapshot::from(p);
    assert_eq!(snap.net_size, dec!(-0.2));
    assert_eq!(snap.entry_price, Some(dec!(2001.5)));
  }
}
