//! Paper venue with simulated maker fills.
//!
//! `PaperExchange` implements the full exchange port in memory. It is
//! used for dry runs and as the venue in end-to-end tests.
//!
//! ## Simulation
//!
//! - Open orders rest one tick inside the touch (post-only style)
//! - Close prices are nudged so they never cross the book
//! - A resting order fills completely when the quote crosses it
//! - Push events are broadcast only while connected; a simulated
//!   disconnect drops them, like a real stream outage
//!
//! ## Limitations
//!
//! - No market impact, fees or funding
//! - Fills are all-or-nothing unless driven by [`PaperExchange::fill_order`]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::domain::order::{Direction, OrderStatus, Side};
use crate::domain::pricing::{maker_close_price, open_order_price};
use crate::ports::exchange::{
    AdapterError, AdapterEvent, AdapterResult, Bbo, ExchangeAdapter, OrderInfo, OrderResult,
    PositionSnapshot,
};

/// Push channel capacity.
const EVENT_CAPACITY: usize = 1024;

/// Adapter calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperCall {
    Connect,
    PlaceOpen,
    PlaceClose,
    Cancel,
    OrderInfo,
    ActiveOrders,
    Positions,
    Bbo,
}

#[derive(Debug)]
struct PaperBook {
    bbo: Bbo,
    orders: HashMap<String, OrderInfo>,
    /// Signed net position per contract.
    positions: HashMap<String, Decimal>,
    next_id: u64,
    placements: usize,
}

/// In-memory venue.
pub struct PaperExchange {
    /// Price increment.
    tick: Decimal,
    book: Mutex<PaperBook>,
    /// Queued failures, consumed in order per call.
    failures: Mutex<VecDeque<(PaperCall, AdapterError)>>,
    connected: AtomicBool,
    events: broadcast::Sender<AdapterEvent>,
}

impl PaperExchange {
    /// Create a paper venue quoting `best_bid` / `best_ask`.
    pub fn new(best_bid: Decimal, best_ask: Decimal, tick: Decimal) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tick,
            book: Mutex::new(PaperBook {
                bbo: Bbo { best_bid, best_ask },
                orders: HashMap::new(),
                positions: HashMap::new(),
                next_id: 0,
                placements: 0,
            }),
            failures: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
            events,
        }
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, info: &OrderInfo) {
        if self.connected.load(Ordering::Acquire) {
            // No receivers is fine; the controller may not be running yet.
            let _ = self.events.send(AdapterEvent::Order(info.clone()));
        }
    }

    fn check(&self, call: PaperCall) -> AdapterResult<()> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = failures.iter().position(|(c, _)| *c == call) {
            if let Some((_, err)) = failures.remove(pos) {
                return Err(err);
            }
        }
        drop(failures);
        if call != PaperCall::Connect && !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        Ok(())
    }

    // ── Simulation controls ──

    /// Make the next `call` fail with `err`.
    pub fn fail_next(&self, call: PaperCall, err: AdapterError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((call, err));
    }

    /// Move the quote and fill every resting order it crosses.
    pub fn set_bbo(&self, best_bid: Decimal, best_ask: Decimal) {
        let filled: Vec<OrderInfo> = {
            let mut book = self.book();
            book.bbo = Bbo { best_bid, best_ask };
            let crossed: Vec<String> = book
                .orders
                .values()
                .filter(|o| !o.status.is_terminal())
                .filter(|o| match o.side {
                    Side::Buy => o.price >= best_ask,
                    Side::Sell => o.price <= best_bid,
                })
                .map(|o| o.order_id.clone())
                .collect();
            crossed
                .into_iter()
                .filter_map(|id| fill_locked(&mut book, &id, None))
                .collect()
        };
        for info in &filled {
            info!(order_id = %info.order_id, price = %info.price, side = %info.side, "Paper fill");
            self.emit(info);
        }
    }

    /// Fill `quantity` of order `id` (all of it when `None`).
    pub fn fill_order(&self, id: &str, quantity: Option<Decimal>) -> Option<OrderInfo> {
        let info = fill_locked(&mut self.book(), id, quantity)?;
        self.emit(&info);
        Some(info)
    }

    /// Drop the push stream, losing events until the next `connect`.
    pub fn simulate_disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.events.send(AdapterEvent::Disconnected);
        }
    }

    /// Forget an order entirely, as if the venue purged it.
    pub fn forget_order(&self, id: &str) -> Option<OrderInfo> {
        self.book().orders.remove(id)
    }

    /// Insert a resting order, as if left over from a previous run.
    pub fn seed_order(&self, contract: &str, side: Side, size: Decimal, price: Decimal) -> String {
        let mut book = self.book();
        let info = new_order(&mut book, contract, side, size, price);
        let id = info.order_id.clone();
        book.orders.insert(id.clone(), info);
        id
    }

    /// Snapshot of one order.
    pub fn order(&self, id: &str) -> Option<OrderInfo> {
        self.book().orders.get(id).cloned()
    }

    /// Snapshot of every order, sorted by id.
    pub fn all_orders(&self) -> Vec<OrderInfo> {
        let mut orders: Vec<OrderInfo> = self.book().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id.trim_start_matches('P').parse::<u64>().unwrap_or(0));
        orders
    }

    /// Number of accepted placements (open and close).
    pub fn placements(&self) -> usize {
        self.book().placements
    }
}

fn new_order(book: &mut PaperBook, contract: &str, side: Side, size: Decimal, price: Decimal) -> OrderInfo {
    book.next_id += 1;
    book.placements += 1;
    OrderInfo {
        order_id: format!("P{}", book.next_id),
        contract: contract.to_string(),
        side,
        size,
        price,
        status: OrderStatus::Acknowledged,
        filled_size: Decimal::ZERO,
        remaining_size: size,
        event_time: Some(Utc::now()),
    }
}

fn fill_locked(book: &mut PaperBook, id: &str, quantity: Option<Decimal>) -> Option<OrderInfo> {
    let order = book.orders.get_mut(id)?;
    if order.status.is_terminal() {
        return None;
    }
    let qty = quantity.unwrap_or(order.remaining_size).min(order.remaining_size);
    order.filled_size += qty;
    order.remaining_size -= qty;
    order.status = if order.remaining_size.is_zero() {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    };
    order.event_time = Some(Utc::now());
    let info = order.clone();

    let signed = match info.side {
        Side::Buy => qty,
        Side::Sell => -qty,
    };
    *book.positions.entry(info.contract.clone()).or_default() += signed;
    Some(info)
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn connect(&self) -> AdapterResult<()> {
        self.check(PaperCall::Connect)?;
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!("Paper venue connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[instrument(skip(self), level = "debug")]
    async fn place_open_order(
        &self,
        contract: &str,
        quantity: Decimal,
        direction: Direction,
    ) -> AdapterResult<OrderResult> {
        self.check(PaperCall::PlaceOpen)?;
        let info = {
            let mut book = self.book();
            let price = open_order_price(book.bbo.best_bid, book.bbo.best_ask, direction, self.tick);
            let info = new_order(&mut book, contract, direction.open_side(), quantity, price);
            book.orders.insert(info.order_id.clone(), info.clone());
            info
        };
        debug!(order_id = %info.order_id, price = %info.price, "Paper open order resting");
        self.emit(&info);
        Ok(placed(&info))
    }

    #[instrument(skip(self), level = "debug")]
    async fn place_close_order(
        &self,
        contract: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> AdapterResult<OrderResult> {
        self.check(PaperCall::PlaceClose)?;
        let info = {
            let mut book = self.book();
            let bbo = book.bbo;
            let price = maker_close_price(price, side, bbo.best_bid, bbo.best_ask, self.tick);
            let info = new_order(&mut book, contract, side, quantity, price);
            book.orders.insert(info.order_id.clone(), info.clone());
            info
        };
        self.emit(&info);
        Ok(placed(&info))
    }

    async fn cancel_order(&self, order_id: &str) -> AdapterResult<OrderResult> {
        self.check(PaperCall::Cancel)?;
        let info = {
            let mut book = self.book();
            let Some(order) = book.orders.get_mut(order_id) else {
                return Ok(OrderResult::failure("Unknown order"));
            };
            if order.status.is_terminal() {
                return Ok(OrderResult {
                    order_id: Some(order.order_id.clone()),
                    status: Some(order.status),
                    filled_size: Some(order.filled_size),
                    ..OrderResult::failure(format!("Order already {}", order.status))
                });
            }
            order.status = OrderStatus::Cancelled;
            order.event_time = Some(Utc::now());
            order.clone()
        };
        self.emit(&info);
        Ok(OrderResult {
            success: true,
            order_id: Some(info.order_id.clone()),
            side: Some(info.side),
            size: Some(info.size),
            price: Some(info.price),
            status: Some(OrderStatus::Cancelled),
            filled_size: Some(info.filled_size),
            error_message: None,
        })
    }

    async fn get_order_info(&self, order_id: &str) -> AdapterResult<Option<OrderInfo>> {
        self.check(PaperCall::OrderInfo)?;
        Ok(self.order(order_id))
    }

    async fn get_active_orders(&self, contract: &str) -> AdapterResult<Vec<OrderInfo>> {
        self.check(PaperCall::ActiveOrders)?;
        Ok(self
            .all_orders()
            .into_iter()
            .filter(|o| o.contract == contract && !o.status.is_terminal())
            .collect())
    }

    async fn get_account_positions(&self) -> AdapterResult<HashMap<String, PositionSnapshot>> {
        self.check(PaperCall::Positions)?;
        Ok(self
            .book()
            .positions
            .iter()
            .map(|(symbol, net)| {
                (
                    symbol.clone(),
                    PositionSnapshot {
                        symbol: symbol.clone(),
                        net_size: *net,
                        entry_price: None,
                        unrealized_pnl: None,
                    },
                )
            })
            .collect())
    }

    async fn fetch_bbo(&self, _contract: &str) -> AdapterResult<Bbo> {
        self.check(PaperCall::Bbo)?;
        Ok(self.book().bbo)
    }

    fn subscribe_order_events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

fn placed(info: &OrderInfo) -> OrderResult {
    OrderResult {
        success: true,
        order_id: Some(info.order_id.clone()),
        side: Some(info.side),
        size: Some(info.size),
        price: Some(info.price),
        status: Some(info.status),
        filled_size: Some(info.filled_size),
        error_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn venue() -> PaperExchange {
        let v = PaperExchange::new(dec!(1999.9), dec!(2000.0), dec!(0.1));
        v.connect().await.unwrap();
        v
    }

    #[tokio::test]
    async fn test_open_rests_inside_touch() {
        let v = venue().await;
        let r = v.place_open_order("ETHUSDT", dec!(1), Direction::Buy).await.unwrap();
        assert!(r.success);
        assert_eq!(r.price, Some(dec!(1999.9)));
        assert_eq!(r.status, Some(OrderStatus::Acknowledged));
    }

    #[tokio::test]
    async fn test_quote_cross_fills_and_emits() {
        let v = venue().await;
        let mut rx = v.subscribe_order_events();
        let r = v.place_open_order("ETHUSDT", dec!(1), Direction::Buy).await.unwrap();
        let id = r.order_id.unwrap();
        v.set_bbo(dec!(1999.5), dec!(1999.9));

        assert_eq!(v.order(&id).unwrap().status, OrderStatus::Filled);
        let mut saw_fill = false;
        while let Ok(AdapterEvent::Order(info)) = rx.try_recv() {
            saw_fill |= info.status == OrderStatus::Filled;
        }
        assert!(saw_fill);
        let positions = v.get_account_positions().await.unwrap();
        assert_eq!(positions["ETHUSDT"].net_size, dec!(1));
    }

    #[tokio::test]
    async fn test_cancel_after_fill_reports_filled() {
        let v = venue().await;
        let id = v
            .place_open_order("ETHUSDT", dec!(1), Direction::Sell)
            .await
            .unwrap()
            .order_id
            .unwrap();
        v.fill_order(&id, None);
        let r = v.cancel_order(&id).await.unwrap();
        assert!(!r.success);
        assert_eq!(r.status, Some(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn test_close_price_kept_passive() {
        let v = venue().await;
        let r = v
            .place_close_order("ETHUSDT", dec!(1), dec!(1990), Side::Sell)
            .await
            .unwrap();
        assert_eq!(r.price, Some(dec!(2000.0)));
    }

    #[tokio::test]
    async fn test_injected_failure_and_disconnect() {
        let v = venue().await;
        v.fail_next(PaperCall::Bbo, AdapterError::Transient("timeout".into()));
        assert!(v.fetch_bbo("ETHUSDT").await.is_err());
        assert!(v.fetch_bbo("ETHUSDT").await.is_ok());

        v.simulate_disconnect();
        assert_eq!(
            v.fetch_bbo("ETHUSDT").await.unwrap_err(),
            AdapterError::NotConnected
        );
    }
}
