//! Aster Venue Adapter - Perpetual Futures over REST + WebSocket
//!
//! Implements `ExchangeAdapter` for Aster: signed REST calls for
//! orders, book and positions, and a listen-key user-data stream for
//! push updates.
//!
//! Key design decisions:
//! - Every order is post-only (GTX); a maker order the venue expires on
//!   arrival is re-priced from a fresh book and retried a bounded number
//!   of times
//! - Contract attributes are checked once on first connect; an unknown
//!   symbol, tick mismatch, or undersized quantity is a fatal
//!   configuration error
//! - Cancelling an order the venue no longer has resolves its real status
//!   with a follow-up query, so a fill that raced the cancel is reported

pub mod auth;
pub mod client;
pub mod types;
pub mod user_stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::order::{Direction, OrderStatus, Side};
use crate::domain::pricing::{maker_close_price, open_order_price, round_to_tick};
use crate::ports::exchange::{
    AdapterError, AdapterEvent, AdapterResult, Bbo, ExchangeAdapter, OrderInfo, OrderResult,
    PositionSnapshot,
};

pub use auth::AsterAuth;
pub use client::{AsterClient, AsterClientConfig};

use client::ApiError;
use user_stream::UserStream;

/// Attempts per placement when the venue expires a post-only order.
const POST_ONLY_ATTEMPTS: usize = 3;
const STREAM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Static contract parameters the adapter validates on connect.
#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub ticker: String,
    pub contract_id: String,
    pub tick_size: Decimal,
    pub quantity: Decimal,
}

struct StreamHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Aster exchange adapter.
pub struct AsterExchange {
    client: Arc<AsterClient>,
    contract: ContractSpec,
    ws_url: String,
    events_tx: broadcast::Sender<AdapterEvent>,
    connected: Arc<AtomicBool>,
    contract_checked: AtomicBool,
    stream: Mutex<Option<StreamHandle>>,
}

impl AsterExchange {
    pub fn new(client: Arc<AsterClient>, contract: ContractSpec, ws_url: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            client,
            contract,
            ws_url: ws_url.into(),
            events_tx,
            connected: Arc::new(AtomicBool::new(false)),
            contract_checked: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }

    /// Confirm the contract trades, its tick matches, and the order
    /// quantity clears the venue minimum.
    async fn check_contract(&self) -> AdapterResult<()> {
        if self.contract_checked.load(Ordering::SeqCst) {
            return Ok(());
        }

        let info = self.client.exchange_info().await?;
        let wanted = &self.contract;
        let symbol = info
            .symbols
            .iter()
            .find(|s| s.symbol == wanted.contract_id)
            .ok_or_else(|| AdapterError::Config(format!("unknown contract {}", wanted.contract_id)))?;

        if symbol.status != "TRADING" {
            return Err(AdapterError::Config(format!(
                "contract {} is not trading (status {})",
                wanted.contract_id, symbol.status
            )));
        }
        if !symbol.base_asset.is_empty() && !symbol.base_asset.eq_ignore_ascii_case(&wanted.ticker) {
            warn!(ticker = %wanted.ticker, base_asset = %symbol.base_asset, "Ticker does not match contract base asset");
        }
        if let Some(tick) = symbol.tick_size() {
            if !tick.is_zero() && !(wanted.tick_size % tick).is_zero() {
                return Err(AdapterError::Config(format!(
                    "tick_size {} is not a multiple of venue tick {tick}",
                    wanted.tick_size
                )));
            }
        }
        if let Some(min_qty) = symbol.min_qty() {
            if wanted.quantity < min_qty {
                return Err(AdapterError::Config(format!(
                    "quantity {} is below venue minimum {min_qty}",
                    wanted.quantity
                )));
            }
        }

        self.contract_checked.store(true, Ordering::SeqCst);
        info!(contract = %wanted.contract_id, "Contract attributes verified");
        Ok(())
    }

    async fn book(&self, contract: &str) -> AdapterResult<Bbo> {
        let t = self.client.book_ticker(contract).await?;
        Ok(Bbo {
            best_bid: t.bid_price,
            best_ask: t.ask_price,
        })
    }

    /// Submit a post-only order, re-pricing via `price_for` while the
    /// venue keeps expiring it on arrival.
    async fn place_post_only<F>(
        &self,
        contract: &str,
        side: Side,
        quantity: Decimal,
        price_for: F,
    ) -> AdapterResult<OrderResult>
    where
        F: Fn(Bbo) -> Decimal + Send + Sync,
    {
        for attempt in 1..=POST_ONLY_ATTEMPTS {
            let bbo = self.book(contract).await?;
            if !bbo.is_valid() {
                return Ok(OrderResult::failure("Invalid bid/ask prices"));
            }
            let price = round_to_tick(price_for(bbo), self.contract.tick_size);
            let client_id = Uuid::new_v4().simple().to_string();

            let response = match self
                .client
                .place_limit_order(contract, side, quantity, price, &client_id)
                .await
            {
                Ok(r) => r,
                Err(e) => return rejection_or_error(e),
            };

            let status = OrderStatus::from_venue_str(&response.status);
            let result = OrderResult {
                success: true,
                order_id: Some(response.order_id.to_string()),
                side: Some(side),
                size: Some(response.orig_qty),
                price: Some(response.price),
                status,
                filled_size: Some(response.executed_qty),
                error_message: None,
            };

            if status != Some(OrderStatus::Expired) {
                return Ok(result);
            }

            debug!(attempt, %price, side = %side, order_id = ?result.order_id, "Post-only order expired on arrival, re-pricing");
        }

        warn!(attempts = POST_ONLY_ATTEMPTS, side = %side, "Post-only order expired on every attempt");
        Ok(OrderResult::failure(format!(
            "post-only order expired on all {POST_ONLY_ATTEMPTS} attempts"
        )))
    }

    async fn stop_stream(&self) {
        let handle = self.stream.lock().await.take();
        if let Some(StreamHandle { stop_tx, task }) = handle {
            let _ = stop_tx.send(());
            if tokio::time::timeout(STREAM_STOP_TIMEOUT, task).await.is_err() {
                warn!("User stream did not stop in time");
            }
        }
    }
}

/// Venue refusals specific to the request become unsuccessful results;
/// everything else propagates.
fn rejection_or_error(e: ApiError) -> AdapterResult<OrderResult> {
    match e.to_adapter() {
        AdapterError::Rejected(msg) => Ok(OrderResult::failure(msg)),
        other => Err(other),
    }
}

#[async_trait]
impl ExchangeAdapter for AsterExchange {
    fn name(&self) -> &'static str {
        "aster"
    }

    #[instrument(skip(self), fields(venue = "aster"))]
    async fn connect(&self) -> AdapterResult<()> {
        let mut guard = self.stream.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.task.is_finished() && self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
        if let Some(stale) = guard.take() {
            stale.task.abort();
        }

        self.check_contract().await?;

        let listen_key = self.client.create_listen_key().await?.listen_key;
        let ws = user_stream::open(&self.ws_url, &listen_key)
            .await
            .map_err(|e| AdapterError::Transient(format!("{e:#}")))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let stream = UserStream::new(
            Arc::clone(&self.client),
            self.events_tx.clone(),
            Arc::clone(&self.connected),
            self.contract.contract_id.clone(),
        );
        self.connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(stream.run(ws, stop_rx));
        *guard = Some(StreamHandle { stop_tx, task });

        info!("Connected to Aster user stream");
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.stop_stream().await;
        self.connected.store(false, Ordering::SeqCst);
        if self.client.has_credentials() {
            if let Err(e) = self.client.close_listen_key().await {
                debug!(error = %e, "Listen key close failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), fields(venue = "aster"))]
    async fn place_open_order(
        &self,
        contract: &str,
        quantity: Decimal,
        direction: Direction,
    ) -> AdapterResult<OrderResult> {
        let tick = self.contract.tick_size;
        self.place_post_only(contract, direction.open_side(), quantity, |bbo| {
            open_order_price(bbo.best_bid, bbo.best_ask, direction, tick)
        })
        .await
    }

    #[instrument(skip(self), fields(venue = "aster"))]
    async fn place_close_order(
        &self,
        contract: &str,
        quantity: Decimal,
        price: Decimal,
        side: Side,
    ) -> AdapterResult<OrderResult> {
        let tick = self.contract.tick_size;
        self.place_post_only(contract, side, quantity, |bbo| {
            maker_close_price(price, side, bbo.best_bid, bbo.best_ask, tick)
        })
        .await
    }

    #[instrument(skip(self), fields(venue = "aster"))]
    async fn cancel_order(&self, order_id: &str) -> AdapterResult<OrderResult> {
        let contract = self.contract.contract_id.as_str();
        match self.client.cancel_order(contract, order_id).await {
            Ok(r) => Ok(OrderResult {
                success: true,
                order_id: Some(r.order_id.to_string()),
                side: Side::parse(&r.side),
                size: Some(r.orig_qty),
                price: Some(r.price),
                status: OrderStatus::from_venue_str(&r.status).or(Some(OrderStatus::Cancelled)),
                filled_size: Some(r.executed_qty),
                error_message: None,
            }),
            Err(e) if e.is_unknown_order() => {
                // Already gone: report what the venue holds now.
                match self.get_order_info(order_id).await? {
                    Some(info) => Ok(OrderResult {
                        success: false,
                        order_id: Some(info.order_id),
                        side: Some(info.side),
                        size: Some(info.size),
                        price: Some(info.price),
                        status: Some(info.status),
                        filled_size: Some(info.filled_size),
                        error_message: Some(e.to_string()),
                    }),
                    None => Ok(OrderResult::failure(e.to_string())),
                }
            }
            Err(e) => rejection_or_error(e),
        }
    }

    async fn get_order_info(&self, order_id: &str) -> AdapterResult<Option<OrderInfo>> {
        match self.client.query_order(&self.contract.contract_id, order_id).await {
            Ok(r) => Ok(r.into_order_info()),
            Err(e) if e.is_unknown_order() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_active_orders(&self, contract: &str) -> AdapterResult<Vec<OrderInfo>> {
        let orders = self.client.open_orders(contract).await?;
        Ok(orders
            .into_iter()
            .filter_map(types::OrderResponse::into_order_info)
            .filter(|o| !o.status.is_terminal())
            .collect())
    }

    async fn get_account_positions(&self) -> AdapterResult<HashMap<String, PositionSnapshot>> {
        let positions = self.client.position_risk(&self.contract.contract_id).await?;
        Ok(positions
            .into_iter()
            .map(|p| (p.symbol.clone(), PositionSnapshot::from(p)))
            .collect())
    }

    async fn fetch_bbo(&self, contract: &str) -> AdapterResult<Bbo> {
        self.book(contract).await
    }

    fn subscribe_order_events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }
}
