//! Strategy Controller - Open/Close Cycle Scheduler
//!
//! Single-owner scheduling loop driving one venue/contract/account:
//! 1. Drains push events into the ledger
//! 2. Reconnects and resynchronizes after a push-stream loss
//! 3. Evaluates the price gate against the current touch
//! 4. Places a new open order when count, wait-time and grid allow
//! 5. Places take-profit closes for filled opens
//! 6. Cancels open orders past their timeout
//!
//! Ticks on a fixed cadence and on push-event arrival. One cycle runs
//! to completion before the next begins; independent cancels and polls
//! inside a cycle run concurrently and are all reconciled before the
//! cycle ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{GridPolicy, StrategyConfig};
use crate::domain::grid::GridSpacingGuard;
use crate::domain::order::{LocalOrderId, OrderRole, OrderStatus, OrderUpdate, UpdateSource, VenueOrderId};
use crate::domain::price_gate::{GateMode, PriceGate};
use crate::domain::pricing::{adaptive_wait, is_profitable, open_order_price, take_profit_price};
use crate::domain::timeout::TimeoutSupervisor;
use crate::ports::audit::{TransactionLog, TransactionRecord};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::exchange::{AdapterError, AdapterEvent, Bbo, ExchangeAdapter, OrderInfo, OrderResult};
use crate::ports::telemetry::{CycleObserver, NoopObserver};

use super::error::ControllerError;
use super::ledger::{CloseRequest, OrderLedger, ReconcileOutcome};

/// How a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  /// External shutdown signal.
  Shutdown,
  /// Price gate reached the stop threshold.
  StopPriceReached,
}

impl RunOutcome {
  /// Process exit code for this outcome.
  pub const fn exit_code(self) -> i32 {
    match self {
      Self::Shutdown => 0,
      Self::StopPriceReached => 2,
    }
  }
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  Continue,
  StopPriceReached,
  Shutdown,
}

/// Process-scoped strategy state. Never persisted.
#[derive(Debug)]
struct StrategyState {
  /// Most recent successful open placement.
  last_open_time: Option<DateTime<Utc>>,
  /// Gate mode from the latest price evaluation.
  gate_mode: GateMode,
  /// Push stream lost; call `connect` before anything else.
  needs_reconnect: bool,
  /// Ledger may have missed events; poll before placing.
  needs_resync: bool,
  /// First resync completed.
  initial_sync_done: bool,
  last_resync: Option<DateTime<Utc>>,
  last_status_log: Option<DateTime<Utc>>,
  /// Active close count seen by the previous cycle.
  last_close_count: usize,
  /// Adaptive cooldown cleared by a drop in active closes.
  cooldown_reset: bool,
  /// Push channel closed by the adapter.
  events_closed: bool,
  /// Shutdown observed outside the select loop.
  shutdown: bool,
}

impl StrategyState {
  const fn new() -> Self {
    Self {
      last_open_time: None,
      gate_mode: GateMode::Running,
      needs_reconnect: false,
      needs_resync: true,
      initial_sync_done: false,
      last_resync: None,
      last_status_log: None,
      last_close_count: 0,
      cooldown_reset: false,
      events_closed: false,
      shutdown: false,
    }
  }
}

/// Open/close cycle controller for one venue/contract/account.
pub struct StrategyController<E: ExchangeAdapter> {
  /// Venue adapter.
  exchange: Arc<E>,
  /// Immutable strategy parameters.
  config: StrategyConfig,
  /// Authoritative order state, owned by this task.
  ledger: OrderLedger,
  grid: GridSpacingGuard,
  gate: PriceGate,
  supervisor: TimeoutSupervisor,
  /// Terminal order archive.
  audit: Arc<dyn TransactionLog>,
  clock: Arc<dyn Clock>,
  observer: Arc<dyn CycleObserver>,
  /// Push-event receiver.
  events: broadcast::Receiver<AdapterEvent>,
  /// Shutdown signal receiver.
  shutdown_rx: broadcast::Receiver<()>,
  state: StrategyState,
}

impl<E: ExchangeAdapter> StrategyController<E> {
  /// Create a controller. Subscribes to push events immediately so
  /// nothing emitted during `connect` is lost.
  pub fn new(
    exchange: Arc<E>,
    config: StrategyConfig,
    audit: Arc<dyn TransactionLog>,
    shutdown_rx: broadcast::Receiver<()>,
  ) -> Self {
    let grid = GridSpacingGuard::new(config.grid_step, config.direction);
    let gate = PriceGate::new(config.direction, config.stop_price, config.pause_price);
    let supervisor = TimeoutSupervisor::new(config.order_timeout());
    let events = exchange.subscribe_order_events();

    Self {
      exchange,
      config,
      ledger: OrderLedger::new(),
      grid,
      gate,
      supervisor,
      audit,
      clock: Arc::new(SystemClock),
      observer: Arc::new(NoopObserver),
      events,
      shutdown_rx,
      state: StrategyState::new(),
    }
  }

  /// Replace the time source.
  #[must_use]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Attach a metrics / readiness observer.
  #[must_use]
  pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
    self.observer = observer;
    self
  }

  pub const fn ledger(&self) -> &OrderLedger {
    &self.ledger
  }

  pub const fn gate_mode(&self) -> GateMode {
    self.state.gate_mode
  }

  /// Whether a full resync is still required before placement.
  pub const fn needs_resync(&self) -> bool {
    self.state.needs_resync
  }

  // ────────────────────────────────────────────
  // Run loop
  // ────────────────────────────────────────────

  /// Run until shutdown, stop price or a fatal adapter error.
  #[instrument(skip(self), name = "strategy_loop", fields(contract = %self.config.contract_id, venue = self.exchange.name()))]
  pub async fn run(&mut self) -> Result<RunOutcome, ControllerError> {
    info!(
      direction = %self.config.direction,
      quantity = %self.config.quantity,
      take_profit = %self.config.take_profit,
      max_orders = self.config.max_orders,
      wait_time_secs = self.config.wait_time_secs,
      grid_step = %self.config.grid_step,
      stop_price = %self.config.stop_price,
      pause_price = %self.config.pause_price,
      "Starting strategy controller"
    );

    let result = self.run_inner().await;

    if let Err(e) = self.exchange.disconnect().await {
      warn!(error = %e, "Disconnect failed");
    }
    self.observer.set_ready(false);

    match &result {
      Ok(outcome) => info!(
        outcome = ?outcome,
        active_orders = self.ledger.active_count(),
        resting_closes = self.ledger.active_close_count(),
        "Strategy controller stopped"
      ),
      Err(e) => error!(error = %e, "Strategy controller halted"),
    }
    result
  }

  async fn run_inner(&mut self) -> Result<RunOutcome, ControllerError> {
    if let Err(e) = self.exchange.connect().await {
      self.handle_adapter_error("connect", e)?;
      self.state.needs_reconnect = true;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(self.config.cycle_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      let run_cycle = tokio::select! {
        biased;

        _ = self.shutdown_rx.recv() => {
          info!("Shutdown signal received, stopping controller");
          self.state.shutdown = true;
          false
        }
        event = self.events.recv(), if !self.state.events_closed => {
          self.on_event(event);
          self.ledger.has_pending_closes() || self.state.needs_reconnect
        }
        _ = ticker.tick() => true,
      };

      if self.state.shutdown {
        self.archive_terminal(true).await?;
        return Ok(RunOutcome::Shutdown);
      }
      if !run_cycle {
        continue;
      }

      match self.run_cycle().await? {
        CycleOutcome::Continue => {}
        CycleOutcome::Shutdown => {
          self.archive_terminal(true).await?;
          return Ok(RunOutcome::Shutdown);
        }
        CycleOutcome::StopPriceReached => {
          self.drain_on_stop().await?;
          self.archive_terminal(true).await?;
          return Ok(RunOutcome::StopPriceReached);
        }
      }
    }
  }

  /// Execute one scheduler cycle.
  #[instrument(skip(self), level = "debug")]
  pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
    let started = Instant::now();

    if self.stop_requested() {
      return Ok(CycleOutcome::Shutdown);
    }
    self.drain_events();

    if self.state.needs_reconnect {
      self.reconnect().await?;
    }

    let now = self.clock.now();
    let resync_due = self
      .state
      .last_resync
      .is_none_or(|t| now - t >= self.config.resync_interval());
    if (self.state.needs_resync || resync_due) && !self.stop_requested() {
      self.resync().await?;
    }

    // Price gate
    if self.stop_requested() {
      return Ok(CycleOutcome::Shutdown);
    }
    let bbo = self.fetch_bbo().await?;
    if let Some(bbo) = bbo {
      let mode = self.gate.evaluate(bbo.reference(self.config.direction));
      if mode != self.state.gate_mode {
        info!(from = %self.state.gate_mode, to = %mode, price = %bbo.reference(self.config.direction), "Price gate transition");
      }
      self.state.gate_mode = mode;
      self.observer.gate_mode(mode);
      if mode == GateMode::Stopped {
        return Ok(CycleOutcome::StopPriceReached);
      }
    }

    let synced = !self.state.needs_resync && !self.state.needs_reconnect;
    if synced {
      // Step 3: new open order
      if let Some(bbo) = bbo {
        if self.state.gate_mode == GateMode::Running && !self.stop_requested() {
          self.maybe_place_open(bbo).await?;
        }
      }
      // Step 4: close follow-through, also while paused
      if !self.stop_requested() {
        self.place_pending_closes().await?;
      }
    } else {
      debug!(
        needs_reconnect = self.state.needs_reconnect,
        needs_resync = self.state.needs_resync,
        "Placement suspended until resynchronized"
      );
    }

    // Step 5: timeouts
    if !self.stop_requested() {
      self.cancel_expired().await?;
    }

    self.drain_events();
    self.archive_terminal(false).await?;
    self.log_positions().await?;

    let open = self.ledger.active_count() - self.ledger.active_close_count();
    self.observer.active_orders(open, self.ledger.active_close_count());
    self.observer.cycle_latency(started.elapsed().as_secs_f64());

    Ok(CycleOutcome::Continue)
  }

  // ────────────────────────────────────────────
  // Events and connectivity
  // ────────────────────────────────────────────

  fn on_event(&mut self, event: Result<AdapterEvent, RecvError>) {
    match event {
      Ok(AdapterEvent::Order(info)) => self.reconcile_info(&info, UpdateSource::Push),
      Ok(AdapterEvent::Disconnected) => self.mark_disconnected(),
      Err(RecvError::Lagged(missed)) => {
        warn!(missed, "Push events dropped, resync required");
        self.state.needs_resync = true;
      }
      Err(RecvError::Closed) => {
        warn!("Push channel closed by adapter");
        self.state.events_closed = true;
        self.mark_disconnected();
      }
    }
  }

  /// Apply every queued push event.
  fn drain_events(&mut self) {
    loop {
      match self.events.try_recv() {
        Ok(event) => self.on_event(Ok(event)),
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Lagged(missed)) => self.on_event(Err(RecvError::Lagged(missed))),
        Err(TryRecvError::Closed) => {
          if !self.state.events_closed {
            self.on_event(Err(RecvError::Closed));
          }
          break;
        }
      }
    }
  }

  fn mark_disconnected(&mut self) {
    if !self.state.needs_reconnect {
      warn!("Push stream disconnected, ledger kept; reconnect and resync pending");
    }
    self.state.needs_reconnect = true;
    self.state.needs_resync = true;
    self.observer.set_ready(false);
  }

  async fn reconnect(&mut self) -> Result<(), ControllerError> {
    match self.exchange.connect().await {
      Ok(()) => {
        info!("Adapter reconnected");
        if self.state.events_closed {
          self.events = self.exchange.subscribe_order_events();
          self.state.events_closed = false;
        }
        self.state.needs_reconnect = false;
        self.state.needs_resync = true;
        Ok(())
      }
      Err(e) => self.handle_adapter_error("connect", e),
    }
  }

  fn stop_requested(&mut self) -> bool {
    if !self.state.shutdown {
      match self.shutdown_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Closed | TryRecvError::Lagged(_)) => {
          info!("Shutdown signal received mid-cycle");
          self.state.shutdown = true;
        }
        Err(TryRecvError::Empty) => {}
      }
    }
    self.state.shutdown
  }

  /// Classify an adapter failure: fatal ones halt the run.
  fn handle_adapter_error(&mut self, op: &'static str, e: AdapterError) -> Result<(), ControllerError> {
    self.observer.adapter_error(e.kind());
    if e.is_fatal() {
      error!(op, error = %e, "Fatal adapter error");
      return Err(ControllerError::Fatal(e));
    }
    warn!(op, error = %e, "Adapter call failed, retrying next cycle");
    if e == AdapterError::NotConnected {
      self.mark_disconnected();
    }
    Ok(())
  }

  /// A placement that timed out may still rest on the venue; hold new
  /// placements until a resync has looked for it.
  fn require_resync_if_ambiguous(&mut self, e: &AdapterError) {
    if e.is_ambiguous() {
      info!(error = %e, "Placement outcome unknown, resync before placing again");
      self.state.needs_resync = true;
    }
  }

  // ────────────────────────────────────────────
  // Reconciliation plumbing
  // ────────────────────────────────────────────

  fn reconcile(&mut self, update: OrderUpdate) -> ReconcileOutcome {
    let outcome = self.ledger.reconcile(update);
    if matches!(outcome, ReconcileOutcome::Stale { .. }) {
      self.observer.stale_update();
    }
    outcome
  }

  fn reconcile_info(&mut self, info: &OrderInfo, source: UpdateSource) {
    let mut update = OrderUpdate::venue(info.order_id.clone(), info.status, source)
      .with_filled(info.filled_size)
      .with_price(info.price);
    update.event_time = info.event_time;
    if self.reconcile(update) == ReconcileOutcome::Unknown {
      debug!(order_id = %info.order_id, status = %info.status, %source, "Update for untracked order");
    }
  }

  /// Feed a placement result back for `local_id`.
  ///
  /// Returns `true` only when the order is live or filled on the venue;
  /// an order that ended on arrival counts as a failed placement.
  fn reconcile_placement(&mut self, local_id: LocalOrderId, result: &OrderResult) -> bool {
    match (&result.order_id, result.success) {
      (Some(vid), true) => {
        let status = result.status.unwrap_or(OrderStatus::Acknowledged);
        let mut update =
          OrderUpdate::local(local_id, status, UpdateSource::Placement).with_venue_id(vid.clone());
        update.filled_size = result.filled_size;
        update.price = result.price;
        self.reconcile(update);
        if status.is_abort() {
          warn!(local_id = %local_id, order_id = %vid, status = %status, "Order ended on arrival");
          return false;
        }
        true
      }
      (None, true) => {
        warn!(local_id = %local_id, "Venue accepted order without an id; treating as rejected");
        self.reconcile(OrderUpdate::local(local_id, OrderStatus::Rejected, UpdateSource::Placement));
        self.state.needs_resync = true;
        false
      }
      (_, false) => {
        self.reconcile(OrderUpdate::local(local_id, OrderStatus::Rejected, UpdateSource::Placement));
        false
      }
    }
  }

  // ────────────────────────────────────────────
  // Resynchronization
  // ────────────────────────────────────────────

  /// Full poll-based resync against the venue's active order set.
  #[instrument(skip(self), level = "debug")]
  async fn resync(&mut self) -> Result<(), ControllerError> {
    let active = match self.exchange.get_active_orders(&self.config.contract_id).await {
      Ok(active) => active,
      Err(e) => return self.handle_adapter_error("get_active_orders", e),
    };

    let now = self.clock.now();
    let close_side = self.config.direction.close_side();
    let mut seen = HashSet::with_capacity(active.len());

    // Aborts recorded before this resync get one confirming poll.
    let settling = self.ledger.settling();

    for info in &active {
      seen.insert(info.order_id.clone());
      if self.ledger.contains_venue_id(&info.order_id) {
        self.reconcile_info(info, UpdateSource::Poll);
      } else if self.ledger.is_retired(&info.order_id) {
        debug!(order_id = %info.order_id, "Archived order still listed active");
      } else {
        // Left by a previous run, or placed by a call that timed out.
        let role = if info.side == close_side {
          OrderRole::Close
        } else {
          OrderRole::Open
        };
        if self.state.initial_sync_done {
          warn!(order_id = %info.order_id, side = %info.side, price = %info.price, role = %role, "Adopting untracked active order");
        }
        self.ledger.adopt_resting(info, role, now);
      }
    }

    // Tracked live orders the venue no longer lists ended somehow; ask.
    let mut to_poll: Vec<VenueOrderId> = self
      .ledger
      .active_venue_ids()
      .into_iter()
      .filter(|vid| !seen.contains(vid))
      .collect();
    to_poll.extend(settling.iter().map(|(_, vid)| vid.clone()));
    if !self.poll_orders(to_poll).await? {
      return Ok(());
    }
    let settled: Vec<LocalOrderId> = settling.into_iter().map(|(id, _)| id).collect();
    self.ledger.confirm_settled(&settled);

    self.ledger.clear_orphans();
    if !self.state.initial_sync_done {
      info!(
        adopted = self.ledger.len(),
        closes = self.ledger.active_close_count(),
        "Initial synchronization complete"
      );
    }
    self.state.initial_sync_done = true;
    self.state.needs_resync = false;
    self.state.last_resync = Some(now);
    self.observer.set_ready(!self.state.needs_reconnect);
    Ok(())
  }

  /// Query each venue id concurrently and reconcile.
  ///
  /// Returns `false` when any query failed transiently.
  async fn poll_orders(&mut self, ids: Vec<VenueOrderId>) -> Result<bool, ControllerError> {
    if ids.is_empty() {
      return Ok(true);
    }
    let exchange = Arc::clone(&self.exchange);
    let results = join_all(ids.iter().map(|vid| exchange.get_order_info(vid))).await;

    let mut complete = true;
    let mut fatal = None;
    for (vid, result) in ids.into_iter().zip(results) {
      match result {
        Ok(Some(info)) => self.reconcile_info(&info, UpdateSource::Poll),
        Ok(None) => {
          info!(order_id = %vid, "Venue has no record of order, marking expired");
          self.reconcile(OrderUpdate::venue(vid, OrderStatus::Expired, UpdateSource::Poll));
        }
        Err(e) => {
          complete = false;
          if let Err(f) = self.handle_adapter_error("get_order_info", e) {
            fatal.get_or_insert(f);
          }
        }
      }
    }
    fatal.map_or(Ok(complete), Err)
  }

  // ────────────────────────────────────────────
  // Step 3: open placement
  // ────────────────────────────────────────────

  async fn fetch_bbo(&mut self) -> Result<Option<Bbo>, ControllerError> {
    match self.exchange.fetch_bbo(&self.config.contract_id).await {
      Ok(bbo) if bbo.is_valid() => Ok(Some(bbo)),
      Ok(bbo) => {
        warn!(bid = %bbo.best_bid, ask = %bbo.best_ask, "Invalid best bid/ask, skipping price-dependent steps");
        Ok(None)
      }
      Err(e) => self.handle_adapter_error("fetch_bbo", e).map(|()| None),
    }
  }

  fn effective_wait(&mut self) -> TimeDelta {
    let wait = self.config.wait_time();
    if !self.config.adaptive_cooldown {
      return wait;
    }
    let closes = self.ledger.active_close_count();
    if closes < self.state.last_close_count {
      self.state.cooldown_reset = true;
    }
    self.state.last_close_count = closes;
    if self.state.cooldown_reset {
      TimeDelta::zero()
    } else {
      adaptive_wait(wait, closes, self.config.max_orders)
    }
  }

  #[instrument(skip(self, bbo), level = "debug")]
  async fn maybe_place_open(&mut self, bbo: Bbo) -> Result<(), ControllerError> {
    let cfg = &self.config;
    let active = self.ledger.active_count();
    if active >= cfg.max_orders {
      debug!(active, max_orders = cfg.max_orders, "Order ceiling reached, no new open");
      self.observer.deferral("max_orders");
      return Ok(());
    }

    let now = self.clock.now();
    let wait = self.effective_wait();
    if let Some(last) = self.state.last_open_time {
      if now - last < wait {
        return Ok(());
      }
    }

    let cfg = &self.config;
    if self.grid.is_enabled() {
      let projected = take_profit_price(
        bbo.reference(cfg.direction),
        cfg.take_profit,
        cfg.direction,
        cfg.tick_size,
      );
      if !self.grid.accepts(projected, &self.ledger.active_close_prices()) {
        info!(projected_close = %projected, "Projected close violates grid spacing, open deferred");
        self.observer.deferral("grid");
        return Ok(());
      }
    }

    let side = cfg.direction.open_side();
    let est_price = open_order_price(bbo.best_bid, bbo.best_ask, cfg.direction, cfg.tick_size);
    let contract = cfg.contract_id.clone();
    let quantity = cfg.quantity;
    let direction = cfg.direction;

    let local_id = self.ledger.register_open(&contract, side, quantity, est_price, now);
    let result = self.exchange.place_open_order(&contract, quantity, direction).await;

    match result {
      Ok(r) if self.reconcile_placement(local_id, &r) => {
        self.state.last_open_time = Some(now);
        self.state.cooldown_reset = false;
        self.observer.order_placed(OrderRole::Open);
        info!(
          local_id = %local_id,
          order_id = ?r.order_id,
          price = ?r.price,
          quantity = %quantity,
          side = %side,
          "Open order placed"
        );
        Ok(())
      }
      Ok(r) => {
        warn!(local_id = %local_id, reason = ?r.error_message, "Open order rejected, retrying next cycle");
        Ok(())
      }
      Err(e) => {
        self.reconcile(OrderUpdate::local(local_id, OrderStatus::Rejected, UpdateSource::Placement));
        self.require_resync_if_ambiguous(&e);
        self.handle_adapter_error("place_open_order", e)
      }
    }
  }

  // ────────────────────────────────────────────
  // Step 4: close follow-through
  // ────────────────────────────────────────────

  /// Close price for `req`, or `None` when the grid guard defers it.
  fn close_price_for(&self, req: &CloseRequest) -> Option<Decimal> {
    let cfg = &self.config;
    let target = take_profit_price(req.open_price, cfg.take_profit, cfg.direction, cfg.tick_size);
    let active = self.ledger.active_close_prices();
    if self.grid.accepts(target, &active) {
      return Some(target);
    }
    match cfg.grid_policy {
      GridPolicy::Defer => None,
      GridPolicy::Adjust => self
        .grid
        .nearest_permitted(&active, cfg.tick_size)
        .filter(|p| is_profitable(req.open_price, *p, cfg.direction)),
    }
  }

  async fn place_pending_closes(&mut self) -> Result<(), ControllerError> {
    let requests = self.ledger.take_needs_close();
    let mut remaining = requests.into_iter();

    while let Some(req) = remaining.next() {
      let Some(price) = self.close_price_for(&req) else {
        info!(
          open_id = %req.open_id,
          open_price = %req.open_price,
          "Close price violates grid spacing, close deferred"
        );
        self.observer.deferral("grid");
        self.ledger.requeue_close(req.open_id);
        continue;
      };

      let side = req.open_side.opposite();
      let now = self.clock.now();
      let close_id = self.ledger.register_close(req.open_id, &req.contract, side, req.quantity, price, now);
      let result = self
        .exchange
        .place_close_order(&req.contract, req.quantity, price, side)
        .await;

      match result {
        Ok(r) if self.reconcile_placement(close_id, &r) => {
          self.observer.order_placed(OrderRole::Close);
          info!(
            open_id = %req.open_id,
            close_id = %close_id,
            order_id = ?r.order_id,
            price = %price,
            quantity = %req.quantity,
            "Close order placed"
          );
        }
        Ok(r) => {
          warn!(open_id = %req.open_id, price = %price, reason = ?r.error_message, "Close order rejected, retrying next cycle");
        }
        Err(e) => {
          self.reconcile(OrderUpdate::local(close_id, OrderStatus::Rejected, UpdateSource::Placement));
          self.require_resync_if_ambiguous(&e);
          if let Err(fatal) = self.handle_adapter_error("place_close_order", e) {
            for rest in remaining.by_ref() {
              self.ledger.requeue_close(rest.open_id);
            }
            return Err(fatal);
          }
        }
      }
    }
    Ok(())
  }

  // ────────────────────────────────────────────
  // Step 5: timeouts, and drain on stop
  // ────────────────────────────────────────────

  async fn cancel_expired(&mut self) -> Result<(), ControllerError> {
    let now = self.clock.now();
    let due: Vec<(LocalOrderId, VenueOrderId)> = self
      .supervisor
      .due(self.ledger.active_orders(), now)
      .into_iter()
      .filter_map(|o| o.venue_order_id.clone().map(|vid| (o.local_id, vid)))
      .collect();
    if due.is_empty() {
      return Ok(());
    }
    info!(count = due.len(), "Cancelling open orders past timeout");
    self.cancel_orders(due).await
  }

  /// Cancel concurrently, reconcile every result, then poll the ones
  /// the venue refused to cancel.
  async fn cancel_orders(&mut self, targets: Vec<(LocalOrderId, VenueOrderId)>) -> Result<(), ControllerError> {
    let exchange = Arc::clone(&self.exchange);
    let results = join_all(targets.iter().map(|(_, vid)| exchange.cancel_order(vid))).await;

    let mut to_poll = Vec::new();
    let mut fatal = None;
    for ((local_id, vid), result) in targets.into_iter().zip(results) {
      match result {
        Ok(r) if r.success => {
          // A fill that raced the cancel comes back as Filled here.
          let status = r.status.unwrap_or(OrderStatus::Cancelled);
          let mut update = OrderUpdate::local(local_id, status, UpdateSource::Cancel);
          update.filled_size = r.filled_size;
          self.reconcile(update);
          if !status.is_terminal() {
            to_poll.push(vid);
          }
        }
        Ok(r) => {
          debug!(local_id = %local_id, reason = ?r.error_message, "Cancel refused, polling order");
          to_poll.push(vid);
        }
        Err(e) => {
          if let Err(f) = self.handle_adapter_error("cancel_order", e) {
            fatal.get_or_insert(f);
          }
        }
      }
    }

    let polled = self.poll_orders(to_poll).await;
    match fatal {
      Some(f) => Err(f),
      None => polled.map(|_| ()),
    }
  }

  /// Cancel live open orders; resting closes stay on the venue.
  async fn drain_on_stop(&mut self) -> Result<(), ControllerError> {
    let opens: Vec<(LocalOrderId, VenueOrderId)> = self
      .ledger
      .active_orders()
      .filter(|o| o.role == OrderRole::Open)
      .filter_map(|o| o.venue_order_id.clone().map(|vid| (o.local_id, vid)))
      .collect();
    warn!(
      cancelling = opens.len(),
      resting_closes = self.ledger.active_close_count(),
      "Stop price reached, draining open orders"
    );
    self.cancel_orders(opens).await?;
    self.drain_events();

    let closes: Vec<String> = self
      .ledger
      .active_orders()
      .filter(|o| o.role == OrderRole::Close)
      .map(|o| format!("{}@{}", o.remaining_size, o.price))
      .collect();
    info!(closes = ?closes, "Close orders left resting on venue");
    Ok(())
  }

  // ────────────────────────────────────────────
  // Archival and diagnostics
  // ────────────────────────────────────────────

  /// Archive then evict terminal orders. A failed write keeps the
  /// order in the ledger for the next attempt; on the final pass the
  /// failure is returned.
  async fn archive_terminal(&mut self, final_pass: bool) -> Result<(), ControllerError> {
    if final_pass {
      self.settle_on_exit().await;
    }
    for id in self.ledger.evictable() {
      let Some(order) = self.ledger.get(id) else {
        continue;
      };
      let record = TransactionRecord::from_order(order, self.clock.now());
      if let Err(e) = self.audit.record(&record).await {
        error!(local_id = %id, error = %e, "Failed to archive terminal order");
        if final_pass {
          return Err(ControllerError::Audit(e));
        }
        return Ok(());
      }
      if let Some(order) = self.ledger.evict(id) {
        self.observer.order_terminal(order.role, order.status);
        debug!(local_id = %id, status = %order.status, "Terminal order archived");
      }
    }
    Ok(())
  }

  /// Last look at unconfirmed aborts before the run ends; whatever the
  /// poll shows is what gets archived.
  async fn settle_on_exit(&mut self) {
    let settling = self.ledger.settling();
    if settling.is_empty() {
      return;
    }
    let vids = settling.iter().map(|(_, vid)| vid.clone()).collect();
    if let Err(e) = self.poll_orders(vids).await {
      warn!(error = %e, "Final abort confirmation failed");
    }
    self.drain_events();
    let ids: Vec<LocalOrderId> = settling.into_iter().map(|(id, _)| id).collect();
    self.ledger.confirm_settled(&ids);
  }

  /// Periodic venue position snapshot next to the ledger's view.
  async fn log_positions(&mut self) -> Result<(), ControllerError> {
    let now = self.clock.now();
    if self
      .state
      .last_status_log
      .is_some_and(|t| now - t < self.config.status_log_interval())
    {
      return Ok(());
    }
    self.state.last_status_log = Some(now);

    let positions = match self.exchange.get_account_positions().await {
      Ok(p) => p,
      Err(e) => return self.handle_adapter_error("get_account_positions", e),
    };
    let net = positions
      .get(&self.config.contract_id)
      .map_or(Decimal::ZERO, |p| p.net_size);

    let pending_close: Decimal = self
      .ledger
      .active_orders()
      .filter(|o| o.role == OrderRole::Close)
      .map(|o| o.remaining_size)
      .sum();
    let expected = if self.config.direction.is_long() {
      pending_close
    } else {
      -pending_close
    };

    info!(
      position = %net,
      expected = %expected,
      active_orders = self.ledger.active_count(),
      active_closes = self.ledger.active_close_count(),
      gate = %self.state.gate_mode,
      "Position status"
    );
    if net != expected {
      warn!(position = %net, expected = %expected, "Venue position differs from resting close quantity");
    }
    Ok(())
  }
}
