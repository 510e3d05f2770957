//! Order Ledger - Authoritative Order State
//!
//! In-memory record of every order the controller issued, indexed by
//! local id and by venue id. Placement results, cancellation results,
//! polls and push events all funnel through [`OrderLedger::reconcile`],
//! the only routine that changes an order's status or fill.
//!
//! Status ordering:
//! - `Pending < Acknowledged < PartiallyFilled < Filled`
//! - `Cancelled`/`Rejected`/`Expired` override any live status
//! - Nothing leaves a terminal status, except a `Filled` report that
//!   overrides `Cancelled` when the fill is not later than the cancel
//!
//! An open order aborted by a cancel or a poll stays in the ledger
//! until a later resync confirms the abort, so a fill reported after
//! the cancel still finds its order and gets a close.
//!
//! The ledger is owned by a single controller task; exclusive `&mut`
//! access serializes reconciliation per order id.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::order::{
  LocalOrderId, Order, OrderKey, OrderRole, OrderStatus, OrderUpdate, Side, UpdateSource,
  VenueOrderId,
};
use crate::ports::exchange::OrderInfo;

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  /// Update adopted.
  Adopted {
    local_id: LocalOrderId,
    from: OrderStatus,
    to: OrderStatus,
  },
  /// Update older than (or equal to) the ledger's view; discarded.
  Stale {
    local_id: LocalOrderId,
    current: OrderStatus,
  },
  /// No order matches the update's key. Venue-keyed updates are kept
  /// aside and replayed if the venue id is bound later.
  Unknown,
}

impl ReconcileOutcome {
  pub const fn is_adopted(&self) -> bool {
    matches!(self, Self::Adopted { .. })
  }
}

/// A filled (or partially filled then aborted) open order awaiting its close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
  /// The open order being closed.
  pub open_id: LocalOrderId,
  pub contract: String,
  /// Side of the open order; the close trades the opposite side.
  pub open_side: Side,
  /// Open order's limit price, the base for the take-profit target.
  pub open_price: Decimal,
  /// Quantity not yet covered by a close order.
  pub quantity: Decimal,
}

/// Maximum number of unmatched venue updates kept for replay.
const MAX_ORPHANS: usize = 256;
/// Venue ids of evicted orders remembered to reject late updates and adoption.
const MAX_RETIRED: usize = 1024;

/// Authoritative order store for one venue/account run.
#[derive(Debug, Default)]
pub struct OrderLedger {
  /// Orders by local id.
  orders: HashMap<LocalOrderId, Order>,
  /// Venue id index for event correlation.
  by_venue: HashMap<VenueOrderId, LocalOrderId>,
  /// Open orders with filled quantity not yet covered by a close.
  needs_close: BTreeSet<LocalOrderId>,
  /// Quantity already covered by close orders, per open order.
  close_covered: HashMap<LocalOrderId, Decimal>,
  /// Venue-keyed updates that arrived before their venue id was bound.
  orphans: HashMap<VenueOrderId, OrderUpdate>,
  /// Aborted open orders held until a poll confirms the abort.
  settling: BTreeSet<LocalOrderId>,
  /// Cover given back by aborted closes, per close order.
  released: HashMap<LocalOrderId, Decimal>,
  /// Evicted venue ids, oldest first.
  retired: VecDeque<VenueOrderId>,
  retired_index: HashSet<VenueOrderId>,
  /// Next local id.
  next_id: u64,
}

impl OrderLedger {
  /// Create an empty ledger.
  pub fn new() -> Self {
    Self::default()
  }

  // ── Registration ──

  /// Record a new open order at the instant its placement is issued.
  pub fn register_open(
    &mut self,
    contract: &str,
    side: Side,
    size: Decimal,
    price: Decimal,
    now: DateTime<Utc>,
  ) -> LocalOrderId {
    let id = self.allocate();
    let order = Order::new_pending(id, contract.to_string(), side, OrderRole::Open, size, price, now);
    self.orders.insert(id, order);
    id
  }

  /// Record a new close order linked to `open_id` and mark its quantity covered.
  pub fn register_close(
    &mut self,
    open_id: LocalOrderId,
    contract: &str,
    side: Side,
    size: Decimal,
    price: Decimal,
    now: DateTime<Utc>,
  ) -> LocalOrderId {
    let id = self.allocate();
    let mut order =
      Order::new_pending(id, contract.to_string(), side, OrderRole::Close, size, price, now);
    order.paired_order = Some(open_id);
    self.orders.insert(id, order);

    if let Some(open) = self.orders.get_mut(&open_id) {
      open.paired_order.get_or_insert(id);
    }
    *self.close_covered.entry(open_id).or_default() += size;
    id
  }

  /// Adopt a resting venue order the ledger does not know.
  ///
  /// Returns the existing local id when the venue id is already tracked.
  pub fn adopt_resting(&mut self, info: &OrderInfo, role: OrderRole, now: DateTime<Utc>) -> LocalOrderId {
    if let Some(id) = self.by_venue.get(&info.order_id) {
      return *id;
    }
    let id = self.allocate();
    let mut order = Order::new_pending(
      id,
      info.contract.clone(),
      info.side,
      role,
      info.size,
      info.price,
      now,
    );
    order.venue_order_id = Some(info.order_id.clone());
    order.status = info.status;
    order.status_time = info.event_time;
    apply_fill(&mut order, Some(info.filled_size));
    self.by_venue.insert(info.order_id.clone(), id);
    self.orders.insert(id, order);
    info!(local_id = %id, order_id = %info.order_id, role = %role, price = %info.price, "Adopted resting venue order");
    id
  }

  fn allocate(&mut self) -> LocalOrderId {
    self.next_id += 1;
    LocalOrderId(self.next_id)
  }

  // ── Reconciliation ──

  /// Merge one observed order state into the ledger.
  ///
  /// Idempotent: re-applying the same or an older update is a no-op.
  pub fn reconcile(&mut self, update: OrderUpdate) -> ReconcileOutcome {
    let resolved = match &update.key {
      OrderKey::Local(id) => self.orders.contains_key(id).then_some(*id),
      OrderKey::Venue(vid) => self.by_venue.get(vid).copied(),
    };
    let Some(local_id) = resolved else {
      if let OrderKey::Venue(vid) = update.key.clone() {
        if self.is_retired(&vid) {
          warn!(order_id = %vid, status = %update.status, source = %update.source, "Update for archived order ignored");
        } else {
          self.stash_orphan(vid, update);
        }
      }
      return ReconcileOutcome::Unknown;
    };

    let outcome = self.apply(local_id, &update);

    // Bind after apply so a newly learned venue id can replay stashed events.
    if let Some(vid) = update.venue_order_id {
      self.bind_venue_id(local_id, vid);
    }
    outcome
  }

  fn apply(&mut self, local_id: LocalOrderId, update: &OrderUpdate) -> ReconcileOutcome {
    let Some(order) = self.orders.get_mut(&local_id) else {
      return ReconcileOutcome::Unknown;
    };
    let from = order.status;

    if !accepts(order, update) {
      debug!(
        local_id = %local_id,
        current = %from,
        reported = %update.status,
        source = %update.source,
        "Stale order update discarded"
      );
      return ReconcileOutcome::Stale {
        local_id,
        current: from,
      };
    }

    order.status = update.status;
    if update.event_time.is_some() || from != update.status {
      order.status_time = update.event_time;
    }
    apply_fill(order, update.filled_size);
    if let Some(price) = update.price.filter(|p| *p > Decimal::ZERO) {
      order.price = price;
    }

    let to = order.status;
    let role = order.role;
    let paired = order.paired_order;
    let requested = order.requested_size;
    let filled = order.filled_size;
    let has_venue_id = order.venue_order_id.is_some() || update.venue_order_id.is_some();

    if from != to {
      info!(
        local_id = %local_id,
        order_id = ?order.venue_order_id,
        role = %role,
        from = %from,
        to = %to,
        filled = %filled,
        source = %update.source,
        "Order status changed"
      );
    }

    match role {
      OrderRole::Open => {
        if to.is_abort() && !from.is_abort() {
          // Placement aborts never rested; cancels and polls can still race a fill.
          if filled < requested && has_venue_id && update.source != UpdateSource::Placement {
            self.settling.insert(local_id);
          }
        } else if to == OrderStatus::Filled {
          self.settling.remove(&local_id);
        }
        self.flag_needs_close(local_id);
      }
      OrderRole::Close => {
        if let Some(open_id) = paired {
          self.update_close_cover(local_id, open_id, from, to, requested - filled, update.source);
        }
      }
    }

    ReconcileOutcome::Adopted { local_id, from, to }
  }

  /// Give back the unfilled part of a close that will never rest, and
  /// take it again if that close later turns out filled.
  ///
  /// A close cancelled on the venue by hand keeps its cover.
  fn update_close_cover(
    &mut self,
    close_id: LocalOrderId,
    open_id: LocalOrderId,
    from: OrderStatus,
    to: OrderStatus,
    unfilled: Decimal,
    source: UpdateSource,
  ) {
    if to.is_abort() && !from.is_abort() {
      let never_rests = matches!(to, OrderStatus::Rejected | OrderStatus::Expired)
        || source == UpdateSource::Placement;
      if never_rests && unfilled > Decimal::ZERO {
        debug!(close_id = %close_id, open_id = %open_id, quantity = %unfilled, status = %to, "Close aborted, cover released");
        self.released.insert(close_id, unfilled);
        self.release_cover(open_id, unfilled);
      }
    } else if from.is_abort() && to == OrderStatus::Filled {
      if let Some(quantity) = self.released.remove(&close_id) {
        warn!(close_id = %close_id, open_id = %open_id, quantity = %quantity, "Aborted close reported filled, cover restored");
        *self.close_covered.entry(open_id).or_default() += quantity;
      }
    }
  }

  fn flag_needs_close(&mut self, open_id: LocalOrderId) {
    if self.uncovered(open_id) > Decimal::ZERO && self.needs_close.insert(open_id) {
      debug!(local_id = %open_id, "Open order needs close");
    }
  }

  fn release_cover(&mut self, open_id: LocalOrderId, quantity: Decimal) {
    if let Some(covered) = self.close_covered.get_mut(&open_id) {
      *covered = (*covered - quantity).max(Decimal::ZERO);
    }
    self.flag_needs_close(open_id);
  }

  /// Filled quantity of an open order not yet covered by closes.
  fn uncovered(&self, open_id: LocalOrderId) -> Decimal {
    let Some(order) = self.orders.get(&open_id) else {
      return Decimal::ZERO;
    };
    let closable = match order.status {
      OrderStatus::Filled => order.filled_size,
      s if s.is_abort() => order.filled_size,
      _ => Decimal::ZERO,
    };
    let covered = self.close_covered.get(&open_id).copied().unwrap_or_default();
    (closable - covered).max(Decimal::ZERO)
  }

  fn bind_venue_id(&mut self, local_id: LocalOrderId, vid: VenueOrderId) {
    let Some(order) = self.orders.get_mut(&local_id) else {
      return;
    };
    if order.venue_order_id.as_deref() == Some(vid.as_str()) {
      return;
    }
    if let Some(previous) = order.venue_order_id.replace(vid.clone()) {
      warn!(local_id = %local_id, previous = %previous, new = %vid, "Venue id rebound");
      self.by_venue.remove(&previous);
    }
    self.by_venue.insert(vid.clone(), local_id);

    if let Some(orphan) = self.orphans.remove(&vid) {
      debug!(local_id = %local_id, order_id = %vid, "Replaying early venue update");
      self.apply(local_id, &orphan);
    }
  }

  fn stash_orphan(&mut self, vid: VenueOrderId, update: OrderUpdate) {
    if self.orphans.len() >= MAX_ORPHANS && !self.orphans.contains_key(&vid) {
      return;
    }
    match self.orphans.get(&vid) {
      Some(kept) if kept.status.rank() > update.status.rank() => {}
      _ => {
        self.orphans.insert(vid, update);
      }
    }
  }

  /// Drop stashed unmatched updates (after a full resync).
  pub fn clear_orphans(&mut self) {
    self.orphans.clear();
  }

  // ── Abort confirmation ──

  /// Aborted open orders whose abort is not yet confirmed by a poll.
  pub fn settling(&self) -> Vec<(LocalOrderId, VenueOrderId)> {
    self
      .settling
      .iter()
      .filter_map(|id| {
        let vid = self.orders.get(id)?.venue_order_id.clone()?;
        Some((*id, vid))
      })
      .collect()
  }

  /// Release aborted open orders for eviction.
  pub fn confirm_settled(&mut self, ids: &[LocalOrderId]) {
    for id in ids {
      if self.settling.remove(id) {
        debug!(local_id = %id, "Abort confirmed");
      }
    }
  }

  /// Whether `vid` belonged to an order already archived and evicted.
  pub fn is_retired(&self, vid: &str) -> bool {
    self.retired_index.contains(vid)
  }

  fn retire(&mut self, vid: VenueOrderId) {
    if !self.retired_index.insert(vid.clone()) {
      return;
    }
    self.retired.push_back(vid);
    if self.retired.len() > MAX_RETIRED {
      if let Some(oldest) = self.retired.pop_front() {
        self.retired_index.remove(&oldest);
      }
    }
  }

  // ── Close follow-through ──

  /// Consume pending needs-close signals.
  ///
  /// Each signal is returned once; use [`OrderLedger::requeue_close`]
  /// when a close could not be placed this cycle.
  pub fn take_needs_close(&mut self) -> Vec<CloseRequest> {
    let ids = std::mem::take(&mut self.needs_close);
    ids
      .into_iter()
      .filter_map(|open_id| {
        let quantity = self.uncovered(open_id);
        let order = self.orders.get(&open_id)?;
        (quantity > Decimal::ZERO).then(|| CloseRequest {
          open_id,
          contract: order.contract.clone(),
          open_side: order.side,
          open_price: order.price,
          quantity,
        })
      })
      .collect()
  }

  /// Re-signal an open order whose close was deferred.
  pub fn requeue_close(&mut self, open_id: LocalOrderId) {
    self.flag_needs_close(open_id);
  }

  pub fn has_pending_closes(&self) -> bool {
    !self.needs_close.is_empty()
  }

  // ── Eviction ──

  /// Terminal orders whose close side effects are complete, ready for
  /// archival and eviction.
  pub fn evictable(&self) -> Vec<LocalOrderId> {
    let mut ids: Vec<LocalOrderId> = self
      .orders
      .values()
      .filter(|o| o.is_terminal())
      .filter(|o| o.role == OrderRole::Close || self.uncovered(o.local_id) == Decimal::ZERO)
      .filter(|o| !self.needs_close.contains(&o.local_id))
      .filter(|o| !self.settling.contains(&o.local_id))
      .map(|o| o.local_id)
      .collect();
    ids.sort_unstable();
    ids
  }

  /// Remove one order. Call only once it has been archived.
  pub fn evict(&mut self, id: LocalOrderId) -> Option<Order> {
    let order = self.orders.remove(&id)?;
    if let Some(vid) = &order.venue_order_id {
      self.by_venue.remove(vid);
      self.retire(vid.clone());
    }
    self.close_covered.remove(&id);
    self.needs_close.remove(&id);
    self.settling.remove(&id);
    self.released.remove(&id);
    Some(order)
  }

  /// Evict every evictable order at once.
  pub fn drain_terminal(&mut self) -> Vec<Order> {
    self
      .evictable()
      .into_iter()
      .filter_map(|id| self.evict(id))
      .collect()
  }

  // ── Queries ──

  pub fn get(&self, id: LocalOrderId) -> Option<&Order> {
    self.orders.get(&id)
  }

  pub fn by_venue_id(&self, vid: &str) -> Option<&Order> {
    self.by_venue.get(vid).and_then(|id| self.orders.get(id))
  }

  pub fn contains_venue_id(&self, vid: &str) -> bool {
    self.by_venue.contains_key(vid)
  }

  /// All tracked orders.
  pub fn orders(&self) -> impl Iterator<Item = &Order> {
    self.orders.values()
  }

  /// Orders not yet terminal.
  pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
    self.orders.values().filter(|o| !o.is_terminal())
  }

  /// Count of non-terminal orders, both roles.
  pub fn active_count(&self) -> usize {
    self.active_orders().count()
  }

  /// Count of non-terminal close orders.
  pub fn active_close_count(&self) -> usize {
    self.active_orders().filter(|o| o.role == OrderRole::Close).count()
  }

  /// Prices of non-terminal close orders.
  pub fn active_close_prices(&self) -> Vec<Decimal> {
    self
      .active_orders()
      .filter(|o| o.role == OrderRole::Close)
      .map(|o| o.price)
      .collect()
  }

  /// Venue ids of non-terminal orders, for polling.
  pub fn active_venue_ids(&self) -> Vec<VenueOrderId> {
    self
      .active_orders()
      .filter_map(|o| o.venue_order_id.clone())
      .collect()
  }

  pub fn len(&self) -> usize {
    self.orders.len()
  }

  pub fn is_empty(&self) -> bool {
    self.orders.is_empty()
  }
}

/// Status-ordering acceptance rule.
fn accepts(order: &Order, update: &OrderUpdate) -> bool {
  let current = order.status;
  let reported = update.status;

  if current.is_terminal() {
    return match (current, reported) {
      (OrderStatus::Cancelled, OrderStatus::Filled) => {
        fill_not_after_cancel(update.event_time, order.status_time)
      }
      (c, r) if c == r => reports_more_fill(order, update),
      _ => false,
    };
  }

  match reported.rank().cmp(&current.rank()) {
    std::cmp::Ordering::Greater => true,
    std::cmp::Ordering::Equal => reports_more_fill(order, update),
    std::cmp::Ordering::Less => false,
  }
}

/// Missing timestamps count as coinciding, so the fill wins.
fn fill_not_after_cancel(fill_time: Option<DateTime<Utc>>, cancel_time: Option<DateTime<Utc>>) -> bool {
  match (fill_time, cancel_time) {
    (Some(fill), Some(cancel)) => fill <= cancel,
    _ => true,
  }
}

fn reports_more_fill(order: &Order, update: &OrderUpdate) -> bool {
  update
    .filled_size
    .is_some_and(|f| clamp_fill(f, order.requested_size) > order.filled_size)
}

fn clamp_fill(reported: Decimal, requested: Decimal) -> Decimal {
  reported.max(Decimal::ZERO).min(requested)
}

/// Update fill accounting, keeping `filled + remaining == requested`.
fn apply_fill(order: &mut Order, reported: Option<Decimal>) {
  let filled = if order.status == OrderStatus::Filled {
    order.requested_size
  } else {
    reported
      .map(|f| clamp_fill(f, order.requested_size))
      .unwrap_or(order.filled_size)
      .max(order.filled_size)
  };
  order.filled_size = filled;
  order.remaining_size = order.requested_size - filled;
}
