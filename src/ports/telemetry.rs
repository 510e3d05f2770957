//! Telemetry Port - Controller Observations
//!
//! The controller reports what it does through this trait; the
//! metrics adapter turns observations into Prometheus series and
//! readiness state. Every method defaults to a no-op.

use crate::domain::order::{OrderRole, OrderStatus};
use crate::domain::price_gate::GateMode;

/// Sink for controller observations.
pub trait CycleObserver: Send + Sync + 'static {
  /// An order placement was issued and accepted.
  fn order_placed(&self, _role: OrderRole) {}

  /// An order reached a terminal status.
  fn order_terminal(&self, _role: OrderRole, _status: OrderStatus) {}

  /// A reconciliation update was discarded as stale.
  fn stale_update(&self) {}

  /// An adapter call failed.
  fn adapter_error(&self, _kind: &'static str) {}

  /// A guard deferred an action (`grid`, `max_orders`, `wait_time`).
  fn deferral(&self, _guard: &'static str) {}

  /// Non-terminal order count after a cycle.
  fn active_orders(&self, _open: usize, _close: usize) {}

  /// Gate mode after a cycle.
  fn gate_mode(&self, _mode: GateMode) {}

  /// Wall time of one scheduler cycle.
  fn cycle_latency(&self, _seconds: f64) {}

  /// Whether the adapter is connected and the ledger synchronized.
  fn set_ready(&self, _ready: bool) {}
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CycleObserver for NoopObserver {}
