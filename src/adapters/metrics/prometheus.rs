//! Prometheus Metrics Registry - Cycle Observability
//!
//! Registers and exposes Prometheus metrics on :9090 for Grafana
//! dashboards. Covers order flow by role, reconciliation staleness,
//! adapter failures, guard deferrals, gate mode, and cycle latency.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use super::health::HealthState;
use crate::domain::order::{OrderRole, OrderStatus};
use crate::domain::price_gate::GateMode;
use crate::ports::telemetry::CycleObserver;

/// Centralized Prometheus metrics for the bot.
///
/// All metrics follow the naming convention `perp_bot_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Orders accepted by the venue, by role.
    pub orders_placed: IntCounterVec,
    /// Orders reaching a terminal status, by role and status.
    pub orders_terminal: IntCounterVec,
    /// Reconciliation updates discarded as stale.
    pub stale_updates: IntCounter,
    /// Adapter call failures, by error kind.
    pub adapter_errors: IntCounterVec,
    /// Actions deferred by a guard, by guard.
    pub deferrals: IntCounterVec,
    /// Non-terminal orders, by role.
    pub active_orders: IntGaugeVec,
    /// Gate mode (0 running, 1 paused, 2 stopped).
    pub gate_mode: IntGauge,
    /// Scheduler cycle wall time.
    pub cycle_latency: Histogram,
    /// Readiness (1 = connected and synchronized).
    pub ready: IntGauge,
    health: Arc<HealthState>,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new(health: Arc<HealthState>) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_placed = IntCounterVec::new(
            Opts::new("perp_bot_orders_placed_total", "Orders accepted by the venue"),
            &["role"],
        )?;

        let orders_terminal = IntCounterVec::new(
            Opts::new(
                "perp_bot_orders_terminal_total",
                "Orders reaching a terminal status",
            ),
            &["role", "status"],
        )?;

        let stale_updates = IntCounter::new(
            "perp_bot_stale_updates_total",
            "Order updates discarded by reconciliation",
        )?;

        let adapter_errors = IntCounterVec::new(
            Opts::new("perp_bot_adapter_errors_total", "Failed venue adapter calls"),
            &["kind"],
        )?;

        let deferrals = IntCounterVec::new(
            Opts::new("perp_bot_deferrals_total", "Placements deferred by a guard"),
            &["guard"],
        )?;

        let active_orders = IntGaugeVec::new(
            Opts::new("perp_bot_active_orders", "Non-terminal orders in the ledger"),
            &["role"],
        )?;

        let gate_mode = IntGauge::new(
            "perp_bot_gate_mode",
            "Price gate mode (0=running, 1=paused, 2=stopped)",
        )?;

        let cycle_latency = Histogram::with_opts(
            HistogramOpts::new("perp_bot_cycle_latency_seconds", "Scheduler cycle wall time")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let ready = IntGauge::new(
            "perp_bot_ready",
            "Whether the venue is connected and the ledger synchronized",
        )?;

        registry.register(Box::new(orders_placed.clone()))?;
        registry.register(Box::new(orders_terminal.clone()))?;
        registry.register(Box::new(stale_updates.clone()))?;
        registry.register(Box::new(adapter_errors.clone()))?;
        registry.register(Box::new(deferrals.clone()))?;
        registry.register(Box::new(active_orders.clone()))?;
        registry.register(Box::new(gate_mode.clone()))?;
        registry.register(Box::new(cycle_latency.clone()))?;
        registry.register(Box::new(ready.clone()))?;

        Ok(Self {
            registry,
            orders_placed,
            orders_terminal,
            stale_updates,
            adapter_errors,
            deferrals,
            active_orders,
            gate_mode,
            cycle_latency,
            ready,
            health,
        })
    }

    /// Encode the registry in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            error!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

fn role_label(role: OrderRole) -> &'static str {
    match role {
        OrderRole::Open => "open",
        OrderRole::Close => "close",
    }
}

impl CycleObserver for MetricsRegistry {
    fn order_placed(&self, role: OrderRole) {
        self.orders_placed.with_label_values(&[role_label(role)]).inc();
    }

    fn order_terminal(&self, role: OrderRole, status: OrderStatus) {
        let status = status.to_string().to_ascii_lowercase();
        self.orders_terminal
            .with_label_values(&[role_label(role), status.as_str()])
            .inc();
    }

    fn stale_update(&self) {
        self.stale_updates.inc();
    }

    fn adapter_error(&self, kind: &'static str) {
        self.adapter_errors.with_label_values(&[kind]).inc();
    }

    fn deferral(&self, guard: &'static str) {
        self.deferrals.with_label_values(&[guard]).inc();
    }

    fn active_orders(&self, open: usize, close: usize) {
        self.active_orders
            .with_label_values(&["open"])
            .set(i64::try_from(open).unwrap_or(i64::MAX));
        self.active_orders
            .with_label_values(&["close"])
            .set(i64::try_from(close).unwrap_or(i64::MAX));
    }

    fn gate_mode(&self, mode: GateMode) {
        self.gate_mode.set(mode.as_gauge());
    }

    fn cycle_latency(&self, seconds: f64) {
        self.cycle_latency.observe(seconds);
    }

    fn set_ready(&self, ready: bool) {
        self.ready.set(i64::from(ready));
        self.health.set_ready(ready);
    }
}
