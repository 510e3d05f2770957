//! Property-Based Tests - Ledger and Guard Invariants
//!
//! Uses `proptest` to check that reconciliation stays monotonic and
//! idempotent under arbitrary update orderings, and that the grid
//! guard and price helpers behave consistently across random inputs.

use chrono::{TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use perp_grid_bot::domain::grid::{self, GridSpacingGuard};
use perp_grid_bot::domain::order::{Direction, OrderStatus, OrderUpdate, Side, UpdateSource};
use perp_grid_bot::domain::pricing::{round_to_tick, take_profit_price};
use perp_grid_bot::usecases::OrderLedger;

const REQUESTED: i64 = 100;

fn status() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Acknowledged),
        Just(OrderStatus::PartiallyFilled),
        Just(OrderStatus::Filled),
        Just(OrderStatus::Cancelled),
        Just(OrderStatus::Rejected),
        Just(OrderStatus::Expired),
    ]
}

/// A venue report for order `v1`: status, optional fill, optional event second.
fn report() -> impl Strategy<Value = (OrderStatus, Option<i64>, Option<i64>)> {
    (
        status(),
        proptest::option::of(0i64..=REQUESTED + 20),
        proptest::option::of(0i64..600),
    )
}

fn to_update((status, filled, at): (OrderStatus, Option<i64>, Option<i64>)) -> OrderUpdate {
    let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let mut update = OrderUpdate::venue("v1", status, UpdateSource::Push);
    update.filled_size = filled.map(|f| Decimal::new(f, 2));
    update.event_time = at.map(|s| base + TimeDelta::seconds(s));
    update
}

fn tracked_open() -> OrderLedger {
    let mut ledger = OrderLedger::new();
    let id = ledger.register_open(
        "ETHUSDT",
        Side::Buy,
        Decimal::new(REQUESTED, 2),
        Decimal::new(200_000, 2),
        Utc::now(),
    );
    ledger.reconcile(
        OrderUpdate::local(id, OrderStatus::Acknowledged, UpdateSource::Placement).with_venue_id("v1"),
    );
    ledger
}

fn price() -> impl Strategy<Value = Decimal> {
    (100_000i64..500_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn step() -> impl Strategy<Value = Decimal> {
    (1i64..200).prop_map(|bp| Decimal::new(bp, 2))
}

// ── Reconciliation Properties ───────────────────────────────

proptest! {
    /// Fill never shrinks, sizes stay consistent, and status only moves
    /// backwards through the fill-over-cancel exception.
    #[test]
    fn reconcile_is_monotonic(reports in prop::collection::vec(report(), 1..40)) {
        let mut ledger = tracked_open();
        let mut prev = ledger.by_venue_id("v1").unwrap().clone();

        for r in reports {
            ledger.reconcile(to_update(r));
            let order = ledger.by_venue_id("v1").unwrap().clone();

            prop_assert!(order.filled_size >= prev.filled_size);
            prop_assert!(order.sizes_consistent());
            prop_assert!(order.filled_size <= order.requested_size);

            let moved_back = order.status.rank() < prev.status.rank();
            prop_assert!(!moved_back, "{} -> {}", prev.status, order.status);
            if prev.status.is_terminal() && order.status != prev.status {
                prop_assert_eq!(prev.status, OrderStatus::Cancelled);
                prop_assert_eq!(order.status, OrderStatus::Filled);
            }
            if order.status == OrderStatus::Filled {
                prop_assert_eq!(order.filled_size, order.requested_size);
            }
            prev = order;
        }
    }

    /// Re-applying an update is a no-op.
    #[test]
    fn reconcile_is_idempotent(
        history in prop::collection::vec(report(), 0..10),
        last in report(),
    ) {
        let mut ledger = tracked_open();
        for r in history {
            ledger.reconcile(to_update(r));
        }

        ledger.reconcile(to_update(last));
        let before = ledger.by_venue_id("v1").unwrap().clone();
        let again = ledger.reconcile(to_update(last));
        let after = ledger.by_venue_id("v1").unwrap();

        prop_assert!(!again.is_adopted());
        prop_assert_eq!(before.status, after.status);
        prop_assert_eq!(before.filled_size, after.filled_size);
        prop_assert_eq!(before.status_time, after.status_time);
    }

    /// Each filled quantity is offered for closing exactly once.
    #[test]
    fn needs_close_is_consumed_once(reports in prop::collection::vec(report(), 1..20)) {
        let mut ledger = tracked_open();
        for r in reports {
            ledger.reconcile(to_update(r));
        }
        let first: Decimal = ledger.take_needs_close().iter().map(|c| c.quantity).sum();
        prop_assert!(first <= Decimal::new(REQUESTED, 2));
        prop_assert!(ledger.take_needs_close().is_empty());
    }
}

// ── Grid Guard Properties ───────────────────────────────────

proptest! {
    /// Accepting a candidate implies accepting every price further from
    /// the resting closes.
    #[test]
    fn grid_acceptance_is_monotonic(
        active in prop::collection::vec(price(), 1..6),
        candidate in price(),
        further in 1i64..10_000,
        step in step(),
    ) {
        let gap = Decimal::new(further, 2);
        if grid::accepts(candidate, &active, step, Direction::Buy) {
            prop_assert!(grid::accepts(candidate - gap, &active, step, Direction::Buy));
        }
        if grid::accepts(candidate, &active, step, Direction::Sell) {
            prop_assert!(grid::accepts(candidate + gap, &active, step, Direction::Sell));
        }
    }

    /// A wider step never accepts what a narrower one rejects.
    #[test]
    fn wider_step_is_stricter(
        active in prop::collection::vec(price(), 1..6),
        candidate in price(),
        narrow in step(),
        extra in step(),
    ) {
        for direction in [Direction::Buy, Direction::Sell] {
            if grid::accepts(candidate, &active, narrow + extra, direction) {
                prop_assert!(grid::accepts(candidate, &active, narrow, direction));
            }
        }
    }

    /// The nearest permitted price passes the guard and one tick closer fails.
    #[test]
    fn nearest_permitted_sits_on_boundary(
        active in prop::collection::vec(price(), 1..6),
        step in step(),
    ) {
        let tick = Decimal::new(1, 2);

        let long = GridSpacingGuard::new(step, Direction::Buy);
        let p = long.nearest_permitted(&active, tick).unwrap();
        prop_assert!(long.accepts(p, &active));
        prop_assert!(!long.accepts(p + tick, &active));

        let short = GridSpacingGuard::new(step, Direction::Sell);
        let p = short.nearest_permitted(&active, tick).unwrap();
        prop_assert!(short.accepts(p, &active));
        prop_assert!(!short.accepts(p - tick, &active));
    }
}

// ── Pricing Properties ──────────────────────────────────────

proptest! {
    /// Take-profit targets land on the tick grid at or beyond the full spread.
    #[test]
    fn take_profit_on_grid_and_profitable(fill in price(), pct in 1i64..500) {
        let tick = Decimal::new(1, 2);
        let pct = Decimal::new(pct, 2);

        let long = take_profit_price(fill, pct, Direction::Buy, tick);
        prop_assert_eq!(round_to_tick(long, tick), long);
        prop_assert!(long >= fill * (Decimal::ONE + pct / Decimal::ONE_HUNDRED));

        let short = take_profit_price(fill, pct, Direction::Sell, tick);
        prop_assert_eq!(round_to_tick(short, tick), short);
        prop_assert!(short <= fill * (Decimal::ONE - pct / Decimal::ONE_HUNDRED));
    }
}
