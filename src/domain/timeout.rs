//! Open-order timeout supervision.
//!
//! An open order that is still live after `wait_time` is due for
//! cancellation. Close orders are never time-limited.

use chrono::{DateTime, TimeDelta, Utc};

use super::order::{Order, OrderRole};

/// True when `order` is non-terminal and at least `wait_time` old.
pub fn expired(order: &Order, now: DateTime<Utc>, wait_time: TimeDelta) -> bool {
    !order.status.is_terminal() && now - order.created_at >= wait_time
}

/// Selects open orders whose age has reached the configured limit.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    wait_time: TimeDelta,
}

impl TimeoutSupervisor {
    pub const fn new(wait_time: TimeDelta) -> Self {
        Self { wait_time }
    }

    pub const fn wait_time(&self) -> TimeDelta {
        self.wait_time
    }

    /// Orders due for cancellation at `now`, open role only.
    pub fn due<'a, I>(&self, orders: I, now: DateTime<Utc>) -> Vec<&'a Order>
    where
        I: IntoIterator<Item = &'a Order>,
    {
        orders
            .into_iter()
            .filter(|o| o.role == OrderRole::Open && expired(o, now, self.wait_time))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LocalOrderId, OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn order(role: OrderRole, created_at: DateTime<Utc>) -> Order {
        Order::new_pending(
            LocalOrderId(1),
            "ETHUSDT".to_string(),
            Side::Buy,
            role,
            dec!(1),
            dec!(2000),
            created_at,
        )
    }

    #[test]
    fn test_expired_at_exact_boundary() {
        let t0 = Utc::now();
        let o = order(OrderRole::Open, t0);
        let wait = TimeDelta::seconds(10);
        assert!(!expired(&o, t0 + TimeDelta::seconds(9), wait));
        assert!(expired(&o, t0 + TimeDelta::seconds(10), wait));
    }

    #[test]
    fn test_terminal_never_expires() {
        let t0 = Utc::now();
        let mut o = order(OrderRole::Open, t0);
        o.status = OrderStatus::Filled;
        assert!(!expired(&o, t0 + TimeDelta::hours(1), TimeDelta::seconds(1)));
    }

    #[test]
    fn test_supervisor_skips_close_orders() {
        let t0 = Utc::now();
        let open = order(OrderRole::Open, t0);
        let close = order(OrderRole::Close, t0);
        let sup = TimeoutSupervisor::new(TimeDelta::seconds(5));
        let due = sup.due([&open, &close], t0 + TimeDelta::seconds(6));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].role, OrderRole::Open);
    }
}
