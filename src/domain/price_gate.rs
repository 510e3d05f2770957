//! Price Gate - Stop / Pause Kill Switches
//!
//! Compares the reference market price with the configured stop and
//! pause thresholds. A negative threshold (sentinel `-1`) disables
//! that check.
//!
//! Buy direction trips when price rises to the threshold, sell
//! direction when it falls to it.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::order::Direction;

/// Gate decision for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Running,
    /// New placements suspended; existing orders keep being supervised.
    Paused,
    /// Terminal for the run.
    Stopped,
}

impl GateMode {
    /// Gauge encoding: 0 running, 1 paused, 2 stopped.
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Running => 0,
            Self::Paused => 1,
            Self::Stopped => 2,
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Stop/pause thresholds for one run.
#[derive(Debug, Clone, Copy)]
pub struct PriceGate {
    direction: Direction,
    stop_price: Decimal,
    pause_price: Decimal,
}

impl PriceGate {
    pub const fn new(direction: Direction, stop_price: Decimal, pause_price: Decimal) -> Self {
        Self {
            direction,
            stop_price,
            pause_price,
        }
    }

    pub fn evaluate(&self, current_price: Decimal) -> GateMode {
        evaluate(current_price, self.direction, self.stop_price, self.pause_price)
    }
}

/// Pure gate evaluation. Stop takes precedence over pause.
pub fn evaluate(
    current_price: Decimal,
    direction: Direction,
    stop_price: Decimal,
    pause_price: Decimal,
) -> GateMode {
    let tripped = |threshold: Decimal| {
        threshold >= Decimal::ZERO
            && match direction {
                Direction::Buy => current_price >= threshold,
                Direction::Sell => current_price <= threshold,
            }
    };

    if tripped(stop_price) {
        GateMode::Stopped
    } else if tripped(pause_price) {
        GateMode::Paused
    } else {
        GateMode::Running
    }
}
