//! Grid Spacing Guard - Minimum Distance Between Close Orders
//!
//! Pure check that a candidate close price keeps the configured
//! percentage distance from every active close price. A long cycle
//! sells to close, so new closes must sit strictly below all resting
//! closes; a short cycle mirrors this above.
//!
//! A `grid_step_pct <= 0` disables the guard.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::order::Direction;

/// Minimum spacing guard for close prices.
#[derive(Debug, Clone, Copy)]
pub struct GridSpacingGuard {
    /// Minimum distance in percent (0.5 = 0.5%).
    grid_step_pct: Decimal,
    direction: Direction,
}

impl GridSpacingGuard {
    pub const fn new(grid_step_pct: Decimal, direction: Direction) -> Self {
        Self {
            grid_step_pct,
            direction,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.grid_step_pct > Decimal::ZERO
    }

    /// Evaluate `candidate` against the live set of close prices.
    pub fn accepts(&self, candidate: Decimal, active_close_prices: &[Decimal]) -> bool {
        accepts(
            candidate,
            active_close_prices,
            self.grid_step_pct,
            self.direction,
        )
    }

    /// Closest price the guard permits, one tick past the boundary.
    ///
    /// Returns `None` when the guard is disabled or no close is active,
    /// since every candidate is then acceptable as-is.
    pub fn nearest_permitted(&self, active_close_prices: &[Decimal], tick: Decimal) -> Option<Decimal> {
        if !self.is_enabled() {
            return None;
        }
        let factor = self.grid_step_pct / dec!(100);
        match self.direction {
            Direction::Buy => {
                let lowest = active_close_prices.iter().copied().min()?;
                let boundary = lowest * (Decimal::ONE - factor);
                // Round onto the tick grid first, then step strictly past it.
                let on_grid = floor_to_tick(boundary, tick);
                Some(if on_grid < boundary { on_grid } else { on_grid - tick })
            }
            Direction::Sell => {
                let highest = active_close_prices.iter().copied().max()?;
                let boundary = highest * (Decimal::ONE + factor);
                let on_grid = ceil_to_tick(boundary, tick);
                Some(if on_grid > boundary { on_grid } else { on_grid + tick })
            }
        }
    }
}

/// Pure guard evaluation.
///
/// Long (`Direction::Buy`): for every active `p`, require
/// `candidate < p * (1 - step/100)`. Short mirrors with
/// `candidate > p * (1 + step/100)`. The boundary itself is rejected.
pub fn accepts(
    candidate: Decimal,
    active_close_prices: &[Decimal],
    grid_step_pct: Decimal,
    direction: Direction,
) -> bool {
    if grid_step_pct <= Decimal::ZERO {
        return true;
    }
    let factor = grid_step_pct / dec!(100);
    match direction {
        Direction::Buy => active_close_prices
            .iter()
            .all(|p| candidate < *p * (Decimal::ONE - factor)),
        Direction::Sell => active_close_prices
            .iter()
            .all(|p| candidate > *p * (Decimal::ONE + factor)),
    }
}

fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).floor() * tick
}

fn ceil_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).ceil() * tick
}
