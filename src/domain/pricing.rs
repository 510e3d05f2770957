//! Pricing helpers for the take-profit cycle.
//!
//! Take-profit targets, tick rounding and the adaptive open-order
//! cooldown. All functions are pure.

use chrono::TimeDelta;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::order::{Direction, Side};

/// Round `price` to the nearest multiple of `tick` (half away from zero).
///
/// A non-positive tick returns the price unchanged.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    round_to_tick_with(price, tick, RoundingStrategy::MidpointAwayFromZero)
}

fn round_to_tick_with(price: Decimal, tick: Decimal, strategy: RoundingStrategy) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let steps = (price / tick).round_dp_with_strategy(0, strategy);
    (steps * tick).normalize()
}

/// Close price realizing `take_profit_pct` on a fill at `fill_price`.
///
/// Long closes above the fill, short closes below it. The result is
/// rounded onto the tick grid away from the fill, so the realized
/// spread is never below `take_profit_pct`.
///
/// 2000 at 0.02% gives 2000.40 (long) and 1999.60 (short).
pub fn take_profit_price(
    fill_price: Decimal,
    take_profit_pct: Decimal,
    direction: Direction,
    tick: Decimal,
) -> Decimal {
    let factor = take_profit_pct / dec!(100);
    match direction {
        Direction::Buy => round_to_tick_with(
            fill_price * (Decimal::ONE + factor),
            tick,
            RoundingStrategy::ToPositiveInfinity,
        ),
        Direction::Sell => round_to_tick_with(
            fill_price * (Decimal::ONE - factor),
            tick,
            RoundingStrategy::ToNegativeInfinity,
        ),
    }
}

/// Whether `close_price` still realizes a profit relative to `open_price`.
pub fn is_profitable(open_price: Decimal, close_price: Decimal, direction: Direction) -> bool {
    match direction {
        Direction::Buy => close_price > open_price,
        Direction::Sell => close_price < open_price,
    }
}

/// Limit price for a maker open order one tick inside the touch.
///
/// Buy rests one tick under the best ask, sell one tick over the best bid.
pub fn open_order_price(best_bid: Decimal, best_ask: Decimal, direction: Direction, tick: Decimal) -> Decimal {
    match direction {
        Direction::Buy => round_to_tick(best_ask - tick, tick),
        Direction::Sell => round_to_tick(best_bid + tick, tick),
    }
}

/// Keep a close order on the maker side of the book.
///
/// A sell never rests below bid + tick, a buy never above ask - tick.
pub fn maker_close_price(price: Decimal, side: Side, best_bid: Decimal, best_ask: Decimal, tick: Decimal) -> Decimal {
    let passive = match side {
        Side::Sell => price.max(best_bid + tick),
        Side::Buy => price.min(best_ask - tick),
    };
    round_to_tick(passive, tick)
}

/// Effective wait between open placements when adaptive cooldown is on.
///
/// Scales `wait` by how full the close book is relative to `max_orders`.
pub fn adaptive_wait(wait: TimeDelta, active_closes: usize, max_orders: usize) -> TimeDelta {
    if max_orders == 0 {
        return wait;
    }
    // Compare active/max against 2/3, 1/3, 1/6 with integer arithmetic.
    let scaled = active_closes * 6;
    if scaled >= max_orders * 4 {
        wait * 2
    } else if scaled >= max_orders * 2 {
        wait
    } else if scaled >= max_orders {
        wait / 2
    } else {
        wait / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maker_close_price_stays_passive() {
        let (bid, ask, tick) = (dec!(1999.99), dec!(2000.00), dec!(0.01));
        assert_eq!(maker_close_price(dec!(2000.40), Side::Sell, bid, ask, tick), dec!(2000.40));
        assert_eq!(maker_close_price(dec!(1999.50), Side::Sell, bid, ask, tick), dec!(2000.00));
        assert_eq!(maker_close_price(dec!(1999.60), Side::Buy, bid, ask, tick), dec!(1999.60));
        assert_eq!(maker_close_price(dec!(2000.50), Side::Buy, bid, ask, tick), dec!(1999.99));
    }

    #[test]
    fn test_take_profit_long_and_short() {
        assert_eq!(
            take_profit_price(dec!(2000), dec!(0.02), Direction::Buy, dec!(0.01)),
            dec!(2000.40)
        );
        assert_eq!(
            take_profit_price(dec!(2000), dec!(0.02), Direction::Sell, dec!(0.01)),
            dec!(1999.60)
        );
    }

    #[test]
    fn test_take_profit_rounds_away_from_fill() {
        // 1999.99 * 1.0002 = 2000.389998, 1999.99 * 0.9998 = 1999.590002
        assert_eq!(
            take_profit_price(dec!(1999.99), dec!(0.02), Direction::Buy, dec!(0.01)),
            dec!(2000.39)
        );
        assert_eq!(
            take_profit_price(dec!(1999.99), dec!(0.02), Direction::Sell, dec!(0.01)),
            dec!(1999.59)
        );
        // 2000.03 * 1.0002 = 2000.430006 would round down to 2000.43 at half-up
        assert_eq!(
            take_profit_price(dec!(2000.03), dec!(0.02), Direction::Buy, dec!(0.01)),
            dec!(2000.44)
        );
        // 2000.03 * 0.9998 = 1999.629994
        assert_eq!(
            take_profit_price(dec!(2000.03), dec!(0.02), Direction::Sell, dec!(0.01)),
            dec!(1999.62)
        );
        assert_eq!(
            take_profit_price(dec!(2000), dec!(0.02), Direction::Buy, dec!(0)),
            dec!(2000.4000)
        );
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(2000.404), dec!(0.01)), dec!(2000.40));
        assert_eq!(round_to_tick(dec!(2000.405), dec!(0.01)), dec!(2000.41));
        assert_eq!(round_to_tick(dec!(101.3), dec!(0.5)), dec!(101.5));
        assert_eq!(round_to_tick(dec!(7.123), dec!(0)), dec!(7.123));
    }

    #[test]
    fn test_open_price_inside_touch() {
        assert_eq!(
            open_order_price(dec!(1999.9), dec!(2000.0), Direction::Buy, dec!(0.1)),
            dec!(1999.9)
        );
        assert_eq!(
            open_order_price(dec!(1999.9), dec!(2000.0), Direction::Sell, dec!(0.1)),
            dec!(2000.0)
        );
    }

    #[test]
    fn test_profitability() {
        assert!(is_profitable(dec!(2000), dec!(2000.1), Direction::Buy));
        assert!(!is_profitable(dec!(2000), dec!(2000), Direction::Buy));
        assert!(is_profitable(dec!(2000), dec!(1999.9), Direction::Sell));
    }

    #[test]
    fn test_adaptive_wait_bands() {
        let wait = TimeDelta::seconds(60);
        assert_eq!(adaptive_wait(wait, 8, 12), TimeDelta::seconds(120));
        assert_eq!(adaptive_wait(wait, 4, 12), TimeDelta::seconds(60));
        assert_eq!(adaptive_wait(wait, 2, 12), TimeDelta::seconds(30));
        assert_eq!(adaptive_wait(wait, 1, 12), TimeDelta::seconds(15));
        assert_eq!(adaptive_wait(wait, 0, 12), TimeDelta::seconds(15));
        assert_eq!(adaptive_wait(wait, 3, 0), wait);
    }
}
