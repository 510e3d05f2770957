//! Clock Port - Time Source
//!
//! The controller reads time only through this trait so tests can
//! drive wait-time and timeout rules deterministically.

use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub const fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Move the clock forward by `delta`.
  pub fn advance(&self, delta: TimeDelta) {
    let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    *now += delta;
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = at;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    clock.advance(TimeDelta::seconds(30));
    assert_eq!(clock.now() - start, TimeDelta::seconds(30));
  }

  #[test]
  fn test_system_clock_moves_forward() {
    let a = SystemClock.now();
    let b = SystemClock.now();
    assert!(b >= a);
  }
}
