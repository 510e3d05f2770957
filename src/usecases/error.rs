//! Controller error taxonomy.
//!
//! Only failures that end the run surface here. Transient adapter
//! errors, stale updates, guard rejections and gate transitions are
//! control flow inside the controller and never become errors.

use thiserror::Error;

use crate::ports::exchange::AdapterError;

/// Failure that halts the strategy run.
#[derive(Error, Debug)]
pub enum ControllerError {
  /// Authentication or configuration failure reported by the venue.
  #[error("Fatal adapter error: {0}")]
  Fatal(#[from] AdapterError),

  /// A terminal order could not be archived; it stays in the ledger.
  #[error("Transaction log write failed: {0}")]
  Audit(#[source] anyhow::Error),
}

impl ControllerError {
  /// Process exit code for this failure.
  pub const fn exit_code(&self) -> i32 {
    1
  }
}
