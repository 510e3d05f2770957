//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain rules with port interfaces to run the
//! open/close trading cycle.
//!
//! Use cases:
//! - `OrderLedger`: Authoritative order state and reconciliation
//! - `StrategyController`: Per-cycle scheduling of opens, closes and cancels

pub mod controller;
pub mod error;
pub mod ledger;

pub use controller::{CycleOutcome, RunOutcome, StrategyController};
pub use error::ControllerError;
pub use ledger::{CloseRequest, OrderLedger, ReconcileOutcome};
