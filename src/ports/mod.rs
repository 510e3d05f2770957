//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ExchangeAdapter`: Order placement, cancellation, polling and push events
//! - `TransactionLog`: Archival of terminal orders (JSONL-based)
//! - `Clock`: Time source
//! - `CycleObserver`: Metrics and readiness reporting

pub mod audit;
pub mod clock;
pub mod exchange;
pub mod telemetry;

pub use audit::{TransactionLog, TransactionRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use exchange::{
  AdapterError, AdapterEvent, AdapterResult, Bbo, ExchangeAdapter, OrderInfo, OrderResult,
  PositionSnapshot,
};
pub use telemetry::{CycleObserver, NoopObserver};
