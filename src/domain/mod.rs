//! Domain layer - Order model and pure strategy rules.
//!
//! Order lifecycle types plus the stateless guards the controller
//! consults each cycle. No I/O here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod grid;
pub mod order;
pub mod price_gate;
pub mod pricing;
pub mod timeout;

// Re-export core types for convenience
pub use grid::GridSpacingGuard;
pub use order::{
    Direction, LocalOrderId, Order, OrderKey, OrderRole, OrderStatus, OrderUpdate, Side,
    UpdateSource, VenueOrderId,
};
pub use price_gate::{GateMode, PriceGate};
pub use timeout::TimeoutSupervisor;
