//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, WebSockets, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `aster`: Aster perpetual futures REST client, auth and user stream
//! - `paper`: in-memory simulated venue
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL transaction log

pub mod aster;
pub mod metrics;
pub mod paper;
pub mod persistence;

