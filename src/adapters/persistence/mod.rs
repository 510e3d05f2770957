//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the `TransactionLog` port using append-only JSONL files.
//! No database dependency; lightweight and crash-recoverable.

pub mod transactions;

pub use transactions::TransactionLogger;
