//! Data models for telemetry samples, ledger entries and sync state
//!
//! The ledger and state tables in [`crate::storage`] persist these types;
//! the remote store receives [`LedgerEntry::remote_value`] bodies.

pub mod models;

pub use models::*;
