//! Core types and traits for VouchLedger storage backends.
//!
//! This crate provides the `LedgerBackend` trait and all associated types,
//! enabling pluggable storage implementations in separate crates.

pub mod models;
pub mod snapshot;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{floor_add, rank, Leaderboard, LedgerEntry, Standing, UserId, VouchStats};
pub use snapshot::{parse_snapshot, render_snapshot, ParsedSnapshot, SkippedEntry, SnapshotError};
pub use storage::{from_db_id, to_db_id, LedgerBackend, LedgerError, RelationalLedger};
