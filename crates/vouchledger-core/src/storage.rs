use thiserror::Error;

use crate::models::{LedgerEntry, Standing, UserId, VouchStats};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger is not initialized")]
    NotInitialized,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("user id {0} does not fit the storage schema")]
    UserIdOutOfRange(UserId),
}

/// The operation contract every ledger backend satisfies.
///
/// `init` must succeed before any other call; until then every call fails
/// with [`LedgerError::NotInitialized`]. Mutations are durable by the time
/// they return `Ok`. Counters never go below zero.
pub trait LedgerBackend: Send + Sync {
    /// Opens the durable state. A second call after success is a no-op; a
    /// call after a failure retries.
    fn init(&self) -> Result<(), LedgerError>;

    fn get_points(&self, user_id: UserId) -> Result<i64, LedgerError>;
    fn get_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError>;

    /// Applies `max(0, points + delta)` and returns the new points. Leaves
    /// `total_vouches` untouched, even for debits.
    fn add_points(&self, user_id: UserId, delta: i64) -> Result<i64, LedgerError>;

    /// Applies both deltas in one durable operation, flooring each at zero.
    fn add_vouch(
        &self,
        user_id: UserId,
        points_delta: i64,
        vouches_delta: i64,
    ) -> Result<VouchStats, LedgerError>;

    /// Highest points first, ties by ascending user id.
    fn top(&self, limit: usize) -> Result<Vec<Standing>, LedgerError>;

    /// Overwrites the given rows in one atomic unit.
    fn bulk_upsert(&self, rows: &[LedgerEntry]) -> Result<(), LedgerError>;

    /// Credits a single vouch event worth `points_delta` points.
    fn record_vouch(&self, user_id: UserId, points_delta: i64) -> Result<VouchStats, LedgerError> {
        self.add_vouch(user_id, points_delta, 1)
    }
}

/// Backends with a relational store behind them. These are the only valid
/// targets of a legacy import.
pub trait RelationalLedger: LedgerBackend {
    fn count_rows(&self) -> Result<u64, LedgerError>;
}

/// Converts a platform id into the signed 64-bit domain of a BIGINT column.
pub fn to_db_id(user_id: UserId) -> Result<i64, LedgerError> {
    i64::try_from(user_id).map_err(|_| LedgerError::UserIdOutOfRange(user_id))
}

/// Inverse of [`to_db_id`]. Rows written through this crate are never negative.
pub fn from_db_id(raw: i64) -> Result<UserId, LedgerError> {
    UserId::try_from(raw).map_err(|_| LedgerError::Database(format!("negative user id in store: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_id_conversion_rejects_ids_above_bigint() {
        assert_eq!(to_db_id(42).unwrap(), 42);
        assert!(matches!(to_db_id(u64::MAX), Err(LedgerError::UserIdOutOfRange(u64::MAX))));
        assert!(from_db_id(-1).is_err());
        assert_eq!(from_db_id(1_426_271_314_792_157_346).unwrap(), 1_426_271_314_792_157_346);
    }
}
