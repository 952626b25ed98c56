//! Backend selection. The backend is picked once from configuration and
//! handed to every caller as a [`Ledger`].

use vouchledger_core::{LedgerBackend, LedgerEntry, LedgerError, RelationalLedger, Standing, UserId, VouchStats};
use vouchledger_file::FileLedger;
use vouchledger_postgres::PostgresLedger;
use vouchledger_sqlite::SqliteLedger;

use crate::config::{BackendKind, StorageConfig};

pub enum Ledger {
    File(FileLedger),
    Sqlite(SqliteLedger),
    Postgres(PostgresLedger),
}

impl Ledger {
    /// Builds the configured backend. Nothing is opened until `init`.
    pub fn from_config(config: &StorageConfig) -> Result<Self, LedgerError> {
        let ledger = match config.backend {
            BackendKind::File => Ledger::File(FileLedger::new(config.file_path.clone())),
            BackendKind::Sqlite => {
                Ledger::Sqlite(SqliteLedger::new(&config.sqlite_path, config.pool_size))
            }
            BackendKind::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    LedgerError::Connection("storage.database_url is not set".to_string())
                })?;
                Ledger::Postgres(PostgresLedger::new(url, config.pool_size))
            }
        };
        Ok(ledger)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Ledger::File(_) => BackendKind::File,
            Ledger::Sqlite(_) => BackendKind::Sqlite,
            Ledger::Postgres(_) => BackendKind::Postgres,
        }
    }

    fn backend(&self) -> &dyn LedgerBackend {
        match self {
            Ledger::File(l) => l,
            Ledger::Sqlite(l) => l,
            Ledger::Postgres(l) => l,
        }
    }

    /// The relational view of this ledger, if it has one. Only relational
    /// ledgers can receive a legacy import.
    pub fn relational(&self) -> Option<&dyn RelationalLedger> {
        match self {
            Ledger::File(_) => None,
            Ledger::Sqlite(l) => Some(l),
            Ledger::Postgres(l) => Some(l),
        }
    }
}

impl LedgerBackend for Ledger {
    fn init(&self) -> Result<(), LedgerError> {
        self.backend().init()
    }

    fn get_points(&self, user_id: UserId) -> Result<i64, LedgerError> {
        self.backend().get_points(user_id)
    }

    fn get_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError> {
        self.backend().get_stats(user_id)
    }

    fn add_points(&self, user_id: UserId, delta: i64) -> Result<i64, LedgerError> {
        self.backend().add_points(user_id, delta)
    }

    fn add_vouch(
        &self,
        user_id: UserId,
        points_delta: i64,
        vouches_delta: i64,
    ) -> Result<VouchStats, LedgerError> {
        self.backend().add_vouch(user_id, points_delta, vouches_delta)
    }

    fn top(&self, limit: usize) -> Result<Vec<Standing>, LedgerError> {
        self.backend().top(limit)
    }

    fn bulk_upsert(&self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        self.backend().bulk_upsert(rows)
    }
}
