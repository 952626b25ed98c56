//! VouchLedger tracks per-user vouch points earned by posting images in a
//! designated channel.
//!
//! The ledger contract lives in `vouchledger-core`; the storage backends are
//! in their own crates. This crate wires them to configuration, runs the
//! legacy import, and applies the vouch credit rules.

pub mod config;
pub mod ledger;
pub mod migration;
pub mod vouch;

pub use ledger::Ledger;
pub use vouchledger_core::{
    Leaderboard, LedgerBackend, LedgerEntry, LedgerError, RelationalLedger, Standing, UserId,
    VouchStats,
};

use config::StorageConfig;
use migration::{ImportOutcome, MigrationError};

/// Builds and initializes the configured ledger, then runs the startup
/// import when the backend is relational and `auto_import` is set.
///
/// An unreadable or corrupt legacy file is logged and does not fail startup.
/// Store errors during the import do.
pub fn open_ledger(config: &StorageConfig) -> Result<Ledger, LedgerError> {
    let ledger = Ledger::from_config(config)?;
    ledger.init()?;

    if config.auto_import {
        if let Some(relational) = ledger.relational() {
            match migration::import_if_empty(relational, &config.legacy_path) {
                Ok(ImportOutcome::Imported(report)) => {
                    tracing::info!(imported = report.imported, skipped = report.skipped, "Startup import finished");
                }
                Ok(_) => {}
                Err(MigrationError::Ledger(e)) => return Err(e),
                Err(e) => tracing::error!(error = %e, "Startup import failed"),
            }
        }
    }

    Ok(ledger)
}
