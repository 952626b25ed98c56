//! One-shot import of a legacy JSON snapshot into a relational ledger.

use std::{fs, io, path::Path};

use thiserror::Error;
use vouchledger_core::{parse_snapshot, LedgerError, RelationalLedger, SnapshotError};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to read legacy snapshot {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("legacy snapshot {path} is corrupt: {source}")]
    CorruptSnapshot {
        path: String,
        #[source]
        source: SnapshotError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The store already had rows; nothing was read.
    AlreadyPopulated { rows: u64 },
    /// No legacy file, or one without entries.
    NoLegacyData,
    Imported(ImportReport),
}

/// Imports `legacy_path` only when the store is empty. Runs at startup.
pub fn import_if_empty(
    ledger: &dyn RelationalLedger,
    legacy_path: &Path,
) -> Result<ImportOutcome, MigrationError> {
    let rows = ledger.count_rows()?;
    if rows > 0 {
        tracing::debug!(rows, "Relational ledger already populated, skipping legacy import");
        return Ok(ImportOutcome::AlreadyPopulated { rows });
    }
    import(ledger, legacy_path)
}

/// Imports `legacy_path` regardless of what the store holds. Existing rows for
/// the imported users are overwritten, so re-running is idempotent.
pub fn force_import(
    ledger: &dyn RelationalLedger,
    legacy_path: &Path,
) -> Result<ImportOutcome, MigrationError> {
    import(ledger, legacy_path)
}

fn import(ledger: &dyn RelationalLedger, legacy_path: &Path) -> Result<ImportOutcome, MigrationError> {
    let path = legacy_path.display().to_string();
    let bytes = match fs::read(legacy_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path, "No legacy snapshot to import");
            return Ok(ImportOutcome::NoLegacyData);
        }
        Err(source) => return Err(MigrationError::Read { path, source }),
    };

    let parsed = parse_snapshot(&bytes)
        .map_err(|source| MigrationError::CorruptSnapshot { path: path.clone(), source })?;

    for skipped in &parsed.skipped {
        tracing::warn!(key = %skipped.key, reason = %skipped.reason, "Skipping legacy entry");
    }
    metrics::counter!("vouchledger_rows_skipped_total", parsed.skipped.len() as u64);

    if parsed.entries.is_empty() {
        tracing::info!(path = %path, skipped = parsed.skipped.len(), "Legacy snapshot has no importable entries");
        return Ok(ImportOutcome::NoLegacyData);
    }

    ledger.bulk_upsert(&parsed.entries)?;
    metrics::counter!("vouchledger_rows_imported_total", parsed.entries.len() as u64);

    let report = ImportReport {
        imported: parsed.entries.len(),
        skipped: parsed.skipped.len(),
    };
    tracing::info!(path = %path, imported = report.imported, skipped = report.skipped, "Legacy snapshot imported");
    Ok(ImportOutcome::Imported(report))
}

#[cfg(test)]
mod tests {
    use vouchledger_core::{LedgerBackend, VouchStats};
    use vouchledger_sqlite::SqliteLedger;

    use super::*;

    fn sqlite() -> SqliteLedger {
        let ledger = SqliteLedger::new(":memory:", 1);
        ledger.init().unwrap();
        ledger
    }

    #[test]
    fn missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = sqlite();
        let outcome = import_if_empty(&ledger, &dir.path().join("absent.json")).unwrap();
        assert_eq!(outcome, ImportOutcome::NoLegacyData);
        assert_eq!(ledger.count_rows().unwrap(), 0);
    }

    #[test]
    fn empty_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouches.json");
        fs::write(&path, "").unwrap();
        let ledger = sqlite();
        assert_eq!(import_if_empty(&ledger, &path).unwrap(), ImportOutcome::NoLegacyData);

        fs::write(&path, "{}").unwrap();
        assert_eq!(import_if_empty(&ledger, &path).unwrap(), ImportOutcome::NoLegacyData);
    }

    #[test]
    fn mixed_shapes_are_normalized_and_bad_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouches.json");
        fs::write(
            &path,
            r#"{
                "42": 7,
                "43": {"points": 7, "total_vouches": 3},
                "44": {"score": 7},
                "not-a-user": 9,
                "45": [1]
            }"#,
        )
        .unwrap();

        let ledger = sqlite();
        let outcome = import_if_empty(&ledger, &path).unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(ImportReport { imported: 3, skipped: 2 }));
        assert_eq!(ledger.get_stats(42).unwrap(), VouchStats::new(7, 0));
        assert_eq!(ledger.get_stats(43).unwrap(), VouchStats::new(7, 3));
        assert_eq!(ledger.get_stats(44).unwrap(), VouchStats::new(7, 0));
    }

    #[test]
    fn corrupt_file_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouches.json");
        fs::write(&path, "[42, 7]").unwrap();
        let ledger = sqlite();
        assert!(matches!(
            import_if_empty(&ledger, &path),
            Err(MigrationError::CorruptSnapshot { .. })
        ));
        assert_eq!(ledger.count_rows().unwrap(), 0);
    }

    #[test]
    fn populated_store_is_guarded_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouches.json");
        fs::write(&path, r#"{"1": 10}"#).unwrap();

        let ledger = sqlite();
        ledger.add_vouch(1, 99, 9).unwrap();
        assert_eq!(
            import_if_empty(&ledger, &path).unwrap(),
            ImportOutcome::AlreadyPopulated { rows: 1 }
        );
        assert_eq!(ledger.get_stats(1).unwrap(), VouchStats::new(99, 9));

        let outcome = force_import(&ledger, &path).unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(ImportReport { imported: 1, skipped: 0 }));
        assert_eq!(ledger.get_stats(1).unwrap(), VouchStats::new(10, 0));
    }
}
