//! JSON snapshot file backend.
//!
//! The whole ledger lives in memory and the entire snapshot is rewritten after
//! every mutation, so each write costs O(N) in ledger size. Fine for a single
//! community, not for large deployments.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};

use vouchledger_core::{
    parse_snapshot, rank, render_snapshot, LedgerBackend, LedgerEntry, LedgerError, Standing,
    UserId, VouchStats,
};

pub struct FileLedger {
    path: PathBuf,
    entries: RwLock<Option<BTreeMap<UserId, VouchStats>>>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<UserId, VouchStats>, LedgerError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot found, starting with an empty ledger");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let parsed = match parse_snapshot(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Snapshot is corrupt, starting with an empty ledger");
                return Ok(BTreeMap::new());
            }
        };

        for skipped in &parsed.skipped {
            tracing::warn!(key = %skipped.key, reason = %skipped.reason, "Skipping snapshot entry");
        }

        Ok(parsed
            .entries
            .into_iter()
            .map(|e| (e.user_id, e.stats()))
            .collect())
    }

    /// Writes the snapshot to a sibling temp file, syncs it, then renames it
    /// over the target so readers never see a half-written file.
    fn persist(&self, entries: &BTreeMap<UserId, VouchStats>) -> Result<(), LedgerError> {
        let rows: Vec<LedgerEntry> = entries
            .iter()
            .map(|(user_id, stats)| LedgerEntry::new(*user_id, stats.points, stats.total_vouches))
            .collect();
        let bytes = render_snapshot(&rows)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Applies `update` to one entry and persists. On a failed write the entry
    /// is restored so the failed call leaves no trace.
    fn mutate<F>(&self, user_id: UserId, update: F) -> Result<VouchStats, LedgerError>
    where
        F: FnOnce(VouchStats) -> VouchStats,
    {
        let mut guard = self.entries.write().unwrap();
        let entries = guard.as_mut().ok_or(LedgerError::NotInitialized)?;

        let previous = entries.get(&user_id).copied();
        let updated = update(previous.unwrap_or_default());
        entries.insert(user_id, updated);

        if let Err(e) = self.persist(entries) {
            match previous {
                Some(stats) => entries.insert(user_id, stats),
                None => entries.remove(&user_id),
            };
            tracing::error!(user_id, error = %e, "Failed to persist snapshot, mutation rolled back");
            return Err(e);
        }

        Ok(updated)
    }

    fn read_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError> {
        let guard = self.entries.read().unwrap();
        let entries = guard.as_ref().ok_or(LedgerError::NotInitialized)?;
        Ok(entries.get(&user_id).copied().unwrap_or_default())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => p,
        None => Path::new("."),
    };
    if let Ok(dir) = fs::OpenOptions::new().read(true).open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

impl LedgerBackend for FileLedger {
    fn init(&self) -> Result<(), LedgerError> {
        let mut guard = self.entries.write().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let entries = self.load()?;
        tracing::info!(path = %self.path.display(), users = entries.len(), "File ledger loaded");
        *guard = Some(entries);
        Ok(())
    }

    fn get_points(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.read_stats(user_id)?.points)
    }

    fn get_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError> {
        self.read_stats(user_id)
    }

    fn add_points(&self, user_id: UserId, delta: i64) -> Result<i64, LedgerError> {
        let stats = self.mutate(user_id, |current| current.apply(delta, 0))?;
        tracing::debug!(user_id, delta, points = stats.points, "Points updated");
        Ok(stats.points)
    }

    fn add_vouch(
        &self,
        user_id: UserId,
        points_delta: i64,
        vouches_delta: i64,
    ) -> Result<VouchStats, LedgerError> {
        let stats = self.mutate(user_id, |current| current.apply(points_delta, vouches_delta))?;
        tracing::debug!(
            user_id,
            points_delta,
            vouches_delta,
            points = stats.points,
            total_vouches = stats.total_vouches,
            "Vouch recorded"
        );
        Ok(stats)
    }

    fn top(&self, limit: usize) -> Result<Vec<Standing>, LedgerError> {
        let guard = self.entries.read().unwrap();
        let entries = guard.as_ref().ok_or(LedgerError::NotInitialized)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let standings = entries
            .iter()
            .map(|(user_id, stats)| Standing::new(*user_id, stats.points))
            .collect();
        Ok(rank(standings, limit))
    }

    fn bulk_upsert(&self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut guard = self.entries.write().unwrap();
        let entries = guard.as_mut().ok_or(LedgerError::NotInitialized)?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut staged = entries.clone();
        for row in rows {
            staged.insert(row.user_id, row.clamped().stats());
        }
        self.persist(&staged)?;
        *entries = staged;

        tracing::info!(rows = rows.len(), "Bulk upsert written to snapshot");
        Ok(())
    }
}
