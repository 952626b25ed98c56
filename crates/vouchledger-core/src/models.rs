use std::fmt::Display;

use prettytable::{row, Table};

/// Platform account id.
pub type UserId = u64;

/// Adds `delta` to `current`, saturating at the `i64` bounds, and clamps the
/// result at zero.
pub fn floor_add(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VouchStats {
    pub points: i64,
    pub total_vouches: i64,
}

impl VouchStats {
    pub fn new(points: i64, total_vouches: i64) -> Self {
        Self { points, total_vouches }
    }

    /// Applies both deltas, flooring each counter independently.
    pub fn apply(self, points_delta: i64, vouches_delta: i64) -> Self {
        Self {
            points: floor_add(self.points, points_delta),
            total_vouches: floor_add(self.total_vouches, vouches_delta),
        }
    }
}

/// One row of the ledger, as loaded from a snapshot or fed to `bulk_upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub points: i64,
    pub total_vouches: i64,
}

impl LedgerEntry {
    pub fn new(user_id: UserId, points: i64, total_vouches: i64) -> Self {
        Self { user_id, points, total_vouches }
    }

    /// The same entry with both counters clamped at zero.
    pub fn clamped(self) -> Self {
        Self {
            user_id: self.user_id,
            points: self.points.max(0),
            total_vouches: self.total_vouches.max(0),
        }
    }

    pub fn stats(&self) -> VouchStats {
        VouchStats::new(self.points, self.total_vouches)
    }
}

impl From<(UserId, i64, i64)> for LedgerEntry {
    fn from((user_id, points, total_vouches): (UserId, i64, i64)) -> Self {
        Self::new(user_id, points, total_vouches)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Standing {
    pub user_id: UserId,
    pub points: i64,
}

impl Standing {
    pub fn new(user_id: UserId, points: i64) -> Self {
        Self { user_id, points }
    }
}

/// Sorts standings by points descending, then user id ascending, and keeps
/// the first `limit`.
pub fn rank(mut standings: Vec<Standing>, limit: usize) -> Vec<Standing> {
    standings.sort_by(|a, b| b.points.cmp(&a.points).then(a.user_id.cmp(&b.user_id)));
    standings.truncate(limit);
    standings
}

/// A ranked leaderboard, ready to print.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Leaderboard(pub Vec<Standing>);

impl Leaderboard {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Standing>> for Leaderboard {
    fn from(standings: Vec<Standing>) -> Self {
        Self(standings)
    }
}

impl Display for Leaderboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("No vouches recorded yet.\n");
        }

        let mut table = Table::new();
        table.add_row(row!["Rank", "User", "Points"]);
        table.add_empty_row();

        for (i, standing) in self.0.iter().enumerate() {
            table.add_row(row![format!("#{}", i + 1), standing.user_id, standing.points]);
        }

        write!(f, "\n{}\n", table)
    }
}
