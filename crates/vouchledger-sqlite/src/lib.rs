use std::{sync::RwLock, time::Duration};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use vouchledger_core::{
    from_db_id, to_db_id, LedgerBackend, LedgerEntry, LedgerError, RelationalLedger, Standing,
    UserId, VouchStats,
};

const MEMORY_PATH: &str = ":memory:";

pub struct SqliteLedger {
    path: String,
    max_pool_size: u32,
    pool: RwLock<Option<Pool<SqliteConnectionManager>>>,
}

impl SqliteLedger {
    /// `path` is a database file, or `:memory:` for a private in-memory
    /// database (which pins the pool to a single connection).
    pub fn new(path: &str, max_pool_size: u32) -> Self {
        Self {
            path: path.to_string(),
            max_pool_size: max_pool_size.max(1),
            pool: RwLock::new(None),
        }
    }

    fn build_pool(&self) -> Result<Pool<SqliteConnectionManager>, LedgerError> {
        let in_memory = self.path == MEMORY_PATH;
        let manager = if in_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&self.path)
        }
        .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA journal_mode=WAL;"));

        let builder = Pool::builder().connection_timeout(Duration::from_secs(10));
        // An in-memory database lives exactly as long as its one connection.
        let builder = if in_memory {
            builder.max_size(1).idle_timeout(None).max_lifetime(None)
        } else {
            builder.max_size(self.max_pool_size)
        };

        builder
            .build(manager)
            .map_err(|e| LedgerError::Connection(format!("SQLite pool failed: {}", e)))
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vouches (
                user_id INTEGER PRIMARY KEY,
                points INTEGER NOT NULL DEFAULT 0
            );
            ",
        )
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        // Tables created before vouch counting existed lack this column.
        let has_total_vouches = conn
            .query_row(
                "SELECT 1 FROM pragma_table_info('vouches') WHERE name = 'total_vouches'",
                [],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| LedgerError::Database(e.to_string()))?
            .is_some();
        if !has_total_vouches {
            conn.execute_batch(
                "ALTER TABLE vouches ADD COLUMN total_vouches INTEGER NOT NULL DEFAULT 0",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
            tracing::info!("Added total_vouches column to vouches table");
        }
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, LedgerError> {
        let pool = self.pool.read().unwrap();
        let pool = pool.as_ref().ok_or(LedgerError::NotInitialized)?;
        pool.get()
            .map_err(|e| LedgerError::Connection(e.to_string()))
    }
}

impl LedgerBackend for SqliteLedger {
    fn init(&self) -> Result<(), LedgerError> {
        let mut slot = self.pool.write().unwrap();
        if slot.is_some() {
            return Ok(());
        }

        let pool = self.build_pool()?;
        {
            let conn = pool
                .get()
                .map_err(|e| LedgerError::Connection(e.to_string()))?;
            Self::init_schema(&conn)?;
        }
        tracing::info!(path = %self.path, "SQLite ledger ready");
        *slot = Some(pool);
        Ok(())
    }

    fn get_points(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.get_stats(user_id)?.points)
    }

    fn get_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError> {
        let id = to_db_id(user_id)?;
        let conn = self.conn()?;
        let stats = conn
            .query_row(
                "SELECT points, total_vouches FROM vouches WHERE user_id = ?1",
                params![id],
                |r| Ok(VouchStats::new(r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(stats.unwrap_or_default())
    }

    fn add_points(&self, user_id: UserId, delta: i64) -> Result<i64, LedgerError> {
        let id = to_db_id(user_id)?;
        let conn = self.conn()?;
        let points: i64 = conn
            .query_row(
                "INSERT INTO vouches (user_id, points, total_vouches)
                 VALUES (?1, MAX(0, ?2), 0)
                 ON CONFLICT (user_id) DO UPDATE SET points = CASE
                     WHEN points > 9223372036854775807 - MAX(?2, 0) THEN 9223372036854775807
                     ELSE MAX(0, points + ?2)
                 END
                 RETURNING points",
                params![id, delta],
                |r| r.get(0),
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        tracing::debug!(user_id, delta, points, "Points updated");
        Ok(points)
    }

    fn add_vouch(
        &self,
        user_id: UserId,
        points_delta: i64,
        vouches_delta: i64,
    ) -> Result<VouchStats, LedgerError> {
        let id = to_db_id(user_id)?;
        let conn = self.conn()?;
        let stats = conn
            .query_row(
                "INSERT INTO vouches (user_id, points, total_vouches)
                 VALUES (?1, MAX(0, ?2), MAX(0, ?3))
                 ON CONFLICT (user_id) DO UPDATE SET
                     points = CASE
                         WHEN points > 9223372036854775807 - MAX(?2, 0) THEN 9223372036854775807
                         ELSE MAX(0, points + ?2)
                     END,
                     total_vouches = CASE
                         WHEN total_vouches > 9223372036854775807 - MAX(?3, 0) THEN 9223372036854775807
                         ELSE MAX(0, total_vouches + ?3)
                     END
                 RETURNING points, total_vouches",
                params![id, points_delta, vouches_delta],
                |r| Ok(VouchStats::new(r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
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
        let conn = self.conn()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn
            .prepare(
                "SELECT user_id, points FROM vouches
                 ORDER BY points DESC, user_id ASC
                 LIMIT ?1",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            let (id, points) = row.map_err(|e| LedgerError::Database(e.to_string()))?;
            result.push(Standing::new(from_db_id(id)?, points));
        }
        Ok(result)
    }

    fn bulk_upsert(&self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        if rows.is_empty() {
            return Ok(());
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO vouches (user_id, points, total_vouches)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (user_id) DO UPDATE SET
                         points = excluded.points,
                         total_vouches = excluded.total_vouches",
                )
                .map_err(|e| LedgerError::Database(e.to_string()))?;
            for row in rows {
                let row = row.clamped();
                stmt.execute(params![to_db_id(row.user_id)?, row.points, row.total_vouches])
                    .map_err(|e| LedgerError::Database(e.to_string()))?;
            }
        }
        tx.commit()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        tracing::info!(rows = rows.len(), "Bulk upsert committed");
        Ok(())
    }
}

impl RelationalLedger for SqliteLedger {
    fn count_rows(&self) -> Result<u64, LedgerError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vouches", [], |r| r.get(0))
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
