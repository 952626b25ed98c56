use std::{sync::RwLock, time::Duration};

use postgres::NoTls;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use vouchledger_core::{
    from_db_id, to_db_id, LedgerBackend, LedgerEntry, LedgerError, RelationalLedger, Standing,
    UserId, VouchStats,
};

type Manager = PostgresConnectionManager<NoTls>;

pub struct PostgresLedger {
    connection_string: String,
    max_pool_size: u32,
    pool: RwLock<Option<Pool<Manager>>>,
}

impl PostgresLedger {
    pub fn new(connection_string: &str, max_pool_size: u32) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            max_pool_size: max_pool_size.max(1),
            pool: RwLock::new(None),
        }
    }

    fn build_pool(&self) -> Result<Pool<Manager>, LedgerError> {
        let config = self
            .connection_string
            .parse::<postgres::Config>()
            .map_err(|e| LedgerError::Connection(format!("invalid PostgreSQL connection string: {}", e)))?;
        let manager = PostgresConnectionManager::new(config, NoTls);

        Pool::builder()
            .max_size(self.max_pool_size)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .map_err(|e| LedgerError::Connection(format!("PostgreSQL connection failed: {}", e)))
    }

    fn init_schema(client: &mut postgres::Client) -> Result<(), LedgerError> {
        client
            .batch_execute(
                "
            CREATE TABLE IF NOT EXISTS vouches (
                user_id BIGINT PRIMARY KEY,
                points BIGINT NOT NULL DEFAULT 0
            );

            ALTER TABLE vouches
                ADD COLUMN IF NOT EXISTS total_vouches BIGINT NOT NULL DEFAULT 0;
            ",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(())
    }

    fn client(&self) -> Result<PooledConnection<Manager>, LedgerError> {
        let pool = self.pool.read().unwrap();
        let pool = pool.as_ref().ok_or(LedgerError::NotInitialized)?;
        pool.get()
            .map_err(|e| LedgerError::Connection(e.to_string()))
    }
}

impl LedgerBackend for PostgresLedger {
    fn init(&self) -> Result<(), LedgerError> {
        let mut slot = self.pool.write().unwrap();
        if slot.is_some() {
            return Ok(());
        }

        let pool = self.build_pool()?;
        {
            let mut client = pool
                .get()
                .map_err(|e| LedgerError::Connection(e.to_string()))?;
            Self::init_schema(&mut client)?;
        }
        tracing::info!(pool_size = self.max_pool_size, "PostgreSQL ledger ready");
        *slot = Some(pool);
        Ok(())
    }

    fn get_points(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.get_stats(user_id)?.points)
    }

    fn get_stats(&self, user_id: UserId) -> Result<VouchStats, LedgerError> {
        let id = to_db_id(user_id)?;
        let mut client = self.client()?;
        let row = client
            .query_opt(
                "SELECT points, total_vouches FROM vouches WHERE user_id = $1",
                &[&id],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(row
            .map(|r| VouchStats::new(r.get(0), r.get(1)))
            .unwrap_or_default())
    }

    fn add_points(&self, user_id: UserId, delta: i64) -> Result<i64, LedgerError> {
        let id = to_db_id(user_id)?;
        let mut client = self.client()?;
        let row = client
            .query_one(
                "INSERT INTO vouches (user_id, points, total_vouches)
                 VALUES ($1, GREATEST(0, $2::BIGINT), 0)
                 ON CONFLICT (user_id) DO UPDATE SET points = CASE
                     WHEN vouches.points > 9223372036854775807 - GREATEST($2::BIGINT, 0)
                         THEN 9223372036854775807
                     ELSE GREATEST(0, vouches.points + $2::BIGINT)
                 END
                 RETURNING points",
                &[&id, &delta],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let points: i64 = row.get(0);
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
        let mut client = self.client()?;
        let row = client
            .query_one(
                "INSERT INTO vouches (user_id, points, total_vouches)
                 VALUES ($1, GREATEST(0, $2::BIGINT), GREATEST(0, $3::BIGINT))
                 ON CONFLICT (user_id) DO UPDATE SET
                     points = CASE
                         WHEN vouches.points > 9223372036854775807 - GREATEST($2::BIGINT, 0)
                             THEN 9223372036854775807
                         ELSE GREATEST(0, vouches.points + $2::BIGINT)
                     END,
                     total_vouches = CASE
                         WHEN vouches.total_vouches > 9223372036854775807 - GREATEST($3::BIGINT, 0)
                             THEN 9223372036854775807
                         ELSE GREATEST(0, vouches.total_vouches + $3::BIGINT)
                     END
                 RETURNING points, total_vouches",
                &[&id, &points_delta, &vouches_delta],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let stats = VouchStats::new(row.get(0), row.get(1));
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
        let mut client = self.client()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = client
            .query(
                "SELECT user_id, points FROM vouches
                 ORDER BY points DESC, user_id ASC
                 LIMIT $1",
                &[&limit],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(Standing::new(from_db_id(row.get(0))?, row.get(1)));
        }
        Ok(result)
    }

    fn bulk_upsert(&self, rows: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut client = self.client()?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = client
            .transaction()
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let stmt = tx
            .prepare(
                "INSERT INTO vouches (user_id, points, total_vouches)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (user_id) DO UPDATE SET
                     points = EXCLUDED.points,
                     total_vouches = EXCLUDED.total_vouches",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        for row in rows {
            let row = row.clamped();
            let id = to_db_id(row.user_id)?;
            tx.execute(&stmt, &[&id, &row.points, &row.total_vouches])
                .map_err(|e| LedgerError::Database(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        tracing::info!(rows = rows.len(), "Bulk upsert committed");
        Ok(())
    }
}

impl RelationalLedger for PostgresLedger {
    fn count_rows(&self) -> Result<u64, LedgerError> {
        let mut client = self.client()?;
        let row = client
            .query_one("SELECT COUNT(*) FROM vouches", &[])
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    /// Connection string for a disposable database; the tests are skipped
    /// when it is not set.
    fn test_url() -> Option<String> {
        std::env::var("VOUCHLEDGER_TEST_POSTGRES_URL").ok()
    }

    fn open_clean(url: &str) -> PostgresLedger {
        let ledger = PostgresLedger::new(url, 4);
        ledger.init().unwrap();
        let mut client = ledger.client().unwrap();
        client.batch_execute("TRUNCATE vouches").unwrap();
        ledger
    }

    #[test]
    fn calls_before_init_fail() {
        let ledger = PostgresLedger::new("host=localhost user=postgres", 1);
        assert!(matches!(ledger.get_points(1), Err(LedgerError::NotInitialized)));
        assert!(matches!(ledger.top(5), Err(LedgerError::NotInitialized)));
    }

    #[test]
    fn invalid_connection_string_is_a_connection_error() {
        let ledger = PostgresLedger::new("host=localhost port=notaport", 1);
        assert!(matches!(ledger.init(), Err(LedgerError::Connection(_))));
        assert!(matches!(ledger.get_points(1), Err(LedgerError::NotInitialized)));
    }

    // The remaining tests share one table, so they run as a single test.
    #[test]
    fn postgres_ledger_end_to_end() {
        let Some(url) = test_url() else {
            eprintln!("VOUCHLEDGER_TEST_POSTGRES_URL not set, skipping");
            return;
        };
        let ledger = Arc::new(open_clean(&url));
        ledger.init().unwrap();

        assert_eq!(ledger.add_points(1, -1_000_000).unwrap(), 0);
        assert_eq!(ledger.add_vouch(2, 3, 1).unwrap(), VouchStats::new(3, 1));
        assert_eq!(ledger.add_vouch(2, -5, -1).unwrap(), VouchStats::new(0, 0));
        assert_eq!(ledger.count_rows().unwrap(), 2);

        ledger
            .bulk_upsert(&[LedgerEntry::new(1, 10, 2), LedgerEntry::new(2, 5, 1)])
            .unwrap();
        assert_eq!(ledger.top(2).unwrap(), vec![Standing::new(1, 10), Standing::new(2, 5)]);
        assert!(ledger.top(0).unwrap().is_empty());

        assert_eq!(ledger.add_points(4, i64::MAX).unwrap(), i64::MAX);
        assert_eq!(ledger.add_points(4, 1).unwrap(), i64::MAX);
        assert_eq!(ledger.add_vouch(4, 1, i64::MAX).unwrap(), VouchStats::new(i64::MAX, i64::MAX));
        assert_eq!(ledger.add_vouch(4, 1, 1).unwrap(), VouchStats::new(i64::MAX, i64::MAX));
        assert_eq!(ledger.top(1).unwrap(), vec![Standing::new(4, i64::MAX)]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        ledger.add_points(3, 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.get_stats(3).unwrap(), VouchStats::new(100, 0));
    }
}
