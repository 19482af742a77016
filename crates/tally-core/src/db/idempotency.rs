//! Idempotency ledger store

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{OpOutcome, OpStatus};

/// Trait for idempotency ledger operations (async)
#[allow(async_fn_in_trait)]
pub trait IdempotencyStore {
    /// Stored outcome for (caller, book, op id), if any
    async fn get(&self, user_id: i64, book_id: i64, op_id: &str) -> Result<Option<OpOutcome>>;

    /// Record an outcome exactly once.
    ///
    /// A concurrent duplicate keeps the first writer's record; the row is
    /// immutable afterwards.
    async fn record(&self, outcome: &OpOutcome) -> Result<()>;

    /// Delete outcomes recorded before the cutoff; returns rows removed
    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// libSQL implementation of `IdempotencyStore`
pub struct LibSqlIdempotencyStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlIdempotencyStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_outcome(row: &Row) -> Result<OpOutcome> {
        Ok(OpOutcome {
            user_id: row.get(0)?,
            book_id: row.get(1)?,
            op_id: row.get(2)?,
            status: OpStatus::try_from_str(&row.get::<String>(3)?)?,
            bill_id: opt_i64(row, 4)?,
            version: opt_i64(row, 5)?,
            error: opt_text(row, 6)?,
            created_at: row.get(7)?,
        })
    }
}

fn opt_i64(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected integer or null, got {other:?}"
        ))),
    }
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected text or null, got {other:?}"
        ))),
    }
}

impl IdempotencyStore for LibSqlIdempotencyStore<'_> {
    async fn get(&self, user_id: i64, book_id: i64, op_id: &str) -> Result<Option<OpOutcome>> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, book_id, op_id, status, bill_id, version, error, created_at \
                 FROM sync_ops \
                 WHERE user_id = ? AND book_id = ? AND op_id = ?",
                params![user_id, book_id, op_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_outcome(&row)?)),
            None => Ok(None),
        }
    }

    async fn record(&self, outcome: &OpOutcome) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO sync_ops \
                 (user_id, book_id, op_id, status, bill_id, version, error, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    outcome.user_id,
                    outcome.book_id,
                    outcome.op_id.as_str(),
                    outcome.status.as_str(),
                    outcome.bill_id,
                    outcome.version,
                    outcome.error.as_deref(),
                    outcome.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sync_ops WHERE created_at < ?",
                params![cutoff_ms],
            )
            .await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn record_then_get_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlIdempotencyStore::new(db.connection());

        let outcome = OpOutcome::applied(1, 2, "op-1", 100, 3);
        store.record(&outcome).await.unwrap();

        let stored = store.get(1, 2, "op-1").await.unwrap().unwrap();
        assert_eq!(stored, outcome);
        assert!(store.get(1, 2, "op-2").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_write_wins() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlIdempotencyStore::new(db.connection());

        store
            .record(&OpOutcome::applied(1, 2, "op-1", 100, 1))
            .await
            .unwrap();
        store
            .record(&OpOutcome::error(1, 2, "op-1", "late duplicate"))
            .await
            .unwrap();

        let stored = store.get(1, 2, "op-1").await.unwrap().unwrap();
        assert_eq!(stored.status, OpStatus::Applied);
        assert_eq!(stored.bill_id, Some(100));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_outcome_preserves_detail() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlIdempotencyStore::new(db.connection());

        store
            .record(&OpOutcome::error(1, 2, "op-err", "bill 9 not found"))
            .await
            .unwrap();

        let stored = store.get(1, 2, "op-err").await.unwrap().unwrap();
        assert_eq!(stored.status, OpStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("bill 9 not found"));
        assert!(stored.bill_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_removes_only_old_outcomes() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlIdempotencyStore::new(db.connection());

        let mut old = OpOutcome::applied(1, 2, "op-old", 100, 1);
        old.created_at = 5;
        store.record(&old).await.unwrap();
        store
            .record(&OpOutcome::applied(1, 2, "op-new", 101, 1))
            .await
            .unwrap();

        let removed = store.purge_older_than(1_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(1, 2, "op-old").await.unwrap().is_none());
        assert!(store.get(1, 2, "op-new").await.unwrap().is_some());
    }
}
