//! Append-only change log store

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{ChangeLogEntry, ChangeOp, SyncScope};

/// Trait for change log storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ChangeLogStore {
    /// Append one entry and return its assigned change id
    async fn append(
        &self,
        scope: &SyncScope,
        bill_id: i64,
        op: ChangeOp,
        version: i64,
    ) -> Result<i64>;

    /// Entries with change id above the cursor, ascending
    async fn list_after(&self, scope: &SyncScope, after: i64, limit: i64)
        -> Result<Vec<ChangeLogEntry>>;

    /// Most recent entries below the cursor, descending (activity feed)
    async fn list_before(
        &self,
        scope: &SyncScope,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChangeLogEntry>>;

    /// Highest change id in scope, 0 when the log is empty
    async fn max_change_id(&self, scope: &SyncScope) -> Result<i64>;

    /// Number of entries in scope
    async fn count(&self, scope: &SyncScope) -> Result<i64>;

    /// Delete entries created before the cutoff; returns rows removed
    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// libSQL implementation of `ChangeLogStore`
pub struct LibSqlChangeLogStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlChangeLogStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<ChangeLogEntry> {
        Ok(ChangeLogEntry {
            change_id: row.get(0)?,
            book_id: row.get(1)?,
            scope_key: row.get(2)?,
            bill_id: row.get(3)?,
            op: ChangeOp::try_from_str(&row.get::<String>(4)?)?,
            version: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl ChangeLogStore for LibSqlChangeLogStore<'_> {
    async fn append(
        &self,
        scope: &SyncScope,
        bill_id: i64,
        op: ChangeOp,
        version: i64,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO sync_changes (book_id, scope_key, bill_id, op, version, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    scope.book_id,
                    scope.scope_key(),
                    bill_id,
                    op.as_str(),
                    version,
                    now
                ],
            )
            .await?;

        Ok(self.conn.last_insert_rowid())
    }

    async fn list_after(
        &self,
        scope: &SyncScope,
        after: i64,
        limit: i64,
    ) -> Result<Vec<ChangeLogEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT change_id, book_id, scope_key, bill_id, op, version, created_at \
                 FROM sync_changes \
                 WHERE book_id = ? AND scope_key = ? AND change_id > ? \
                 ORDER BY change_id ASC \
                 LIMIT ?",
                params![scope.book_id, scope.scope_key(), after, limit],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn list_before(
        &self,
        scope: &SyncScope,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChangeLogEntry>> {
        let cursor = match before {
            Some(value) if value > 0 => value,
            _ => i64::MAX,
        };

        let mut rows = self
            .conn
            .query(
                "SELECT change_id, book_id, scope_key, bill_id, op, version, created_at \
                 FROM sync_changes \
                 WHERE book_id = ? AND scope_key = ? AND change_id < ? \
                 ORDER BY change_id DESC \
                 LIMIT ?",
                params![scope.book_id, scope.scope_key(), cursor, limit],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn max_change_id(&self, scope: &SyncScope) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(change_id), 0) FROM sync_changes \
                 WHERE book_id = ? AND scope_key = ?",
                params![scope.book_id, scope.scope_key()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn count(&self, scope: &SyncScope) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_changes WHERE book_id = ? AND scope_key = ?",
                params![scope.book_id, scope.scope_key()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn purge_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sync_changes WHERE created_at < ?",
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
    async fn append_assigns_increasing_change_ids() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlChangeLogStore::new(db.connection());
        let scope = SyncScope::shared(1);

        let first = store.append(&scope, 100, ChangeOp::Upsert, 1).await.unwrap();
        let second = store.append(&scope, 101, ChangeOp::Upsert, 1).await.unwrap();
        assert!(second > first);
        assert_eq!(store.max_change_id(&scope).await.unwrap(), second);
        assert_eq!(store.count(&scope).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_after_pages_in_ascending_order() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlChangeLogStore::new(db.connection());
        let scope = SyncScope::shared(1);

        for bill_id in 1..=5 {
            store.append(&scope, bill_id, ChangeOp::Upsert, 1).await.unwrap();
        }

        let page = store.list_after(&scope, 0, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].change_id < w[1].change_id));

        let rest = store
            .list_after(&scope, page.last().unwrap().change_id, 3)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest[0].change_id > page.last().unwrap().change_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_after_is_scoped() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlChangeLogStore::new(db.connection());

        let shared = SyncScope::shared(1);
        let personal = SyncScope::personal(1, 7);
        store.append(&shared, 100, ChangeOp::Upsert, 1).await.unwrap();
        store.append(&personal, 200, ChangeOp::Upsert, 1).await.unwrap();

        let entries = store.list_after(&personal, 0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].bill_id, 200);
        assert_eq!(entries[0].scope_key, 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_before_returns_recent_first() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlChangeLogStore::new(db.connection());
        let scope = SyncScope::shared(1);

        for bill_id in 1..=4 {
            store.append(&scope, bill_id, ChangeOp::Upsert, 1).await.unwrap();
        }

        let recent = store.list_before(&scope, None, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].change_id > recent[1].change_id);

        let earlier = store
            .list_before(&scope, Some(recent[1].change_id), 10)
            .await
            .unwrap();
        assert_eq!(earlier.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_removes_only_old_entries() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlChangeLogStore::new(db.connection());
        let scope = SyncScope::shared(1);

        db.connection()
            .execute(
                "INSERT INTO sync_changes (book_id, scope_key, bill_id, op, version, created_at) \
                 VALUES (1, 0, 100, 'upsert', 1, 5)",
                (),
            )
            .await
            .unwrap();
        store.append(&scope, 101, ChangeOp::Upsert, 1).await.unwrap();

        let removed = store.purge_older_than(1_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(&scope).await.unwrap(), 1);
    }
}
