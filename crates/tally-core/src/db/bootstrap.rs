//! Per-scope bootstrap state store

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::SyncScope;

/// Trait for bootstrap state operations (async)
#[allow(async_fn_in_trait)]
pub trait BootstrapStore {
    /// Claim the right to seed the scope's change log.
    ///
    /// The insert is guarded by the primary key, so exactly one of any
    /// number of racing callers gets `true`; losers read whatever state the
    /// winner produces.
    async fn try_claim(&self, scope: &SyncScope) -> Result<bool>;

    /// Whether the scope's log has been seeded
    async fn is_initialized(&self, scope: &SyncScope) -> Result<bool>;

    /// Flip the scope to initialized (false -> true, once)
    async fn mark_initialized(&self, scope: &SyncScope) -> Result<()>;
}

/// libSQL implementation of `BootstrapStore`
pub struct LibSqlBootstrapStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBootstrapStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl BootstrapStore for LibSqlBootstrapStore<'_> {
    async fn try_claim(&self, scope: &SyncScope) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sync_scopes (book_id, scope_key, initialized, created_at) \
                 VALUES (?, ?, 0, ?)",
                params![scope.book_id, scope.scope_key(), now],
            )
            .await?;

        Ok(inserted == 1)
    }

    async fn is_initialized(&self, scope: &SyncScope) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT initialized FROM sync_scopes WHERE book_id = ? AND scope_key = ?",
                params![scope.book_id, scope.scope_key()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i32>(0)? != 0),
            None => Ok(false),
        }
    }

    async fn mark_initialized(&self, scope: &SyncScope) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_scopes SET initialized = 1 WHERE book_id = ? AND scope_key = ?",
                params![scope.book_id, scope.scope_key()],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn claim_succeeds_exactly_once() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlBootstrapStore::new(db.connection());
        let scope = SyncScope::shared(1);

        assert!(store.try_claim(&scope).await.unwrap());
        assert!(!store.try_claim(&scope).await.unwrap());
        assert!(!store.is_initialized(&scope).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_initialized_flips_flag() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlBootstrapStore::new(db.connection());
        let scope = SyncScope::personal(1, 9);

        assert!(!store.is_initialized(&scope).await.unwrap());
        store.try_claim(&scope).await.unwrap();
        store.mark_initialized(&scope).await.unwrap();
        assert!(store.is_initialized(&scope).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scopes_are_independent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlBootstrapStore::new(db.connection());

        assert!(store.try_claim(&SyncScope::shared(1)).await.unwrap());
        assert!(store.try_claim(&SyncScope::personal(1, 5)).await.unwrap());
        assert!(store.try_claim(&SyncScope::shared(2)).await.unwrap());
    }
}
