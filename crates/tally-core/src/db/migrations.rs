//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // inside a transaction for atomicity

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Books and memberships (consumed by access control)
        "CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            owner_id INTEGER NOT NULL,
            is_shared INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS book_members (
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (book_id, user_id)
        )",
        // Versioned ledger records
        "CREATE TABLE IF NOT EXISTS bills (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            book_id INTEGER NOT NULL,
            account TEXT NOT NULL,
            category TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            remark TEXT NOT NULL DEFAULT '',
            bill_date INTEGER NOT NULL,
            counted INTEGER NOT NULL DEFAULT 1,
            pair_id INTEGER,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_bills_book ON bills(book_id, is_deleted)",
        "CREATE INDEX IF NOT EXISTS idx_bills_book_user ON bills(book_id, user_id, is_deleted)",
        // Append-only change log; change_id doubles as the pull cursor
        "CREATE TABLE IF NOT EXISTS sync_changes (
            change_id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL,
            scope_key INTEGER NOT NULL,
            bill_id INTEGER NOT NULL,
            op TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_changes_scope
            ON sync_changes(book_id, scope_key, change_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_changes_created ON sync_changes(created_at)",
        // Idempotency ledger: one immutable outcome per (caller, book, op id)
        "CREATE TABLE IF NOT EXISTS sync_ops (
            user_id INTEGER NOT NULL,
            book_id INTEGER NOT NULL,
            op_id TEXT NOT NULL,
            status TEXT NOT NULL,
            bill_id INTEGER,
            version INTEGER,
            error TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, book_id, op_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_ops_created ON sync_ops(created_at)",
        // Per-scope bootstrap flag; the PK is the seeding race guard
        "CREATE TABLE IF NOT EXISTS sync_scopes (
            book_id INTEGER NOT NULL,
            scope_key INTEGER NOT NULL,
            initialized INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (book_id, scope_key)
        )",
        // Shared id sequence for server-assigned and pre-allocated bill ids
        "CREATE TABLE IF NOT EXISTS id_blocks (
            name TEXT PRIMARY KEY,
            next_id INTEGER NOT NULL
        )",
        "INSERT OR IGNORE INTO id_blocks (name, next_id) VALUES ('bill', 1)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_v1_creates_sync_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["bills", "sync_changes", "sync_ops", "sync_scopes", "id_blocks"] {
            let mut rows = conn
                .query(
                    "SELECT EXISTS(
                        SELECT 1 FROM sqlite_master
                        WHERE type = 'table' AND name = ?
                    )",
                    libsql::params![table],
                )
                .await
                .unwrap();

            let exists = rows
                .next()
                .await
                .unwrap()
                .is_some_and(|row| row.get::<i32>(0).unwrap() != 0);

            assert!(exists, "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_v1_seeds_id_sequence() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT next_id FROM id_blocks WHERE name = 'bill'", ())
            .await
            .unwrap();
        let next: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(next, 1);
    }
}
