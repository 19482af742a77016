//! Bill id allocation

use libsql::{params, Connection};

use crate::error::{Error, Result};

/// An inclusive range of pre-allocated bill ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IdBlock {
    pub start: i64,
    pub end: i64,
}

/// Trait for id allocation operations (async)
#[allow(async_fn_in_trait)]
pub trait IdAllocator {
    /// Reserve `count` consecutive ids.
    ///
    /// Server-side record creation draws from the same sequence, so blocks
    /// handed to devices never collide with server-assigned ids.
    async fn allocate(&self, count: i64) -> Result<IdBlock>;
}

/// libSQL implementation of `IdAllocator`
pub struct LibSqlIdAllocator<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlIdAllocator<'a> {
    /// Create a new allocator with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IdAllocator for LibSqlIdAllocator<'_> {
    async fn allocate(&self, count: i64) -> Result<IdBlock> {
        if count < 1 {
            return Err(Error::InvalidInput(
                "id block size must be at least 1".to_string(),
            ));
        }

        // Single conditional write; the returned value fixes the block bounds
        let mut rows = self
            .conn
            .query(
                "UPDATE id_blocks SET next_id = next_id + ? WHERE name = 'bill' \
                 RETURNING next_id",
                params![count],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Err(Error::Database(
                "id sequence row is missing; database not migrated?".to_string(),
            ));
        };
        let next_id: i64 = row.get(0)?;

        Ok(IdBlock {
            start: next_id - count,
            end: next_id - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn blocks_are_disjoint_and_ordered() {
        let db = Database::open_in_memory().await.unwrap();
        let alloc = LibSqlIdAllocator::new(db.connection());

        let first = alloc.allocate(10).await.unwrap();
        let second = alloc.allocate(5).await.unwrap();

        assert_eq!(first.end - first.start + 1, 10);
        assert_eq!(second.end - second.start + 1, 5);
        assert!(second.start > first.end);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_non_positive_count() {
        let db = Database::open_in_memory().await.unwrap();
        let alloc = LibSqlIdAllocator::new(db.connection());

        assert!(alloc.allocate(0).await.is_err());
        assert!(alloc.allocate(-3).await.is_err());
    }
}
