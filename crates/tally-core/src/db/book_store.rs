//! Book and membership directory

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::Book;

/// Trait for book directory operations (async)
#[allow(async_fn_in_trait)]
pub trait BookStore {
    /// Fetch a book by id
    async fn get(&self, book_id: i64) -> Result<Option<Book>>;

    /// Create a book; shared books accept members via `add_member`
    async fn create(&self, name: &str, owner_id: i64, is_shared: bool) -> Result<Book>;

    /// Add (or re-activate) a member of a shared book
    async fn add_member(&self, book_id: i64, user_id: i64) -> Result<()>;

    /// Deactivate a member without losing the join record
    async fn remove_member(&self, book_id: i64, user_id: i64) -> Result<()>;

    /// Whether the user is an active member of the book
    async fn is_active_member(&self, book_id: i64, user_id: i64) -> Result<bool>;
}

/// libSQL implementation of `BookStore`
pub struct LibSqlBookStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBookStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_book(row: &Row) -> Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            is_shared: row.get::<i32>(3)? != 0,
            created_at: row.get(4)?,
        })
    }
}

impl BookStore for LibSqlBookStore<'_> {
    async fn get(&self, book_id: i64) -> Result<Option<Book>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, owner_id, is_shared, created_at FROM books WHERE id = ?",
                params![book_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_book(&row)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, name: &str, owner_id: i64, is_shared: bool) -> Result<Book> {
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO books (name, owner_id, is_shared, created_at) VALUES (?, ?, ?, ?)",
                params![name, owner_id, i32::from(is_shared), now],
            )
            .await?;

        Ok(Book {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            owner_id,
            is_shared,
            created_at: now,
        })
    }

    async fn add_member(&self, book_id: i64, user_id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO book_members (book_id, user_id, is_active, joined_at) \
                 VALUES (?, ?, 1, ?) \
                 ON CONFLICT (book_id, user_id) DO UPDATE SET is_active = 1",
                params![book_id, user_id, now],
            )
            .await?;
        Ok(())
    }

    async fn remove_member(&self, book_id: i64, user_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE book_members SET is_active = 0 WHERE book_id = ? AND user_id = ?",
                params![book_id, user_id],
            )
            .await?;
        Ok(())
    }

    async fn is_active_member(&self, book_id: i64, user_id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT is_active FROM book_members WHERE book_id = ? AND user_id = ?",
                params![book_id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i32>(0)? != 0),
            None => Ok(false),
        }
    }
}
