//! Scope resolution and access control

use libsql::Connection;

use crate::db::{BookStore, LibSqlBookStore};
use crate::error::{Error, Result};
use crate::models::SyncScope;

/// Resolves whether a caller may act within a book and under which scope.
///
/// The resolved `SyncScope` is the only scope descriptor the coordinator
/// ever sees; push, pull, summary and activity all start here.
pub struct AccessControl<'a> {
    books: LibSqlBookStore<'a>,
}

impl<'a> AccessControl<'a> {
    /// Create an access control resolver over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            books: LibSqlBookStore::new(conn),
        }
    }

    /// Resolve the caller's scope for a book.
    ///
    /// A book id not present in the directory is a device-local private
    /// book belonging solely to the caller. Registered shared books
    /// require an active membership; registered private books require
    /// ownership.
    pub async fn resolve(&self, caller_id: i64, book_id: i64) -> Result<SyncScope> {
        let Some(book) = self.books.get(book_id).await? else {
            return Ok(SyncScope::personal(book_id, caller_id));
        };

        if book.is_shared {
            if book.owner_id == caller_id
                || self.books.is_active_member(book_id, caller_id).await?
            {
                return Ok(SyncScope::shared(book_id));
            }
            return Err(Error::Forbidden(format!(
                "user {caller_id} is not a member of book {book_id}"
            )));
        }

        if book.owner_id == caller_id {
            Ok(SyncScope::personal(book_id, book.owner_id))
        } else {
            Err(Error::Forbidden(format!(
                "user {caller_id} does not own book {book_id}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ScopeKind;

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_book_is_personal_to_caller() {
        let db = Database::open_in_memory().await.unwrap();
        let access = AccessControl::new(db.connection());

        let scope = access.resolve(7, 999).await.unwrap();
        assert_eq!(scope, SyncScope::personal(999, 7));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shared_book_admits_owner_and_members_only() {
        let db = Database::open_in_memory().await.unwrap();
        let books = LibSqlBookStore::new(db.connection());
        let book = books.create("family", 1, true).await.unwrap();
        books.add_member(book.id, 2).await.unwrap();

        let access = AccessControl::new(db.connection());
        assert_eq!(access.resolve(1, book.id).await.unwrap().kind, ScopeKind::Shared);
        assert_eq!(access.resolve(2, book.id).await.unwrap().kind, ScopeKind::Shared);

        let denied = access.resolve(3, book.id).await.unwrap_err();
        assert!(matches!(denied, Error::Forbidden(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inactive_member_is_denied() {
        let db = Database::open_in_memory().await.unwrap();
        let books = LibSqlBookStore::new(db.connection());
        let book = books.create("family", 1, true).await.unwrap();
        books.add_member(book.id, 2).await.unwrap();
        books.remove_member(book.id, 2).await.unwrap();

        let access = AccessControl::new(db.connection());
        assert!(access.resolve(2, book.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registered_private_book_requires_ownership() {
        let db = Database::open_in_memory().await.unwrap();
        let books = LibSqlBookStore::new(db.connection());
        let book = books.create("mine", 1, false).await.unwrap();

        let access = AccessControl::new(db.connection());
        assert_eq!(
            access.resolve(1, book.id).await.unwrap(),
            SyncScope::personal(book.id, 1)
        );
        assert!(access.resolve(2, book.id).await.is_err());
    }
}
