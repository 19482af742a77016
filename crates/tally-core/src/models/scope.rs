//! Synchronization scope

/// Scope key used for shared books so every member observes one stream
pub const SHARED_SCOPE_KEY: i64 = 0;

/// Who a scope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Private book owned by a single user
    Personal(i64),
    /// Multi-member book; all members share one stream
    Shared,
}

/// The unit of synchronization: a book plus a scope key.
///
/// Resolved once by access control and passed down; never derived again
/// inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScope {
    pub book_id: i64,
    pub kind: ScopeKind,
}

impl SyncScope {
    #[must_use]
    pub const fn personal(book_id: i64, owner_id: i64) -> Self {
        Self {
            book_id,
            kind: ScopeKind::Personal(owner_id),
        }
    }

    #[must_use]
    pub const fn shared(book_id: i64) -> Self {
        Self {
            book_id,
            kind: ScopeKind::Shared,
        }
    }

    /// Scope key column value: owner id for personal scopes, the shared
    /// sentinel otherwise.
    #[must_use]
    pub const fn scope_key(&self) -> i64 {
        match self.kind {
            ScopeKind::Personal(owner_id) => owner_id,
            ScopeKind::Shared => SHARED_SCOPE_KEY,
        }
    }

    /// Owner to filter record lookups by, if the scope is personal
    #[must_use]
    pub const fn owner_filter(&self) -> Option<i64> {
        match self.kind {
            ScopeKind::Personal(owner_id) => Some(owner_id),
            ScopeKind::Shared => None,
        }
    }
}
