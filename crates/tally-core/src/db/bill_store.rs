//! Versioned bill store with optimistic-locked writes

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Bill, BillDraft, BillKind, SyncScope};

const BILL_COLUMNS: &str = "id, user_id, book_id, account, category, amount_cents, kind, remark, \
     bill_date, counted, pair_id, is_deleted, version, created_at, updated_at";

/// Trait for versioned record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait BillStore {
    /// Insert a new bill at version 1 under a pre-allocated id
    async fn create(&self, id: i64, user_id: i64, book_id: i64, draft: &BillDraft)
        -> Result<Bill>;

    /// Fetch a bill by id within a scope, soft-deleted rows included
    async fn get(&self, scope: &SyncScope, bill_id: i64) -> Result<Option<Bill>>;

    /// Conditionally overwrite a bill's body.
    ///
    /// The write succeeds only if the stored version still equals
    /// `expected_version`; returns whether a row was updated.
    async fn cas_update(
        &self,
        scope: &SyncScope,
        bill_id: i64,
        expected_version: i64,
        draft: &BillDraft,
    ) -> Result<bool>;

    /// Conditionally soft-delete a bill, same discipline as `cas_update`
    async fn cas_delete(&self, scope: &SyncScope, bill_id: i64, expected_version: i64)
        -> Result<bool>;

    /// Live bills in scope that have no change log entry yet (bootstrap seed set)
    async fn live_without_log_entry(&self, scope: &SyncScope) -> Result<Vec<Bill>>;
}

/// libSQL implementation of `BillStore`
pub struct LibSqlBillStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBillStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_bill(row: &Row) -> Result<Bill> {
        Ok(Bill {
            id: row.get(0)?,
            user_id: row.get(1)?,
            book_id: row.get(2)?,
            account: row.get(3)?,
            category: row.get(4)?,
            amount_cents: row.get(5)?,
            kind: BillKind::from_i64(row.get(6)?)?,
            remark: row.get(7)?,
            bill_date: row.get(8)?,
            counted: row.get::<i32>(9)? != 0,
            pair_id: opt_i64(row, 10)?,
            is_deleted: row.get::<i32>(11)? != 0,
            version: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
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

impl BillStore for LibSqlBillStore<'_> {
    async fn create(
        &self,
        id: i64,
        user_id: i64,
        book_id: i64,
        draft: &BillDraft,
    ) -> Result<Bill> {
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO bills (id, user_id, book_id, account, category, amount_cents, kind, \
                 remark, bill_date, counted, pair_id, is_deleted, version, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?, ?)",
                params![
                    id,
                    user_id,
                    book_id,
                    draft.account.as_str(),
                    draft.category.as_str(),
                    draft.amount_cents,
                    draft.kind.as_i64(),
                    draft.remark.as_str(),
                    draft.bill_date,
                    i32::from(draft.counted),
                    draft.pair_id,
                    now,
                    now
                ],
            )
            .await?;

        Ok(Bill {
            id,
            user_id,
            book_id,
            account: draft.account.clone(),
            category: draft.category.clone(),
            amount_cents: draft.amount_cents,
            kind: draft.kind,
            remark: draft.remark.clone(),
            bill_date: draft.bill_date,
            counted: draft.counted,
            pair_id: draft.pair_id,
            is_deleted: false,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, scope: &SyncScope, bill_id: i64) -> Result<Option<Bill>> {
        let mut rows = match scope.owner_filter() {
            Some(owner_id) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {BILL_COLUMNS} FROM bills \
                             WHERE id = ? AND book_id = ? AND user_id = ?"
                        ),
                        params![bill_id, scope.book_id, owner_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = ? AND book_id = ?"),
                        params![bill_id, scope.book_id],
                    )
                    .await?
            }
        };

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_bill(&row)?)),
            None => Ok(None),
        }
    }

    async fn cas_update(
        &self,
        scope: &SyncScope,
        bill_id: i64,
        expected_version: i64,
        draft: &BillDraft,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let set_clause = "SET account = ?, category = ?, amount_cents = ?, kind = ?, remark = ?, \
             bill_date = ?, counted = ?, pair_id = ?, is_deleted = 0, \
             version = version + 1, updated_at = ?";

        let affected = match scope.owner_filter() {
            Some(owner_id) => {
                self.conn
                    .execute(
                        &format!(
                            "UPDATE bills {set_clause} \
                             WHERE id = ? AND book_id = ? AND user_id = ? AND version = ?"
                        ),
                        params![
                            draft.account.as_str(),
                            draft.category.as_str(),
                            draft.amount_cents,
                            draft.kind.as_i64(),
                            draft.remark.as_str(),
                            draft.bill_date,
                            i32::from(draft.counted),
                            draft.pair_id,
                            now,
                            bill_id,
                            scope.book_id,
                            owner_id,
                            expected_version
                        ],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        &format!(
                            "UPDATE bills {set_clause} \
                             WHERE id = ? AND book_id = ? AND version = ?"
                        ),
                        params![
                            draft.account.as_str(),
                            draft.category.as_str(),
                            draft.amount_cents,
                            draft.kind.as_i64(),
                            draft.remark.as_str(),
                            draft.bill_date,
                            i32::from(draft.counted),
                            draft.pair_id,
                            now,
                            bill_id,
                            scope.book_id,
                            expected_version
                        ],
                    )
                    .await?
            }
        };

        Ok(affected == 1)
    }

    async fn cas_delete(
        &self,
        scope: &SyncScope,
        bill_id: i64,
        expected_version: i64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();

        let affected = match scope.owner_filter() {
            Some(owner_id) => {
                self.conn
                    .execute(
                        "UPDATE bills SET is_deleted = 1, version = version + 1, updated_at = ? \
                         WHERE id = ? AND book_id = ? AND user_id = ? AND version = ?",
                        params![now, bill_id, scope.book_id, owner_id, expected_version],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE bills SET is_deleted = 1, version = version + 1, updated_at = ? \
                         WHERE id = ? AND book_id = ? AND version = ?",
                        params![now, bill_id, scope.book_id, expected_version],
                    )
                    .await?
            }
        };

        Ok(affected == 1)
    }

    async fn live_without_log_entry(&self, scope: &SyncScope) -> Result<Vec<Bill>> {
        let mut rows = match scope.owner_filter() {
            Some(owner_id) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {BILL_COLUMNS} FROM bills \
                             WHERE book_id = ? AND user_id = ? AND is_deleted = 0 \
                               AND id NOT IN (SELECT bill_id FROM sync_changes \
                                              WHERE book_id = ? AND scope_key = ?) \
                             ORDER BY id ASC"
                        ),
                        params![scope.book_id, owner_id, scope.book_id, scope.scope_key()],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {BILL_COLUMNS} FROM bills \
                             WHERE book_id = ? AND is_deleted = 0 \
                               AND id NOT IN (SELECT bill_id FROM sync_changes \
                                              WHERE book_id = ? AND scope_key = ?) \
                             ORDER BY id ASC"
                        ),
                        params![scope.book_id, scope.book_id, scope.scope_key()],
                    )
                    .await?
            }
        };

        let mut bills = Vec::new();
        while let Some(row) = rows.next().await? {
            bills.push(Self::parse_bill(&row)?);
        }
        Ok(bills)
    }
}
