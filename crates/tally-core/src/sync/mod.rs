//! SyncV2 coordinator: push/pull replication over the versioned bill store.
//!
//! Devices submit batches of idempotent operations (push) and read the
//! per-scope change log forward of a cursor (pull). Conflicting concurrent
//! edits are detected by a compare-and-swap on the record version and
//! surfaced to the caller together with the authoritative current body;
//! nothing blocks and nothing is merged automatically.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::access::AccessControl;
use crate::db::{
    BillStore, BootstrapStore, ChangeLogStore, Database, IdAllocator, IdBlock, IdempotencyStore,
    LibSqlBillStore, LibSqlBootstrapStore, LibSqlChangeLogStore, LibSqlIdAllocator,
    LibSqlIdempotencyStore,
};
use crate::error::Result;
use crate::models::{Bill, ChangeOp, OpOutcome, OpStatus, PushOperation, SyncScope};

const DEFAULT_PULL_LIMIT: i64 = 200;
const MAX_PULL_LIMIT: i64 = 500;
const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
const MAX_ACTIVITY_LIMIT: i64 = 200;
const DEFAULT_ID_BLOCK_SIZE: i64 = 100;
const MAX_ID_BLOCK_SIZE: i64 = 1000;

/// A batch of operations for one book
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub book_id: i64,
    #[serde(default)]
    pub ops: Vec<PushOperation>,
}

/// Per-batch response; one result per operation in input order
#[derive(Debug, Clone, Serialize)]
pub struct PushResponse {
    pub success: bool,
    pub results: Vec<PushResultItem>,
}

/// Outcome of a single operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResultItem {
    pub op_id: String,
    pub status: OpStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_bill: Option<Bill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResultItem {
    fn applied(op_id: &str, server_id: i64, version: i64) -> Self {
        Self {
            op_id: op_id.to_string(),
            status: OpStatus::Applied,
            server_id: Some(server_id),
            version: Some(version),
            server_bill: None,
            error: None,
        }
    }

    fn conflict(op_id: &str, server_id: i64, version: i64, server_bill: Option<Bill>) -> Self {
        Self {
            op_id: op_id.to_string(),
            status: OpStatus::Conflict,
            server_id: Some(server_id),
            version: Some(version),
            server_bill,
            error: None,
        }
    }

    fn error(op_id: &str, detail: impl Into<String>) -> Self {
        Self {
            op_id: op_id.to_string(),
            status: OpStatus::Error,
            server_id: None,
            version: None,
            server_bill: None,
            error: Some(detail.into()),
        }
    }
}

/// One resolved change log entry: the entry plus the record's current body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeItem {
    pub change_id: i64,
    pub op: ChangeOp,
    pub version: i64,
    pub bill: Bill,
}

/// A page of the replication stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    pub success: bool,
    pub changes: Vec<ChangeItem>,
    pub next_change_id: i64,
    pub has_more: bool,
}

/// Scope-level diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub book_id: i64,
    pub scope_key: i64,
    pub max_change_id: i64,
    pub change_count: i64,
    pub initialized: bool,
}

/// What a housekeeping pass removed
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PurgeReport {
    pub ops_removed: u64,
    pub changes_removed: u64,
}

/// Thread-safe sync coordinator over a single database.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Mutex<Database>>,
}

impl SyncService {
    /// Create a coordinator owning the given database
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Apply a batch of client operations.
    ///
    /// Operations are processed independently in batch order; one failed
    /// item never aborts its siblings. Only authorization failures reject
    /// the batch as a whole.
    pub async fn push(&self, caller_id: i64, request: &PushRequest) -> Result<PushResponse> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let scope = AccessControl::new(conn)
            .resolve(caller_id, request.book_id)
            .await?;

        let mut results = Vec::with_capacity(request.ops.len());
        for op in &request.ops {
            results.push(apply_operation(conn, caller_id, &scope, op).await);
        }

        tracing::debug!(
            book = request.book_id,
            scope_key = scope.scope_key(),
            ops = results.len(),
            "Applied push batch"
        );
        Ok(PushResponse {
            success: true,
            results,
        })
    }

    /// Read change log entries forward of a cursor.
    ///
    /// A pull from the origin cursor triggers one-time seeding of the log
    /// with entries for records that pre-date it.
    pub async fn pull(
        &self,
        caller_id: i64,
        book_id: i64,
        after_change_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<PullPage> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let scope = AccessControl::new(conn).resolve(caller_id, book_id).await?;

        let cursor = after_change_id.unwrap_or(0).max(0);
        let limit = clamp_limit(limit, DEFAULT_PULL_LIMIT, MAX_PULL_LIMIT);

        if cursor == 0 {
            ensure_bootstrapped(conn, &scope).await?;
        }

        let entries = LibSqlChangeLogStore::new(conn)
            .list_after(&scope, cursor, limit)
            .await?;
        let changes = resolve_entries(conn, &scope, &entries).await?;

        let next_change_id = entries.last().map_or(cursor, |entry| entry.change_id);
        let has_more = entries.len() as i64 == limit;

        tracing::debug!(
            book = book_id,
            scope_key = scope.scope_key(),
            cursor,
            returned = changes.len(),
            has_more,
            "Served pull page"
        );
        Ok(PullPage {
            success: true,
            changes,
            next_change_id,
            has_more,
        })
    }

    /// Scope-level diagnostics for health checks and support tooling
    pub async fn summary(&self, caller_id: i64, book_id: i64) -> Result<SyncSummary> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let scope = AccessControl::new(conn).resolve(caller_id, book_id).await?;

        let change_log = LibSqlChangeLogStore::new(conn);
        Ok(SyncSummary {
            book_id,
            scope_key: scope.scope_key(),
            max_change_id: change_log.max_change_id(&scope).await?,
            change_count: change_log.count(&scope).await?,
            initialized: LibSqlBootstrapStore::new(conn).is_initialized(&scope).await?,
        })
    }

    /// Most recent changes below a cursor, newest first, for activity views
    pub async fn activity(
        &self,
        caller_id: i64,
        book_id: i64,
        before_change_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<ChangeItem>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let scope = AccessControl::new(conn).resolve(caller_id, book_id).await?;

        let limit = clamp_limit(limit, DEFAULT_ACTIVITY_LIMIT, MAX_ACTIVITY_LIMIT);
        let entries = LibSqlChangeLogStore::new(conn)
            .list_before(&scope, before_change_id, limit)
            .await?;
        resolve_entries(conn, &scope, &entries).await
    }

    /// Reserve a block of record ids for a device creating bills offline
    pub async fn allocate_ids(&self, count: Option<i64>) -> Result<IdBlock> {
        let count = clamp_limit(count, DEFAULT_ID_BLOCK_SIZE, MAX_ID_BLOCK_SIZE);
        let db = self.db.lock().await;
        LibSqlIdAllocator::new(db.connection()).allocate(count).await
    }

    /// Drop idempotency records and change log entries past retention.
    ///
    /// Best-effort housekeeping; devices offline longer than the change
    /// retention window must re-bootstrap from the origin cursor.
    pub async fn purge_expired(
        &self,
        op_retention: Duration,
        change_retention: Duration,
    ) -> Result<PurgeReport> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let now = chrono::Utc::now().timestamp_millis();

        let ops_removed = LibSqlIdempotencyStore::new(conn)
            .purge_older_than(now - duration_ms(op_retention))
            .await?;
        let changes_removed = LibSqlChangeLogStore::new(conn)
            .purge_older_than(now - duration_ms(change_retention))
            .await?;

        Ok(PurgeReport {
            ops_removed,
            changes_removed,
        })
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn clamp_limit(requested: Option<i64>, default: i64, max: i64) -> i64 {
    match requested {
        Some(value) if value > 0 => value.min(max),
        _ => default,
    }
}

/// Apply one operation; never propagates item-level failures.
async fn apply_operation(
    conn: &Connection,
    caller_id: i64,
    scope: &SyncScope,
    op: &PushOperation,
) -> PushResultItem {
    let op_id = op.op_id().trim();
    if op_id.is_empty() {
        return PushResultItem::error("", "operation id is required");
    }

    // Idempotency first: a retried op is answered from history, never re-run
    match LibSqlIdempotencyStore::new(conn)
        .get(caller_id, scope.book_id, op_id)
        .await
    {
        Ok(Some(outcome)) => return replay_outcome(conn, scope, &outcome).await,
        Ok(None) => {}
        Err(error) => return PushResultItem::error(op_id, error.to_string()),
    }

    match apply_new_operation(conn, caller_id, scope, op_id, op).await {
        Ok(item) => item,
        Err(error) => {
            let detail = error.to_string();
            tracing::warn!(op = op_id, book = scope.book_id, error = %detail, "Push operation failed");
            let outcome = OpOutcome::error(caller_id, scope.book_id, op_id, detail.clone());
            if let Err(record_error) = LibSqlIdempotencyStore::new(conn).record(&outcome).await {
                tracing::warn!(op = op_id, error = %record_error, "Failed to record error outcome");
            }
            PushResultItem::error(op_id, detail)
        }
    }
}

/// Answer a retried operation from its stored outcome
async fn replay_outcome(
    conn: &Connection,
    scope: &SyncScope,
    outcome: &OpOutcome,
) -> PushResultItem {
    match outcome.status {
        OpStatus::Applied => PushResultItem::applied(
            &outcome.op_id,
            outcome.bill_id.unwrap_or_default(),
            outcome.version.unwrap_or_default(),
        ),
        OpStatus::Conflict => {
            // Re-read so the caller rebases onto the current body, which may
            // have moved again since the conflict was recorded
            let bill_id = outcome.bill_id.unwrap_or_default();
            let current = LibSqlBillStore::new(conn)
                .get(scope, bill_id)
                .await
                .ok()
                .flatten();
            let version = current
                .as_ref()
                .map_or_else(|| outcome.version.unwrap_or_default(), |bill| bill.version);
            PushResultItem::conflict(&outcome.op_id, bill_id, version, current)
        }
        OpStatus::Error => PushResultItem::error(
            &outcome.op_id,
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "operation previously failed".to_string()),
        ),
    }
}

/// Apply an unseen operation inside its own transaction
async fn apply_new_operation(
    conn: &Connection,
    caller_id: i64,
    scope: &SyncScope,
    op_id: &str,
    op: &PushOperation,
) -> Result<PushResultItem> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    match apply_mutation(conn, caller_id, scope, op_id, op).await {
        Ok(item) => {
            conn.execute("COMMIT", ()).await?;
            Ok(item)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}

async fn apply_mutation(
    conn: &Connection,
    caller_id: i64,
    scope: &SyncScope,
    op_id: &str,
    op: &PushOperation,
) -> Result<PushResultItem> {
    let bills = LibSqlBillStore::new(conn);
    let change_log = LibSqlChangeLogStore::new(conn);
    let ledger = LibSqlIdempotencyStore::new(conn);

    match op {
        PushOperation::Upsert {
            server_id,
            expected_version,
            bill,
            ..
        } => {
            let Some(draft) = bill else {
                let outcome =
                    OpOutcome::error(caller_id, scope.book_id, op_id, "upsert requires a bill body");
                ledger.record(&outcome).await?;
                return Ok(PushResultItem::error(op_id, "upsert requires a bill body"));
            };

            match server_id {
                // Create: fresh id, version 1
                None => {
                    let block = LibSqlIdAllocator::new(conn).allocate(1).await?;
                    let created = bills
                        .create(block.start, caller_id, scope.book_id, draft)
                        .await?;
                    change_log
                        .append(scope, created.id, ChangeOp::Upsert, created.version)
                        .await?;
                    ledger
                        .record(&OpOutcome::applied(
                            caller_id,
                            scope.book_id,
                            op_id,
                            created.id,
                            created.version,
                        ))
                        .await?;
                    Ok(PushResultItem::applied(op_id, created.id, created.version))
                }
                // Update: optimistic compare-and-swap against the stored version
                Some(bill_id) => {
                    let Some(current) = bills.get(scope, *bill_id).await? else {
                        let detail = format!("bill {bill_id} not found");
                        ledger
                            .record(&OpOutcome::error(caller_id, scope.book_id, op_id, detail.as_str()))
                            .await?;
                        return Ok(PushResultItem::error(op_id, detail));
                    };

                    match expected_version {
                        Some(expected) if *expected == current.version => {
                            if bills.cas_update(scope, *bill_id, *expected, draft).await? {
                                let version = expected + 1;
                                change_log
                                    .append(scope, *bill_id, ChangeOp::Upsert, version)
                                    .await?;
                                ledger
                                    .record(&OpOutcome::applied(
                                        caller_id,
                                        scope.book_id,
                                        op_id,
                                        *bill_id,
                                        version,
                                    ))
                                    .await?;
                                Ok(PushResultItem::applied(op_id, *bill_id, version))
                            } else {
                                // Lost the race to a concurrent writer
                                conflict_against_current(
                                    conn, caller_id, scope, op_id, *bill_id,
                                )
                                .await
                            }
                        }
                        _ => conflict_with(conn, caller_id, scope, op_id, current).await,
                    }
                }
            }
        }
        PushOperation::Delete {
            server_id,
            expected_version,
            ..
        } => {
            let Some(bill_id) = server_id else {
                let outcome =
                    OpOutcome::error(caller_id, scope.book_id, op_id, "delete requires a serverId");
                ledger.record(&outcome).await?;
                return Ok(PushResultItem::error(op_id, "delete requires a serverId"));
            };

            let Some(current) = bills.get(scope, *bill_id).await? else {
                let detail = format!("bill {bill_id} not found");
                ledger
                    .record(&OpOutcome::error(caller_id, scope.book_id, op_id, detail.as_str()))
                    .await?;
                return Ok(PushResultItem::error(op_id, detail));
            };

            match expected_version {
                Some(expected) if *expected == current.version => {
                    if bills.cas_delete(scope, *bill_id, *expected).await? {
                        let version = expected + 1;
                        change_log
                            .append(scope, *bill_id, ChangeOp::Delete, version)
                            .await?;
                        ledger
                            .record(&OpOutcome::applied(
                                caller_id,
                                scope.book_id,
                                op_id,
                                *bill_id,
                                version,
                            ))
                            .await?;
                        Ok(PushResultItem::applied(op_id, *bill_id, version))
                    } else {
                        conflict_against_current(conn, caller_id, scope, op_id, *bill_id).await
                    }
                }
                _ => conflict_with(conn, caller_id, scope, op_id, current).await,
            }
        }
    }
}

/// Record and report a conflict against a freshly re-read body
async fn conflict_against_current(
    conn: &Connection,
    caller_id: i64,
    scope: &SyncScope,
    op_id: &str,
    bill_id: i64,
) -> Result<PushResultItem> {
    let Some(current) = LibSqlBillStore::new(conn).get(scope, bill_id).await? else {
        // Vanished between the CAS and the re-read; report it as gone
        let detail = format!("bill {bill_id} not found");
        LibSqlIdempotencyStore::new(conn)
            .record(&OpOutcome::error(caller_id, scope.book_id, op_id, detail.as_str()))
            .await?;
        return Ok(PushResultItem::error(op_id, detail));
    };
    conflict_with(conn, caller_id, scope, op_id, current).await
}

/// Record and report a conflict carrying the authoritative current body
async fn conflict_with(
    conn: &Connection,
    caller_id: i64,
    scope: &SyncScope,
    op_id: &str,
    current: crate::models::Bill,
) -> Result<PushResultItem> {
    LibSqlIdempotencyStore::new(conn)
        .record(&OpOutcome::conflict(
            caller_id,
            scope.book_id,
            op_id,
            current.id,
            current.version,
        ))
        .await?;
    Ok(PushResultItem::conflict(
        op_id,
        current.id,
        current.version,
        Some(current),
    ))
}

/// One-time change log seeding for records that pre-date the log.
///
/// The bootstrap row's primary key arbitrates racing first-pulls: the
/// claimant seeds, everyone else reads whatever is in the log already.
async fn ensure_bootstrapped(conn: &Connection, scope: &SyncScope) -> Result<()> {
    let bootstrap = LibSqlBootstrapStore::new(conn);
    if bootstrap.is_initialized(scope).await? {
        return Ok(());
    }

    if !bootstrap.try_claim(scope).await? {
        return Ok(());
    }

    let bills = LibSqlBillStore::new(conn).live_without_log_entry(scope).await?;
    let seeded = bills.len();
    let change_log = LibSqlChangeLogStore::new(conn);

    conn.execute("BEGIN TRANSACTION", ()).await?;
    for bill in bills {
        if let Err(error) = change_log
            .append(scope, bill.id, ChangeOp::Upsert, bill.version)
            .await
        {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error);
        }
    }
    if let Err(error) = bootstrap.mark_initialized(scope).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error);
    }
    conn.execute("COMMIT", ()).await?;

    if seeded > 0 {
        tracing::info!(
            book = scope.book_id,
            scope_key = scope.scope_key(),
            seeded,
            "Seeded change log for pre-existing records"
        );
    }
    Ok(())
}

/// Materialize entries against the current record bodies
async fn resolve_entries(
    conn: &Connection,
    scope: &SyncScope,
    entries: &[crate::models::ChangeLogEntry],
) -> Result<Vec<ChangeItem>> {
    let bills = LibSqlBillStore::new(conn);
    let mut changes = Vec::with_capacity(entries.len());
    for entry in entries {
        let bill = bills.get(scope, entry.bill_id).await?.unwrap_or_else(|| {
            // Row purged by housekeeping; a stub still lets the device delete
            Bill::deletion_stub(entry.bill_id, scope.book_id, entry.version)
        });
        changes.push(ChangeItem {
            change_id: entry.change_id,
            op: entry.op,
            version: entry.version,
            bill,
        });
    }
    Ok(changes)
}
