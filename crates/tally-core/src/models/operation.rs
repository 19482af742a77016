//! Client push operations and their recorded outcomes

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::BillDraft;

/// A single client-submitted operation, parsed once at the boundary.
///
/// `op_id`, `server_id` and `bill` default to empty/absent so that one
/// malformed operation is reported per-item instead of failing the whole
/// batch at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum PushOperation {
    Upsert {
        #[serde(default)]
        op_id: String,
        #[serde(default)]
        server_id: Option<i64>,
        #[serde(default)]
        expected_version: Option<i64>,
        #[serde(default)]
        bill: Option<BillDraft>,
    },
    Delete {
        #[serde(default)]
        op_id: String,
        #[serde(default)]
        server_id: Option<i64>,
        #[serde(default)]
        expected_version: Option<i64>,
    },
}

impl PushOperation {
    /// Client-chosen idempotency key of this operation
    #[must_use]
    pub fn op_id(&self) -> &str {
        match self {
            Self::Upsert { op_id, .. } | Self::Delete { op_id, .. } => op_id,
        }
    }
}

/// Terminal status of an applied operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Applied,
    Conflict,
    Error,
}

impl OpStatus {
    /// Stable string encoding used by the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }

    /// Decode the database string encoding
    pub fn try_from_str(value: &str) -> Result<Self> {
        match value {
            "applied" => Ok(Self::Applied),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            other => Err(Error::Database(format!("unknown op status: {other}"))),
        }
    }
}

/// Recorded outcome of one operation id, keyed by (caller, book, op id).
///
/// Written exactly once; a retried submission is answered from this record
/// instead of being re-applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutcome {
    pub user_id: i64,
    pub book_id: i64,
    pub op_id: String,
    pub status: OpStatus,
    pub bill_id: Option<i64>,
    pub version: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

impl OpOutcome {
    #[must_use]
    pub fn applied(user_id: i64, book_id: i64, op_id: &str, bill_id: i64, version: i64) -> Self {
        Self {
            user_id,
            book_id,
            op_id: op_id.to_string(),
            status: OpStatus::Applied,
            bill_id: Some(bill_id),
            version: Some(version),
            error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn conflict(user_id: i64, book_id: i64, op_id: &str, bill_id: i64, version: i64) -> Self {
        Self {
            user_id,
            book_id,
            op_id: op_id.to_string(),
            status: OpStatus::Conflict,
            bill_id: Some(bill_id),
            version: Some(version),
            error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn error(user_id: i64, book_id: i64, op_id: &str, detail: impl Into<String>) -> Self {
        Self {
            user_id,
            book_id,
            op_id: op_id.to_string(),
            status: OpStatus::Error,
            bill_id: None,
            version: None,
            error: Some(detail.into()),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_status_roundtrips_through_db_encoding() {
        for status in [OpStatus::Applied, OpStatus::Conflict, OpStatus::Error] {
            assert_eq!(OpStatus::try_from_str(status.as_str()).unwrap(), status);
        }
        assert!(OpStatus::try_from_str("pending").is_err());
    }

    #[test]
    fn push_operation_parses_with_missing_op_id() {
        let op: PushOperation = serde_json::from_str(
            r#"{"type":"upsert","bill":{"account":"cash","category":"food","amountCents":5,"kind":"expense","billDate":1}}"#,
        )
        .unwrap();
        assert!(op.op_id().is_empty());
    }

    #[test]
    fn push_operation_parses_tagged_delete() {
        let op: PushOperation = serde_json::from_str(
            r#"{"type":"delete","opId":"op-1","serverId":5,"expectedVersion":2}"#,
        )
        .unwrap();
        match op {
            PushOperation::Delete {
                op_id,
                server_id,
                expected_version,
            } => {
                assert_eq!(op_id, "op-1");
                assert_eq!(server_id, Some(5));
                assert_eq!(expected_version, Some(2));
            }
            PushOperation::Upsert { .. } => panic!("expected delete"),
        }
    }
}
