//! Bill model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Direction of a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillKind {
    Expense,
    Income,
    Transfer,
}

impl BillKind {
    /// Stable integer encoding used by the database
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Expense => 0,
            Self::Income => 1,
            Self::Transfer => 2,
        }
    }

    /// Decode the database integer encoding
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Expense),
            1 => Ok(Self::Income),
            2 => Ok(Self::Transfer),
            other => Err(Error::Database(format!("unknown bill kind: {other}"))),
        }
    }
}

/// A ledger record with a per-record version counter.
///
/// The version starts at 1 on creation and increases by exactly 1 on every
/// accepted mutation; writes are guarded by a compare-and-swap on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    /// Server-assigned identifier
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Book the bill belongs to
    pub book_id: i64,
    /// Account name
    pub account: String,
    /// Category name
    pub category: String,
    /// Amount in minor currency units
    pub amount_cents: i64,
    /// Expense, income or transfer
    pub kind: BillKind,
    /// Free-form remark
    pub remark: String,
    /// Transaction date (Unix ms)
    pub bill_date: i64,
    /// Whether the bill counts toward totals
    pub counted: bool,
    /// Peer bill of a linked transfer
    pub pair_id: Option<i64>,
    /// Soft delete flag for sync
    pub is_deleted: bool,
    /// Optimistic concurrency version
    pub version: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Bill {
    /// Minimal stand-in for a record whose row has been purged.
    ///
    /// Carries just enough for a device to apply the deletion.
    #[must_use]
    pub fn deletion_stub(id: i64, book_id: i64, version: i64) -> Self {
        Self {
            id,
            user_id: 0,
            book_id,
            account: String::new(),
            category: String::new(),
            amount_cents: 0,
            kind: BillKind::Expense,
            remark: String::new(),
            bill_date: 0,
            counted: false,
            pair_id: None,
            is_deleted: true,
            version,
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// Client-supplied bill body for an upsert operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDraft {
    pub account: String,
    pub category: String,
    pub amount_cents: i64,
    pub kind: BillKind,
    #[serde(default)]
    pub remark: String,
    pub bill_date: i64,
    #[serde(default = "default_counted")]
    pub counted: bool,
    #[serde(default)]
    pub pair_id: Option<i64>,
}

const fn default_counted() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bill_kind_roundtrips_through_db_encoding() {
        for kind in [BillKind::Expense, BillKind::Income, BillKind::Transfer] {
            assert_eq!(BillKind::from_i64(kind.as_i64()).unwrap(), kind);
        }
        assert!(BillKind::from_i64(9).is_err());
    }

    #[test]
    fn deletion_stub_is_deleted_at_given_version() {
        let stub = Bill::deletion_stub(7, 3, 4);
        assert!(stub.is_deleted);
        assert_eq!(stub.id, 7);
        assert_eq!(stub.book_id, 3);
        assert_eq!(stub.version, 4);
    }

    #[test]
    fn draft_defaults_apply_on_deserialize() {
        let draft: BillDraft = serde_json::from_str(
            r#"{"account":"cash","category":"food","amountCents":1000,"kind":"expense","billDate":1}"#,
        )
        .unwrap();
        assert!(draft.counted);
        assert!(draft.remark.is_empty());
        assert!(draft.pair_id.is_none());
    }
}
