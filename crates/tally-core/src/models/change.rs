//! Change log model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Operation recorded by a change log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

impl ChangeOp {
    /// Stable string encoding used by the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    /// Decode the database string encoding
    pub fn try_from_str(value: &str) -> Result<Self> {
        match value {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Database(format!("unknown change op: {other}"))),
        }
    }
}

/// One entry of the append-only per-scope replication stream.
///
/// Change ids are assigned by the store and strictly increase; devices use
/// the last consumed change id as their pull cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub change_id: i64,
    pub book_id: i64,
    pub scope_key: i64,
    pub bill_id: i64,
    pub op: ChangeOp,
    /// Record version produced by the mutation
    pub version: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_op_roundtrips_through_db_encoding() {
        for op in [ChangeOp::Upsert, ChangeOp::Delete] {
            assert_eq!(ChangeOp::try_from_str(op.as_str()).unwrap(), op);
        }
        assert!(ChangeOp::try_from_str("merge").is_err());
    }
}
