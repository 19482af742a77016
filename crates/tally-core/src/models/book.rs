//! Book model

use serde::{Deserialize, Serialize};

/// A ledger book: either a private book or a shared multi-member book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub is_shared: bool,
    pub created_at: i64,
}
