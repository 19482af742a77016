//! Models for Tally

mod bill;
mod book;
mod change;
mod operation;
mod scope;

pub use bill::{Bill, BillDraft, BillKind};
pub use book::Book;
pub use change::{ChangeLogEntry, ChangeOp};
pub use operation::{OpOutcome, OpStatus, PushOperation};
pub use scope::{ScopeKind, SyncScope, SHARED_SCOPE_KEY};
