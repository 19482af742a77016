//! tally-core - Core library for Tally
//!
//! This crate contains the shared models, database layer, and the SyncV2
//! synchronization engine used by the Tally backend.

pub mod access;
pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Bill, BillDraft, SyncScope};
pub use sync::SyncService;
