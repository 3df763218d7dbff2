//! Document lifecycle tracking
//!
//! Decides which documents need (re)extraction and which feed aggregation.
//! `Modified` and `Deleted` are applied by external callers (edit signals,
//! operators); the core only ever moves documents to `Persistent`.
//!
//! The same store keeps the request ledger: one request per document
//! extraction and one usage row per completion spent on it.

mod sqlite;
mod traits;
mod types;

pub use sqlite::SqliteLifecycleStore;
pub use traits::{LifecycleError, LifecycleResult, LifecycleStore};
pub use types::{
    DocumentId, DocumentRecord, DocumentStatus, NewDocument, RequestRecord, UsageRecord, REQUEST_GENERATE,
};
