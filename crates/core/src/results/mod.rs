//! Result sink: idempotent per-test persistence of crawl results.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteResultStore;
pub use store::{ResultStore, StoreError};
pub use types::{CrawlResultDocument, TestInvocation, TestStatus, UpsertOutcome, UpsertPolicy};
