//! Result store trait and errors.

use std::collections::HashMap;

use thiserror::Error;

use super::{CrawlResultDocument, TestInvocation, TestStatus, UpsertOutcome, UpsertPolicy};

/// Errors raised by a result store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("result database error: {0}")]
    Database(String),

    /// A stored payload could not be encoded or decoded.
    #[error("result serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Persistent home of crawl result documents.
///
/// `upsert` must be atomic per `(site_id, crawl_id)`; callers add no locking.
pub trait ResultStore: Send + Sync {
    /// The policy `upsert` applies to already-recorded test names.
    fn policy(&self) -> UpsertPolicy;

    /// Create the document for `(site_id, crawl_id)` or append to it.
    fn upsert(
        &self,
        site_id: &str,
        crawl_id: &str,
        invocations: &[TestInvocation],
    ) -> Result<UpsertOutcome, StoreError>;

    /// Fetch one document.
    fn get(&self, site_id: &str, crawl_id: &str)
        -> Result<Option<CrawlResultDocument>, StoreError>;

    /// Test names already recorded for `(site_id, crawl_id)` and their status.
    fn recorded_tests(
        &self,
        site_id: &str,
        crawl_id: &str,
    ) -> Result<HashMap<String, TestStatus>, StoreError>;

    /// Every document of `crawl_id` holding at least one non-success test.
    fn fetch_incomplete(&self, crawl_id: &str) -> Result<Vec<CrawlResultDocument>, StoreError>;
}
