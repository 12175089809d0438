//! Types for the crawler.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::results::{TestStatus, UpsertPolicy};

/// Errors that end a crawl run.
///
/// Failures local to one site or one test never surface here.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Site source error.
    #[error("site source error: {0}")]
    Sites(#[from] crate::site::SiteError),

    /// Result store error.
    #[error("result store error: {0}")]
    Store(#[from] crate::results::StoreError),

    /// `retry_failed_tests` disagrees with the policy the result store applies.
    #[error("crawler is configured for {configured:?} but the result store applies {store:?}")]
    PolicyMismatch {
        configured: UpsertPolicy,
        store: UpsertPolicy,
    },
}

/// Which part of a run scheduled a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlPhase {
    /// Sites with non-success tests left by an earlier run of the same crawl id.
    Resume,
    /// Sites due according to the site source.
    Steady,
}

impl CrawlPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlPhase::Resume => "resume",
            CrawlPhase::Steady => "steady",
        }
    }
}

/// Counters for a crawl run.
///
/// Informational only; the store is the source of truth for completeness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Sites scheduled by the resume phase.
    pub resumed_sites: usize,
    /// Sites scheduled by the steady phase.
    pub scheduled_sites: usize,
    /// Sites not scheduled (bad URL, unknown site).
    pub skipped_sites: usize,
    pub tests_run: usize,
    pub tests_succeeded: usize,
    pub tests_failed: usize,
    /// Tests not run because a record already existed.
    pub tests_already_recorded: usize,
    /// Result writes that failed.
    pub store_errors: usize,
    /// Shutdown was requested before the run finished scheduling.
    pub interrupted: bool,
}

/// Shared counters updated by site tasks.
#[derive(Debug, Default)]
pub(crate) struct CrawlStats {
    resumed_sites: AtomicUsize,
    scheduled_sites: AtomicUsize,
    skipped_sites: AtomicUsize,
    tests_succeeded: AtomicUsize,
    tests_failed: AtomicUsize,
    tests_already_recorded: AtomicUsize,
    store_errors: AtomicUsize,
}

impl CrawlStats {
    pub fn site_scheduled(&self, phase: CrawlPhase) {
        match phase {
            CrawlPhase::Resume => self.resumed_sites.fetch_add(1, Ordering::Relaxed),
            CrawlPhase::Steady => self.scheduled_sites.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn site_skipped(&self) {
        self.skipped_sites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn test_completed(&self, status: TestStatus) {
        match status {
            TestStatus::Success => self.tests_succeeded.fetch_add(1, Ordering::Relaxed),
            TestStatus::Fail => self.tests_failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn tests_already_recorded(&self, count: usize) {
        self.tests_already_recorded
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, interrupted: bool) -> CrawlSummary {
        let tests_succeeded = self.tests_succeeded.load(Ordering::Relaxed);
        let tests_failed = self.tests_failed.load(Ordering::Relaxed);
        CrawlSummary {
            resumed_sites: self.resumed_sites.load(Ordering::Relaxed),
            scheduled_sites: self.scheduled_sites.load(Ordering::Relaxed),
            skipped_sites: self.skipped_sites.load(Ordering::Relaxed),
            tests_run: tests_succeeded + tests_failed,
            tests_succeeded,
            tests_failed,
            tests_already_recorded: self.tests_already_recorded.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = CrawlStats::default();
        stats.site_scheduled(CrawlPhase::Resume);
        stats.site_scheduled(CrawlPhase::Steady);
        stats.site_scheduled(CrawlPhase::Steady);
        stats.test_completed(TestStatus::Success);
        stats.test_completed(TestStatus::Fail);
        stats.tests_already_recorded(2);

        let summary = stats.snapshot(false);
        assert_eq!(summary.resumed_sites, 1);
        assert_eq!(summary.scheduled_sites, 2);
        assert_eq!(summary.tests_run, 2);
        assert_eq!(summary.tests_succeeded, 1);
        assert_eq!(summary.tests_failed, 1);
        assert_eq!(summary.tests_already_recorded, 2);
        assert!(!summary.interrupted);
    }

    #[test]
    fn test_error_display() {
        let err = CrawlError::from(crate::results::StoreError::Database(
            "disk I/O error".to_string(),
        ));
        assert_eq!(err.to_string(), "result store error: result database error: disk I/O error");

        let err = CrawlError::PolicyMismatch {
            configured: UpsertPolicy::SuccessSupersedesFailure,
            store: UpsertPolicy::FirstRecordedWins,
        };
        assert_eq!(
            err.to_string(),
            "crawler is configured for SuccessSupersedesFailure but the result store applies FirstRecordedWins"
        );
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(CrawlPhase::Resume.as_str(), "resume");
        assert_eq!(
            serde_json::to_string(&CrawlPhase::Steady).unwrap(),
            "\"steady\""
        );
    }
}
