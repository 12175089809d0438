//! Result documents and test invocation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runner::TestReport;

/// Verdict of one test invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Fail,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Success => "success",
            TestStatus::Fail => "fail",
        }
    }

    /// Anything other than `"success"` is a failure.
    pub fn from_label(label: &str) -> Self {
        if label == "success" {
            TestStatus::Success
        } else {
            TestStatus::Fail
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Success)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed test for one site within one crawl run. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInvocation {
    pub site_id: String,
    pub crawl_id: String,
    pub test_name: String,
    pub status: TestStatus,
    /// Opaque structured output of the test program.
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl TestInvocation {
    /// Tag a runner report with the site and crawl it belongs to.
    pub fn from_report(
        site_id: impl Into<String>,
        crawl_id: impl Into<String>,
        report: TestReport,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            crawl_id: crawl_id.into(),
            test_name: report.test_name,
            status: report.status,
            payload: report.payload,
            error: report.error,
            executed_at: report.executed_at,
        }
    }
}

/// All recorded tests for a `(site_id, crawl_id)` pair, in recording order.
///
/// `test_name` is unique within `tests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResultDocument {
    pub site_id: String,
    pub crawl_id: String,
    pub tests: Vec<TestInvocation>,
}

impl CrawlResultDocument {
    pub fn test(&self, test_name: &str) -> Option<&TestInvocation> {
        self.tests.iter().find(|t| t.test_name == test_name)
    }

    /// True if any recorded test did not succeed.
    pub fn is_incomplete(&self) -> bool {
        self.tests.iter().any(|t| !t.status.is_success())
    }
}

/// How an upsert treats a test name that is already recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertPolicy {
    /// The first record for a test name is kept; later ones are dropped.
    #[default]
    FirstRecordedWins,
    /// A success replaces a stored failure in place. Nothing replaces a success.
    SuccessSupersedesFailure,
}

impl UpsertPolicy {
    /// Whether a stored record with `status` means the test needs no rerun.
    pub fn counts_as_done(&self, status: TestStatus) -> bool {
        match self {
            UpsertPolicy::FirstRecordedWins => true,
            UpsertPolicy::SuccessSupersedesFailure => status.is_success(),
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The document did not exist and was created.
    pub created_document: bool,
    /// Invocations appended as new entries.
    pub appended: usize,
    /// Stored failures replaced by a success.
    pub replaced: usize,
    /// Invocations discarded because their test name was already recorded.
    pub dropped: usize,
}
