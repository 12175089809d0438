//! Normalized test program output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::RunnerError;
use crate::results::TestStatus;

/// Outcome of one test program run, before it is tagged with a site and crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    pub status: TestStatus,
    /// The JSON object the program printed, untouched. Empty on failure.
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl TestReport {
    /// A failure record carrying `error` as its message.
    pub fn failed(
        test_name: impl Into<String>,
        error: impl Into<String>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            status: TestStatus::Fail,
            payload: Map::new(),
            error: Some(error.into()),
            executed_at,
        }
    }

    /// Build a report from the stdout of a program that exited 0.
    ///
    /// The output must be one JSON object. A `status` key other than
    /// `"success"` marks the test failed; when absent the test succeeded.
    /// A string `error` key becomes the report's error.
    pub fn from_output(
        test_name: impl Into<String>,
        stdout: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<Self, RunnerError> {
        let value: Value =
            serde_json::from_str(stdout.trim()).map_err(|e| RunnerError::InvalidOutput {
                reason: e.to_string(),
            })?;

        let Value::Object(payload) = value else {
            return Err(RunnerError::InvalidOutput {
                reason: "output is not a JSON object".to_string(),
            });
        };

        let status = match payload.get("status") {
            None => TestStatus::Success,
            Some(Value::String(label)) => TestStatus::from_label(label),
            Some(_) => TestStatus::Fail,
        };

        let error = payload
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            test_name: test_name.into(),
            status,
            payload,
            error,
            executed_at,
        })
    }
}
