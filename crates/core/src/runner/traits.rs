//! Test runner trait definition.

use async_trait::async_trait;

use super::types::TestReport;

/// Runs a named test against a site URL.
///
/// Implementations never fail: spawn errors, timeouts and garbage output all
/// come back as a report with [`TestStatus::Fail`](crate::results::TestStatus::Fail).
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Name of this runner implementation.
    fn name(&self) -> &str;

    /// Run `test_name` against `url`.
    async fn run(&self, url: &str, test_name: &str) -> TestReport;
}
