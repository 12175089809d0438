//! Crawler configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::results::UpsertPolicy;

/// Configuration for a crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Declared test names, run for every site in this order of submission.
    #[serde(default = "default_tests")]
    pub tests: Vec<String>,

    /// Sites fetched per batch from the site source.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// A site is due when its last crawl is older than this many days.
    #[serde(default = "default_crawl_interval_days")]
    pub crawl_interval_days: u32,

    /// Site tasks running at once.
    #[serde(default = "default_max_concurrent_sites")]
    pub max_concurrent_sites: usize,

    /// Site tasks submitted but not finished (queued + running).
    /// Submission blocks when this many are outstanding.
    #[serde(default = "default_max_queued_site_tasks")]
    pub max_queued_site_tasks: usize,

    /// Test programs running at once, across all sites.
    #[serde(default = "default_max_concurrent_tests")]
    pub max_concurrent_tests: usize,

    /// Rerun tests whose stored record is a failure, letting a success
    /// replace it. When off, the first record for a test is final.
    #[serde(default)]
    pub retry_failed_tests: bool,
}

fn default_tests() -> Vec<String> {
    ["test_dns", "test_http", "test_ssl", "test_bootstrapitalia"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_batch_size() -> usize {
    100
}

fn default_crawl_interval_days() -> u32 {
    30
}

fn default_max_concurrent_sites() -> usize {
    4
}

fn default_max_queued_site_tasks() -> usize {
    8
}

fn default_max_concurrent_tests() -> usize {
    3
}

impl CrawlerConfig {
    /// Sites last crawled before this instant are due.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.crawl_interval_days))
    }

    pub fn upsert_policy(&self) -> UpsertPolicy {
        if self.retry_failed_tests {
            UpsertPolicy::SuccessSupersedesFailure
        } else {
            UpsertPolicy::FirstRecordedWins
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            tests: default_tests(),
            batch_size: default_batch_size(),
            crawl_interval_days: default_crawl_interval_days(),
            max_concurrent_sites: default_max_concurrent_sites(),
            max_queued_site_tasks: default_max_queued_site_tasks(),
            max_concurrent_tests: default_max_concurrent_tests(),
            retry_failed_tests: false,
        }
    }
}
