//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Crawl scheduling (sites scheduled and skipped, submission queue depth)
//! - Test execution (outcomes, durations, stray process cleanup)
//! - Result persistence failures

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Crawl Scheduling
// =============================================================================

/// Site tasks submitted, by phase.
pub static SITES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sitecrawl_sites_scheduled_total",
            "Site tasks submitted to the site pool",
        ),
        &["phase"], // "resume", "steady"
    )
    .expect("valid metric definition")
});

/// Sites not scheduled, by reason.
pub static SITES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sitecrawl_sites_skipped_total", "Sites that were not crawled"),
        &["reason"], // "missing_url", "unknown_site", "resumed"
    )
    .expect("valid metric definition")
});

/// Site tasks submitted but not yet finished.
pub static QUEUED_SITE_TASKS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "sitecrawl_queued_site_tasks",
        "Site tasks holding a submission slot",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Test Execution
// =============================================================================

/// Test invocations by test name and status.
pub static TESTS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sitecrawl_tests_completed_total", "Test invocations completed"),
        &["test", "status"], // status: "success", "fail"
    )
    .expect("valid metric definition")
});

/// Wall-clock duration of test programs.
pub static TEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sitecrawl_test_duration_seconds",
            "Duration of a single test program run",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["test"],
    )
    .expect("valid metric definition")
});

/// Process groups that still had members after their test finished.
pub static STRAY_GROUPS_REAPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sitecrawl_stray_groups_reaped_total",
        "Test process groups with leftover processes that had to be killed",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Persistence
// =============================================================================

/// Failed result upserts.
pub static STORE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sitecrawl_store_errors_total",
        "Result writes that failed and were dropped",
    )
    .expect("valid metric definition")
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduling
        Box::new(SITES_SCHEDULED.clone()),
        Box::new(SITES_SKIPPED.clone()),
        Box::new(QUEUED_SITE_TASKS.clone()),
        // Tests
        Box::new(TESTS_COMPLETED.clone()),
        Box::new(TEST_DURATION_SECONDS.clone()),
        Box::new(STRAY_GROUPS_REAPED.clone()),
        // Persistence
        Box::new(STORE_ERRORS.clone()),
    ]
}
