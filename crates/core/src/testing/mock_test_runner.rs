//! Mock test runner for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::results::TestStatus;
use crate::runner::{TestReport, TestRunner};

/// A recorded test invocation for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub url: String,
    pub test_name: String,
}

/// What the mock does when a test name is run.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Report success with this payload.
    Success(Map<String, Value>),
    /// Report failure with this error text.
    Fail(String),
    /// Panic inside the runner.
    Panic,
}

impl ScriptedOutcome {
    pub fn success() -> Self {
        ScriptedOutcome::Success(Map::new())
    }

    pub fn fail(error: impl Into<String>) -> Self {
        ScriptedOutcome::Fail(error.into())
    }
}

/// Mock implementation of the TestRunner trait.
///
/// Provides controllable behavior for testing:
/// - Scripted outcome per test name (default: success)
/// - Simulated run duration, global or per test
/// - Holding every run until released
/// - Recorded invocations and the peak number of concurrent runs
///
/// # Example
///
/// ```rust,ignore
/// use sitecrawl_core::testing::{MockTestRunner, ScriptedOutcome};
///
/// let runner = MockTestRunner::new();
/// runner.set_outcome("test_ssl", ScriptedOutcome::fail("expired")).await;
///
/// let report = runner.run("https://example.com", "test_ssl").await;
/// assert_eq!(runner.calls().await.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockTestRunner {
    calls: Arc<RwLock<Vec<RecordedRun>>>,
    outcomes: Arc<RwLock<HashMap<String, ScriptedOutcome>>>,
    delay: Arc<RwLock<Duration>>,
    test_delays: Arc<RwLock<HashMap<String, Duration>>>,
    held: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockTestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTestRunner {
    /// Create a new mock runner where every test succeeds immediately.
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            outcomes: Arc::new(RwLock::new(HashMap::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            test_delays: Arc::new(RwLock::new(HashMap::new())),
            held,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script the outcome of a test name.
    pub async fn set_outcome(&self, test_name: &str, outcome: ScriptedOutcome) {
        self.outcomes
            .write()
            .await
            .insert(test_name.to_string(), outcome);
    }

    /// Set how long every run takes.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Set how long runs of one test take, overriding the global delay.
    pub async fn set_test_delay(&self, test_name: &str, delay: Duration) {
        self.test_delays
            .write()
            .await
            .insert(test_name.to_string(), delay);
    }

    /// Make every run (current and future) wait until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Let held runs continue.
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Get all recorded invocations, in start order.
    pub async fn calls(&self) -> Vec<RecordedRun> {
        self.calls.read().await.clone()
    }

    /// Wait until at least `count` runs have started.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls.read().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Runs currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of runs that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even if the run panics.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, url: &str, test_name: &str) -> TestReport {
        let executed_at = Utc::now();
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.calls.write().await.push(RecordedRun {
            url: url.to_string(),
            test_name: test_name.to_string(),
        });

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        let delay = match self.test_delays.read().await.get(test_name) {
            Some(delay) => *delay,
            None => *self.delay.read().await,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .outcomes
            .read()
            .await
            .get(test_name)
            .cloned()
            .unwrap_or_else(ScriptedOutcome::success);

        match outcome {
            ScriptedOutcome::Success(payload) => TestReport {
                test_name: test_name.to_string(),
                status: TestStatus::Success,
                payload,
                error: None,
                executed_at,
            },
            ScriptedOutcome::Fail(error) => TestReport::failed(test_name, error, executed_at),
            ScriptedOutcome::Panic => panic!("scripted panic in {}", test_name),
        }
    }
}
