//! Crawl orchestration.
//!
//! Two independent bounds apply:
//! - Sites: at most `max_queued_site_tasks` submitted and unfinished, of
//!   which at most `max_concurrent_sites` run at once.
//! - Tests: at most `max_concurrent_tests` programs at once, shared by all
//!   running sites.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics;
use crate::results::{ResultStore, TestInvocation};
use crate::runner::{TestReport, TestRunner};
use crate::site::{fetch_due, Site, SiteSource};
use crate::url::{normalize_url, InputError};

use super::config::CrawlerConfig;
use super::gate::SubmissionGate;
use super::types::{CrawlError, CrawlPhase, CrawlStats, CrawlSummary};

/// Drives crawl runs over a site source, a test runner and a result store.
pub struct Crawler {
    config: CrawlerConfig,
    sites: Arc<dyn SiteSource>,
    results: Arc<dyn ResultStore>,
    runner: Arc<dyn TestRunner>,
    shutdown: CancellationToken,
}

/// Everything a site task needs, shared by all site tasks of one run.
struct SiteTaskContext {
    crawl_id: String,
    tests: Vec<String>,
    sites: Arc<dyn SiteSource>,
    results: Arc<dyn ResultStore>,
    runner: Arc<dyn TestRunner>,
    test_pool: Arc<Semaphore>,
    shutdown: CancellationToken,
    stats: CrawlStats,
}

/// Per-run scheduling state.
struct Scheduler {
    ctx: Arc<SiteTaskContext>,
    gate: SubmissionGate,
    site_pool: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        sites: Arc<dyn SiteSource>,
        results: Arc<dyn ResultStore>,
        runner: Arc<dyn TestRunner>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            sites,
            results,
            runner,
            shutdown,
        }
    }

    /// Run (or continue) the crawl identified by `crawl_id`.
    ///
    /// Sites with non-success tests from an earlier run under the same id are
    /// scheduled first, then every due site. Returns once all submitted work
    /// has drained, including after a shutdown request or a fatal source
    /// error.
    ///
    /// Fails before scheduling anything when `retry_failed_tests` does not
    /// match the result store's upsert policy.
    pub async fn run_crawl(&self, crawl_id: &str) -> Result<CrawlSummary, CrawlError> {
        let configured = self.config.upsert_policy();
        let store = self.results.policy();
        if configured != store {
            return Err(CrawlError::PolicyMismatch { configured, store });
        }

        info!(
            "Starting crawl {} ({} tests, {} sites / {} queued / {} tests concurrently)",
            crawl_id,
            self.config.tests.len(),
            self.config.max_concurrent_sites,
            self.config.max_queued_site_tasks,
            self.config.max_concurrent_tests
        );

        let scheduler = Scheduler {
            ctx: Arc::new(SiteTaskContext {
                crawl_id: crawl_id.to_string(),
                tests: self.config.tests.clone(),
                sites: Arc::clone(&self.sites),
                results: Arc::clone(&self.results),
                runner: Arc::clone(&self.runner),
                test_pool: Arc::new(Semaphore::new(self.config.max_concurrent_tests.max(1))),
                shutdown: self.shutdown.clone(),
                stats: CrawlStats::default(),
            }),
            gate: SubmissionGate::new(self.config.max_queued_site_tasks),
            site_pool: Arc::new(Semaphore::new(self.config.max_concurrent_sites.max(1))),
            tracker: TaskTracker::new(),
        };

        let scheduled = self.schedule(&scheduler, crawl_id).await;
        if let Err(e) = &scheduled {
            error!("Crawl {} stopped scheduling: {}", crawl_id, e);
        }

        scheduler.tracker.close();
        if !scheduler.tracker.is_empty() {
            info!(
                "Waiting for {} site tasks of crawl {} to finish",
                scheduler.tracker.len(),
                crawl_id
            );
        }
        scheduler.tracker.wait().await;

        let summary = scheduler
            .ctx
            .stats
            .snapshot(self.shutdown.is_cancelled());
        info!(
            "Crawl {} drained: {} resumed, {} scheduled, {} skipped sites; {} tests run ({} failed), {} already recorded, {} store errors{}",
            crawl_id,
            summary.resumed_sites,
            summary.scheduled_sites,
            summary.skipped_sites,
            summary.tests_run,
            summary.tests_failed,
            summary.tests_already_recorded,
            summary.store_errors,
            if summary.interrupted { " (interrupted)" } else { "" }
        );

        scheduled.map(|()| summary)
    }

    async fn schedule(&self, scheduler: &Scheduler, crawl_id: &str) -> Result<(), CrawlError> {
        let mut resumed = HashSet::new();

        // Resume phase
        let incomplete = self.results.fetch_incomplete(crawl_id)?;
        if !incomplete.is_empty() {
            info!(
                "Resuming {} incomplete sites of crawl {}",
                incomplete.len(),
                crawl_id
            );
        }
        for document in incomplete {
            let Some(site) = self.sites.get(&document.site_id)? else {
                warn!(
                    "Site {} has results in crawl {} but is no longer registered, skipping",
                    document.site_id, crawl_id
                );
                metrics::SITES_SKIPPED
                    .with_label_values(&["unknown_site"])
                    .inc();
                scheduler.ctx.stats.site_skipped();
                continue;
            };

            resumed.insert(site.id.clone());
            if !scheduler.submit(site, CrawlPhase::Resume).await {
                return Ok(());
            }
        }

        // Steady phase
        let cutoff = self.config.cutoff(Utc::now());
        let batches = fetch_due(
            Arc::clone(&self.sites),
            self.config.batch_size,
            cutoff,
            self.shutdown.clone(),
        );
        for batch in batches {
            for site in batch? {
                if resumed.contains(&site.id) {
                    debug!("Site {} already scheduled by resume phase", site.id);
                    continue;
                }
                if !scheduler.submit(site, CrawlPhase::Steady).await {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

impl Scheduler {
    /// Submit a site task once a submission slot is free.
    ///
    /// Returns `false` when shutdown was requested and nothing more should
    /// be submitted.
    async fn submit(&self, site: Site, phase: CrawlPhase) -> bool {
        if self.ctx.shutdown.is_cancelled() {
            info!("Shutdown requested, no more sites will be scheduled");
            return false;
        }

        let url = match site
            .url
            .as_deref()
            .ok_or_else(|| InputError::MissingUrl {
                site_id: site.id.clone(),
            })
            .and_then(normalize_url)
        {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping site {}: {}", site.id, e);
                metrics::SITES_SKIPPED
                    .with_label_values(&["invalid_url"])
                    .inc();
                self.ctx.stats.site_skipped();
                return true;
            }
        };

        let Some(slot) = self.gate.acquire(&self.ctx.shutdown).await else {
            info!("Shutdown requested while waiting to schedule site {}", site.id);
            return false;
        };

        metrics::SITES_SCHEDULED
            .with_label_values(&[phase.as_str()])
            .inc();
        self.ctx.stats.site_scheduled(phase);
        debug!("Scheduled site {} ({}) in {} phase", site.id, url, phase.as_str());

        let span = info_span!("site", site_id = %site.id, crawl_id = %self.ctx.crawl_id);
        let ctx = Arc::clone(&self.ctx);
        let site_pool = Arc::clone(&self.site_pool);
        self.tracker.spawn(
            async move {
                let _slot = slot;
                let Ok(_running) = site_pool.acquire_owned().await else {
                    return;
                };
                ctx.crawl_site(site.id, url).await;
            }
            .instrument(span),
        );
        true
    }
}

impl SiteTaskContext {
    /// Run every declared test not yet recorded for this site, persisting
    /// each result as soon as it completes.
    async fn crawl_site(&self, site_id: String, url: String) {
        let recorded = match self.results.recorded_tests(&site_id, &self.crawl_id) {
            Ok(recorded) => recorded,
            Err(e) => {
                error!(
                    "Could not read recorded tests for site {} in crawl {}: {}",
                    site_id, self.crawl_id, e
                );
                metrics::STORE_ERRORS.inc();
                self.stats.store_error();
                return;
            }
        };

        let policy = self.results.policy();
        let mut pending: Vec<String> = Vec::with_capacity(self.tests.len());
        for name in &self.tests {
            match recorded.get(name) {
                Some(status) if policy.counts_as_done(*status) => {}
                _ => pending.push(name.clone()),
            }
        }
        let already_recorded = self.tests.len() - pending.len();
        if already_recorded > 0 {
            debug!(
                "Site {}: {} of {} tests already recorded",
                site_id,
                already_recorded,
                self.tests.len()
            );
            self.stats.tests_already_recorded(already_recorded);
        }

        let url: Arc<str> = Arc::from(url);
        let mut queue = pending.into_iter();
        let mut next = queue.next();
        let mut units: JoinSet<TestReport> = JoinSet::new();
        let mut names: HashMap<task::Id, String> = HashMap::new();
        let mut interrupted = false;
        let mut persisted_all = true;

        loop {
            tokio::select! {
                biased;
                Some(joined) = units.join_next_with_id(), if !units.is_empty() => {
                    let report = self.settle(joined, &mut names);
                    persisted_all &= self.persist(&site_id, report);
                }
                _ = self.shutdown.cancelled(), if next.is_some() => {
                    info!("Shutdown requested, not submitting remaining tests for site {}", site_id);
                    interrupted = true;
                    next = None;
                }
                Ok(permit) = Arc::clone(&self.test_pool).acquire_owned(), if next.is_some() => {
                    let Some(test_name) = next.take() else { continue };
                    if self.shutdown.is_cancelled() {
                        interrupted = true;
                        continue;
                    }

                    debug!("Submitting {} for site {}", test_name, site_id);
                    let runner = Arc::clone(&self.runner);
                    let url = Arc::clone(&url);
                    let unit_name = test_name.clone();
                    let span = info_span!("test", test_name = %test_name);
                    let handle = units.spawn(
                        async move {
                            let _permit = permit;
                            runner.run(&url, &unit_name).await
                        }
                        .instrument(span),
                    );
                    names.insert(handle.id(), test_name);
                    next = queue.next();
                }
                else => break,
            }
        }

        if interrupted {
            info!("Site {} left incomplete by shutdown", site_id);
            return;
        }
        if !persisted_all {
            warn!(
                "Site {} has unsaved results, leaving its crawl timestamp unchanged",
                site_id
            );
            return;
        }
        if let Err(e) = self.sites.mark_crawled(&site_id, Utc::now()) {
            warn!("Failed to update crawl timestamp of site {}: {}", site_id, e);
        }
        debug!("Site {} finished crawl {}", site_id, self.crawl_id);
    }

    /// Turn a finished unit into a report, including units that panicked.
    fn settle(
        &self,
        joined: Result<(task::Id, TestReport), JoinError>,
        names: &mut HashMap<task::Id, String>,
    ) -> TestReport {
        match joined {
            Ok((id, report)) => {
                names.remove(&id);
                report
            }
            Err(e) => {
                let test_name = names.remove(&e.id()).unwrap_or_default();
                error!("Test {} failed internally: {}", test_name, e);
                TestReport::failed(test_name, format!("internal error: {}", e), Utc::now())
            }
        }
    }

    /// Upsert one result. Returns `false` if the write failed.
    fn persist(&self, site_id: &str, report: TestReport) -> bool {
        metrics::TESTS_COMPLETED
            .with_label_values(&[report.test_name.as_str(), report.status.as_str()])
            .inc();
        self.stats.test_completed(report.status);

        let invocation = TestInvocation::from_report(site_id, self.crawl_id.as_str(), report);
        match self
            .results
            .upsert(site_id, &self.crawl_id, std::slice::from_ref(&invocation))
        {
            Ok(outcome) => {
                if outcome.dropped > 0 {
                    debug!(
                        "Test {} for site {} was already recorded, result dropped",
                        invocation.test_name, site_id
                    );
                } else {
                    debug!(
                        "Recorded {} = {} for site {}",
                        invocation.test_name, invocation.status, site_id
                    );
                }
                true
            }
            Err(e) => {
                error!(
                    "Failed to store {} result for site {} in crawl {}: {}",
                    invocation.test_name, site_id, self.crawl_id, e
                );
                metrics::STORE_ERRORS.inc();
                self.stats.store_error();
                false
            }
        }
    }
}
