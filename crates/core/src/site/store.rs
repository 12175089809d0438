//! Site source trait and the lazy due-site batch sequence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DuePage, Site, SiteCursor};

/// Errors raised by a site source.
#[derive(Debug, Error)]
pub enum SiteError {
    /// Database error.
    #[error("site database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for SiteError {
    fn from(e: rusqlite::Error) -> Self {
        SiteError::Database(e.to_string())
    }
}

/// Read access to the site registry, plus the post-crawl timestamp update.
pub trait SiteSource: Send + Sync {
    /// Return up to `limit` sites whose last crawl is unset or older than
    /// `cutoff`, strictly after `after` in `(last_crawl, id)` order.
    ///
    /// Implementations stop reading early and return what they have when
    /// `stop` is cancelled.
    fn due_page(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&SiteCursor>,
        limit: usize,
        stop: &CancellationToken,
    ) -> Result<DuePage, SiteError>;

    /// Look up a single site.
    fn get(&self, id: &str) -> Result<Option<Site>, SiteError>;

    /// Record that a site finished a crawl at `at`.
    fn mark_crawled(&self, id: &str, at: DateTime<Utc>) -> Result<(), SiteError>;
}

/// Start a lazy, oldest-first walk over the sites due for a crawl.
///
/// Nothing is read until the first batch is requested, and each batch is a
/// fresh keyset query, so the walk holds no cursor open on the database.
pub fn fetch_due(
    source: Arc<dyn SiteSource>,
    batch_size: usize,
    cutoff: DateTime<Utc>,
    shutdown: CancellationToken,
) -> DueSites {
    DueSites {
        source,
        batch_size: batch_size.max(1),
        cutoff,
        cursor: None,
        shutdown,
        exhausted: false,
    }
}

/// Batches of due sites, each at most `batch_size` long.
pub struct DueSites {
    source: Arc<dyn SiteSource>,
    batch_size: usize,
    cutoff: DateTime<Utc>,
    cursor: Option<SiteCursor>,
    shutdown: CancellationToken,
    exhausted: bool,
}

impl DueSites {
    /// Position of the last site handed out, if any.
    pub fn cursor(&self) -> Option<&SiteCursor> {
        self.cursor.as_ref()
    }
}

impl Iterator for DueSites {
    type Item = Result<Vec<Site>, SiteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if self.shutdown.is_cancelled() {
            info!("Shutdown requested, stopping due-site fetch");
            self.exhausted = true;
            return None;
        }

        let page = match self.source.due_page(
            self.cutoff,
            self.cursor.as_ref(),
            self.batch_size,
            &self.shutdown,
        ) {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                return Some(Err(e));
            }
        };

        // A short page is either the end of the candidates or a read cut
        // off by shutdown; both end the walk after this batch.
        if page.sites.len() < self.batch_size || self.shutdown.is_cancelled() {
            self.exhausted = true;
        }
        if page.sites.is_empty() {
            return None;
        }

        match page.next {
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        debug!("Fetched batch of {} due sites", page.sites.len());
        Some(Ok(page.sites))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves pages out of a pre-sorted vector and counts queries.
    struct VecSource {
        sites: Vec<Site>,
        queries: Mutex<usize>,
    }

    impl SiteSource for VecSource {
        fn due_page(
            &self,
            _cutoff: DateTime<Utc>,
            after: Option<&SiteCursor>,
            limit: usize,
            _stop: &CancellationToken,
        ) -> Result<DuePage, SiteError> {
            *self.queries.lock().unwrap() += 1;
            let start = match after {
                Some(c) => self.sites.iter().position(|s| s.id == c.id).unwrap() + 1,
                None => 0,
            };
            let sites: Vec<Site> = self.sites.iter().skip(start).take(limit).cloned().collect();
            let next = sites.last().map(|s| SiteCursor {
                key: String::new(),
                id: s.id.clone(),
            });
            Ok(DuePage { sites, next })
        }

        fn get(&self, id: &str) -> Result<Option<Site>, SiteError> {
            Ok(self.sites.iter().find(|s| s.id == id).cloned())
        }

        fn mark_crawled(&self, _id: &str, _at: DateTime<Utc>) -> Result<(), SiteError> {
            Ok(())
        }
    }

    fn source(n: usize) -> Arc<VecSource> {
        Arc::new(VecSource {
            sites: (0..n)
                .map(|i| Site::new(format!("site-{:02}", i), format!("site{}.it", i)))
                .collect(),
            queries: Mutex::new(0),
        })
    }

    #[test]
    fn test_batches_respect_size() {
        let src = source(5);
        let batches: Vec<Vec<Site>> = fetch_due(src, 2, Utc::now(), CancellationToken::new())
            .map(Result::unwrap)
            .collect();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_lazy_until_first_batch() {
        let src = source(3);
        let mut due = fetch_due(src.clone(), 2, Utc::now(), CancellationToken::new());
        assert_eq!(*src.queries.lock().unwrap(), 0);
        due.next();
        assert_eq!(*src.queries.lock().unwrap(), 1);
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_query() {
        let src = source(4);
        let batches: Vec<_> = fetch_due(src.clone(), 2, Utc::now(), CancellationToken::new())
            .map(Result::unwrap)
            .collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(*src.queries.lock().unwrap(), 3);
    }

    #[test]
    fn test_cancelled_before_fetch_yields_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let mut due = fetch_due(source(3), 2, Utc::now(), token);
        assert!(due.next().is_none());
    }

    #[test]
    fn test_cancel_between_batches_stops_walk() {
        let token = CancellationToken::new();
        let mut due = fetch_due(source(6), 2, Utc::now(), token.clone());
        assert_eq!(due.next().unwrap().unwrap().len(), 2);
        token.cancel();
        assert!(due.next().is_none());
        assert_eq!(due.cursor().unwrap().id, "site-01");
    }
}
