//! Site records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A target site, as maintained by the external ingestion process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Stable identifier (e.g. an administration code).
    pub id: String,
    /// Raw URL as ingested. `None` when the stored value is absent or not text.
    pub url: Option<String>,
    /// When the site was last crawled to completion. `None` = never.
    pub last_crawl: Option<DateTime<Utc>>,
}

impl Site {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Some(url.into()),
            last_crawl: None,
        }
    }
}

/// Position in the due-site ordering, used for keyset pagination.
///
/// Sites are ordered by `(key, id)` where `key` is the source's own sort key
/// for the last crawl, empty for never-crawled sites. The key is kept
/// exactly as the source compares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteCursor {
    pub key: String,
    pub id: String,
}

/// One page of due sites and the position to continue after.
#[derive(Debug, Clone, Default)]
pub struct DuePage {
    pub sites: Vec<Site>,
    /// `None` when the page is empty.
    pub next: Option<SiteCursor>,
}
