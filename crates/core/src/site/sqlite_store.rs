//! SQLite-backed site registry.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DuePage, Site, SiteCursor, SiteError, SiteSource};
use crate::db;

/// SQLite-backed site registry.
pub struct SqliteSiteStore {
    conn: Mutex<Connection>,
}

impl SqliteSiteStore {
    /// Open (or create) the registry in the database file at `path`.
    pub fn new(path: &Path) -> Result<Self, SiteError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory registry (useful for testing).
    pub fn in_memory() -> Result<Self, SiteError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SiteError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                -- No declared type: a non-text url written by an ingester
                -- must stay non-text.
                url,
                last_crawl TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sites_last_crawl ON sites(last_crawl);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SiteError> {
        self.conn
            .lock()
            .map_err(|_| SiteError::Database("site store connection poisoned".to_string()))
    }

    /// Insert a never-crawled site, or update its URL if it changed.
    ///
    /// Returns true when a new site was inserted.
    pub fn upsert_site(&self, id: &str, url: &str) -> Result<bool, SiteError> {
        let conn = self.lock()?;

        let existing: Option<Value> = conn
            .query_row("SELECT url FROM sites WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            Some(Value::Text(current)) if current == url => Ok(false),
            Some(_) => {
                conn.execute("UPDATE sites SET url = ? WHERE id = ?", params![url, id])?;
                debug!("Updated url for site {}", id);
                Ok(false)
            }
            None => {
                conn.execute(
                    "INSERT INTO sites (id, url, last_crawl) VALUES (?, ?, NULL)",
                    params![id, url],
                )?;
                Ok(true)
            }
        }
    }

    fn row_to_site(row: &rusqlite::Row) -> rusqlite::Result<Site> {
        Self::row_to_entry(row).map(|(site, _)| site)
    }

    /// A site plus its raw `last_crawl` text, the key pages are ordered by.
    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<(Site, String)> {
        let id: String = row.get(0)?;
        let url = match row.get::<_, Value>(1)? {
            Value::Text(url) => Some(url),
            _ => None,
        };
        let raw_last_crawl: Option<String> = row.get(2)?;
        let last_crawl = raw_last_crawl.as_deref().and_then(db::parse_timestamp);

        let site = Site {
            id,
            url,
            last_crawl,
        };
        Ok((site, raw_last_crawl.unwrap_or_default()))
    }

    fn collect_page(
        rows: impl Iterator<Item = rusqlite::Result<(Site, String)>>,
        stop: &CancellationToken,
    ) -> Result<DuePage, SiteError> {
        let mut page = DuePage::default();
        for row in rows {
            if stop.is_cancelled() {
                break;
            }
            let (site, key) = row?;
            page.next = Some(SiteCursor {
                key,
                id: site.id.clone(),
            });
            page.sites.push(site);
        }
        Ok(page)
    }
}

impl SiteSource for SqliteSiteStore {
    fn due_page(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&SiteCursor>,
        limit: usize,
        stop: &CancellationToken,
    ) -> Result<DuePage, SiteError> {
        let conn = self.lock()?;
        let cutoff = db::format_timestamp(cutoff);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // NULL sorts first in ascending order, matching COALESCE(last_crawl, '').
        match after {
            Some(cursor) => {
                let mut stmt = conn.prepare(
                    "SELECT id, url, last_crawl FROM sites \
                     WHERE (last_crawl IS NULL OR last_crawl < ?1) \
                       AND (COALESCE(last_crawl, '') > ?2 \
                            OR (COALESCE(last_crawl, '') = ?2 AND id > ?3)) \
                     ORDER BY last_crawl ASC, id ASC LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    params![cutoff, cursor.key, cursor.id, limit],
                    Self::row_to_entry,
                )?;
                Self::collect_page(rows, stop)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, url, last_crawl FROM sites \
                     WHERE last_crawl IS NULL OR last_crawl < ?1 \
                     ORDER BY last_crawl ASC, id ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![cutoff, limit], Self::row_to_entry)?;
                Self::collect_page(rows, stop)
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<Site>, SiteError> {
        let conn = self.lock()?;
        let site = conn
            .query_row(
                "SELECT id, url, last_crawl FROM sites WHERE id = ?",
                params![id],
                Self::row_to_site,
            )
            .optional()?;
        Ok(site)
    }

    fn mark_crawled(&self, id: &str, at: DateTime<Utc>) -> Result<(), SiteError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sites SET last_crawl = ? WHERE id = ?",
            params![db::format_timestamp(at), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::fetch_due;
    use chrono::Duration;
    use std::sync::Arc;

    fn create_test_store() -> SqliteSiteStore {
        SqliteSiteStore::in_memory().unwrap()
    }

    fn all_due(store: Arc<SqliteSiteStore>, batch_size: usize) -> Vec<Vec<String>> {
        fetch_due(store, batch_size, Utc::now(), CancellationToken::new())
            .map(|batch| batch.unwrap().into_iter().map(|s| s.id).collect())
            .collect()
    }

    #[test]
    fn test_upsert_inserts_then_updates_url() {
        let store = create_test_store();
        assert!(store.upsert_site("c_a001", "comune.a.it").unwrap());
        assert!(!store.upsert_site("c_a001", "comune.a.it").unwrap());
        assert!(!store.upsert_site("c_a001", "www.comune.a.it").unwrap());

        let site = store.get("c_a001").unwrap().unwrap();
        assert_eq!(site.url.as_deref(), Some("www.comune.a.it"));
        assert!(site.last_crawl.is_none());
    }

    #[test]
    fn test_get_missing_site() {
        let store = create_test_store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_non_text_url_reads_as_none() {
        let store = create_test_store();
        store
            .lock()
            .unwrap()
            .execute("INSERT INTO sites (id, url) VALUES ('bad', 42)", [])
            .unwrap();
        let site = store.get("bad").unwrap().unwrap();
        assert!(site.url.is_none());
    }

    #[test]
    fn test_due_order_never_crawled_first_then_oldest() {
        let store = Arc::new(create_test_store());
        let now = Utc::now();
        for id in ["a", "b", "c", "d"] {
            store.upsert_site(id, &format!("{}.it", id)).unwrap();
        }
        store.mark_crawled("a", now - Duration::days(40)).unwrap();
        store.mark_crawled("b", now - Duration::days(90)).unwrap();
        // Fresh: not due.
        store.mark_crawled("c", now + Duration::days(1)).unwrap();

        let batches = all_due(store, 10);
        assert_eq!(batches, vec![vec!["d", "b", "a"]]);
    }

    #[test]
    fn test_due_pagination_covers_every_site_once() {
        let store = Arc::new(create_test_store());
        let now = Utc::now();
        for i in 0..7 {
            let id = format!("s{}", i);
            store.upsert_site(&id, "x.it").unwrap();
            if i % 2 == 0 {
                // Two sites share each timestamp to exercise the id tie-break.
                store
                    .mark_crawled(&id, now - Duration::days(100 - (i / 4) as i64))
                    .unwrap();
            }
        }

        let batches = all_due(store, 3);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);

        let mut ids: Vec<String> = batches.into_iter().flatten().collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 7);
    }

    #[test]
    fn test_marking_during_walk_does_not_skip_remaining() {
        let store = Arc::new(create_test_store());
        for i in 0..4 {
            store.upsert_site(&format!("s{}", i), "x.it").unwrap();
        }

        let mut due = fetch_due(store.clone(), 2, Utc::now(), CancellationToken::new());
        let first = due.next().unwrap().unwrap();
        for site in &first {
            store.mark_crawled(&site.id, Utc::now()).unwrap();
        }
        let second = due.next().unwrap().unwrap();
        assert_eq!(
            second.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["s2", "s3"]
        );
    }

    #[test]
    fn test_cancelled_read_returns_partial_page() {
        let store = create_test_store();
        for i in 0..3 {
            store.upsert_site(&format!("s{}", i), "x.it").unwrap();
        }
        let stop = CancellationToken::new();
        stop.cancel();
        let page = store.due_page(Utc::now(), None, 10, &stop).unwrap();
        assert!(page.sites.len() < 3);
    }

    #[test]
    fn test_externally_written_timestamps_page_once() {
        let store = Arc::new(create_test_store());
        {
            let conn = store.lock().unwrap();
            // Valid RFC 3339 without fractional seconds, as an ingester may write it.
            conn.execute_batch(
                "INSERT INTO sites (id, url, last_crawl) VALUES \
                 ('a', 'a.it', '2020-01-01T00:00:00Z'), \
                 ('b', 'b.it', '2020-02-01T00:00:00Z'), \
                 ('c', 'c.it', '2020-02-01T00:00:00Z');",
            )
            .unwrap();
        }

        let batches = all_due(store, 1);
        assert_eq!(batches, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_page_cursor_keeps_stored_key() {
        let store = create_test_store();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO sites (id, url, last_crawl) VALUES ('a', 'a.it', '2020-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let page = store
            .due_page(Utc::now(), None, 10, &CancellationToken::new())
            .unwrap();
        let next = page.next.unwrap();
        assert_eq!(next.key, "2020-01-01T00:00:00Z");
        assert_eq!(next.id, "a");
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("sites.db");

        let store = SqliteSiteStore::new(&db_path).unwrap();
        store.upsert_site("c_a001", "comune.a.it").unwrap();
        assert!(db_path.exists());

        drop(store);
        let reopened = SqliteSiteStore::new(&db_path).unwrap();
        assert!(reopened.get("c_a001").unwrap().is_some());
    }
}
