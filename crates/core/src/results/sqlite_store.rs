//! SQLite-backed result store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    CrawlResultDocument, ResultStore, StoreError, TestInvocation, TestStatus, UpsertOutcome,
    UpsertPolicy,
};
use crate::db;

/// SQLite-backed result store.
///
/// Documents live in `crawl_results`; their tests in `test_invocations`,
/// ordered by insertion and unique per `(site_id, crawl_id, test_name)`.
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
    policy: UpsertPolicy,
}

/// What to do with one incoming invocation.
enum Merge {
    Append,
    Replace,
    Drop,
}

impl SqliteResultStore {
    /// Open (or create) the store in the database file at `path`.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy: UpsertPolicy::default(),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy: UpsertPolicy::default(),
        })
    }

    /// Set the policy applied to already-recorded test names.
    pub fn with_policy(mut self, policy: UpsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_results (
                site_id TEXT NOT NULL,
                crawl_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (site_id, crawl_id)
            );

            CREATE TABLE IF NOT EXISTS test_invocations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                site_id TEXT NOT NULL,
                crawl_id TEXT NOT NULL,
                test_name TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                error TEXT,
                executed_at TEXT NOT NULL,
                UNIQUE (site_id, crawl_id, test_name)
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_results_crawl_id ON crawl_results(crawl_id);
            CREATE INDEX IF NOT EXISTS idx_test_invocations_crawl_status
                ON test_invocations(crawl_id, status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("result store connection poisoned".to_string()))
    }

    fn merge_decision(&self, existing: Option<TestStatus>, incoming: TestStatus) -> Merge {
        match (existing, self.policy) {
            (None, _) => Merge::Append,
            (Some(_), UpsertPolicy::FirstRecordedWins) => Merge::Drop,
            (Some(stored), UpsertPolicy::SuccessSupersedesFailure) => {
                if !stored.is_success() && incoming.is_success() {
                    Merge::Replace
                } else {
                    Merge::Drop
                }
            }
        }
    }

    fn load_document(
        conn: &Connection,
        site_id: &str,
        crawl_id: &str,
    ) -> Result<Option<CrawlResultDocument>, StoreError> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM crawl_results WHERE site_id = ? AND crawl_id = ?",
                params![site_id, crawl_id],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT test_name, status, payload, error, executed_at FROM test_invocations \
             WHERE site_id = ? AND crawl_id = ? ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![site_id, crawl_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut tests = Vec::new();
        for row in rows {
            let (test_name, status, payload, error, executed_at) = row?;
            let payload: Map<String, Value> = serde_json::from_str(&payload)?;
            let executed_at = db::parse_timestamp(&executed_at).ok_or_else(|| {
                StoreError::Serialization(format!("invalid timestamp: {}", executed_at))
            })?;
            tests.push(TestInvocation {
                site_id: site_id.to_string(),
                crawl_id: crawl_id.to_string(),
                test_name,
                status: TestStatus::from_label(&status),
                payload,
                error,
                executed_at,
            });
        }

        Ok(Some(CrawlResultDocument {
            site_id: site_id.to_string(),
            crawl_id: crawl_id.to_string(),
            tests,
        }))
    }
}

impl ResultStore for SqliteResultStore {
    fn policy(&self) -> UpsertPolicy {
        self.policy
    }

    fn upsert(
        &self,
        site_id: &str,
        crawl_id: &str,
        invocations: &[TestInvocation],
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcome = UpsertOutcome::default();

        outcome.created_document = tx.execute(
            "INSERT OR IGNORE INTO crawl_results (site_id, crawl_id, created_at) VALUES (?, ?, ?)",
            params![site_id, crawl_id, db::format_timestamp(Utc::now())],
        )? == 1;

        for invocation in invocations {
            let existing = tx
                .query_row(
                    "SELECT status FROM test_invocations \
                     WHERE site_id = ? AND crawl_id = ? AND test_name = ?",
                    params![site_id, crawl_id, invocation.test_name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .map(|s| TestStatus::from_label(&s));

            let payload = serde_json::to_string(&invocation.payload)?;
            let executed_at = db::format_timestamp(invocation.executed_at);

            match self.merge_decision(existing, invocation.status) {
                Merge::Append => {
                    tx.execute(
                        "INSERT INTO test_invocations \
                         (site_id, crawl_id, test_name, status, payload, error, executed_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                        params![
                            site_id,
                            crawl_id,
                            invocation.test_name,
                            invocation.status.as_str(),
                            payload,
                            invocation.error,
                            executed_at,
                        ],
                    )?;
                    outcome.appended += 1;
                }
                Merge::Replace => {
                    tx.execute(
                        "UPDATE test_invocations \
                         SET status = ?, payload = ?, error = ?, executed_at = ? \
                         WHERE site_id = ? AND crawl_id = ? AND test_name = ?",
                        params![
                            invocation.status.as_str(),
                            payload,
                            invocation.error,
                            executed_at,
                            site_id,
                            crawl_id,
                            invocation.test_name,
                        ],
                    )?;
                    outcome.replaced += 1;
                }
                Merge::Drop => {
                    debug!(
                        "Dropping duplicate record for test {} of site {} in crawl {}",
                        invocation.test_name, site_id, crawl_id
                    );
                    outcome.dropped += 1;
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn get(
        &self,
        site_id: &str,
        crawl_id: &str,
    ) -> Result<Option<CrawlResultDocument>, StoreError> {
        let conn = self.lock()?;
        Self::load_document(&conn, site_id, crawl_id)
    }

    fn recorded_tests(
        &self,
        site_id: &str,
        crawl_id: &str,
    ) -> Result<HashMap<String, TestStatus>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT test_name, status FROM test_invocations WHERE site_id = ? AND crawl_id = ?",
        )?;
        let rows = stmt.query_map(params![site_id, crawl_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut recorded = HashMap::new();
        for row in rows {
            let (name, status) = row?;
            recorded.insert(name, TestStatus::from_label(&status));
        }
        Ok(recorded)
    }

    fn fetch_incomplete(&self, crawl_id: &str) -> Result<Vec<CrawlResultDocument>, StoreError> {
        let conn = self.lock()?;
        let site_ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT r.site_id FROM crawl_results r \
                 WHERE r.crawl_id = ?1 AND EXISTS ( \
                     SELECT 1 FROM test_invocations t \
                     WHERE t.site_id = r.site_id AND t.crawl_id = r.crawl_id \
                       AND t.status <> 'success') \
                 ORDER BY r.created_at ASC, r.site_id ASC",
            )?;
            let rows = stmt.query_map(params![crawl_id], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut documents = Vec::with_capacity(site_ids.len());
        for site_id in site_ids {
            if let Some(doc) = Self::load_document(&conn, &site_id, crawl_id)? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }
}
