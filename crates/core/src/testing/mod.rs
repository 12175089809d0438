//! Testing utilities and mock implementations.
//!
//! `MockTestRunner` stands in for the process runner so crawls can be
//! exercised without spawning programs; `fixtures` builds stores and
//! executable test scripts on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use sitecrawl_core::testing::{fixtures, MockTestRunner, ScriptedOutcome};
//!
//! let runner = MockTestRunner::new();
//! runner.set_outcome("test_ssl", ScriptedOutcome::fail("expired")).await;
//!
//! let sites = fixtures::site_store(&[("c_a001", "comune.a.it")]);
//! ```

mod mock_test_runner;

pub use mock_test_runner::{MockTestRunner, RecordedRun, ScriptedOutcome};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use crate::site::SqliteSiteStore;

    /// In-memory site store seeded with `(id, url)` pairs, none crawled yet.
    ///
    /// Panics if the store cannot be created.
    pub fn site_store(sites: &[(&str, &str)]) -> Arc<SqliteSiteStore> {
        let store = SqliteSiteStore::in_memory().expect("in-memory site store");
        for (id, url) in sites {
            store.upsert_site(id, url).expect("seed site");
        }
        Arc::new(store)
    }

    /// Write an executable `#!/bin/sh` test program into `dir`.
    ///
    /// Panics on I/O errors.
    #[cfg(unix)]
    pub fn write_test_program(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write test program");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("make test program executable");
        path
    }

    /// Body of a program that prints `payload` as its JSON result.
    pub fn json_program(payload: &serde_json::Value) -> String {
        format!("cat <<'EOF'\n{}\nEOF", payload)
    }
}
