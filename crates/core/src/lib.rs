#[cfg(not(unix))]
compile_error!("sitecrawl-core needs a Unix platform: test programs run in POSIX process groups");

pub mod config;
mod db;
pub mod metrics;
pub mod orchestrator;
pub mod results;
pub mod runner;
pub mod shutdown;
pub mod site;
pub mod testing;
pub mod url;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    LogFormat, LoggingConfig,
};
pub use orchestrator::{
    CrawlError, CrawlPhase, CrawlSummary, Crawler, CrawlerConfig, SubmissionGate, SubmissionSlot,
};
pub use results::{
    CrawlResultDocument, ResultStore, SqliteResultStore, StoreError, TestInvocation, TestStatus,
    UpsertOutcome, UpsertPolicy,
};
pub use runner::{ProcessGroup, ProcessTestRunner, RunnerConfig, RunnerError, TestReport, TestRunner};
pub use shutdown::ShutdownController;
pub use site::{fetch_due, DuePage, DueSites, Site, SiteCursor, SiteError, SiteSource, SqliteSiteStore};
pub use url::{normalize_url, InputError};
