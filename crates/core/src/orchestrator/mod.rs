//! Crawl orchestrator.
//!
//! Drives a crawl run through two phases:
//! - **Resume**: sites with non-success tests left by an earlier run of the same crawl id
//! - **Steady**: every site the source reports as due, oldest first
//!
//! Site tasks are admitted through a backpressure gate and fan their tests out
//! to one test pool shared by all sites. Each result is stored as soon as its
//! test finishes.

mod config;
mod crawler;
mod gate;
mod types;

pub use config::CrawlerConfig;
pub use crawler::Crawler;
pub use gate::{SubmissionGate, SubmissionSlot};
pub use types::{CrawlError, CrawlPhase, CrawlSummary};
