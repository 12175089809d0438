//! Site registry: the stream of sites due for a crawl.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteSiteStore;
pub use store::{fetch_due, DueSites, SiteError, SiteSource};
pub use types::{DuePage, Site, SiteCursor};
