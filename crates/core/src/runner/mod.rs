//! Test runner: executes per-test programs in isolated process groups.

mod config;
mod error;
mod process_group;
mod subprocess;
mod traits;
mod types;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use process_group::{adopt_orphans, ProcessGroup};
pub use subprocess::ProcessTestRunner;
pub use traits::TestRunner;
pub use types::TestReport;
