//! Configuration for the test runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How test programs are located and supervised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory holding one program per test name.
    #[serde(default = "default_tests_dir")]
    pub tests_dir: PathBuf,

    /// Optional interpreter; programs are then run as `<interpreter> <program> <url>`.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    /// Appended to the test name to form the program file name (e.g. ".py").
    #[serde(default)]
    pub program_extension: String,

    /// Wall-clock limit for one test program (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a timed-out program gets between SIGTERM and SIGKILL (milliseconds).
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_tests_dir() -> PathBuf {
    PathBuf::from("tests")
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_kill_grace_ms() -> u64 {
    10_000
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tests_dir: default_tests_dir(),
            interpreter: None,
            program_extension: String::new(),
            timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}
