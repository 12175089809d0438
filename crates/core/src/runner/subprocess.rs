//! Test runner that executes one external program per test.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::RunnerConfig;
use super::error::RunnerError;
use super::process_group::{adopt_orphans, ProcessGroup};
use super::traits::TestRunner;
use super::types::TestReport;
use crate::metrics;

/// Runs `<tests_dir>/<test_name><ext> <url>` and parses its stdout as JSON.
///
/// Each program leads its own process group. On timeout the group gets
/// SIGTERM, then SIGKILL once the grace period runs out. Whatever the
/// outcome, any member of the group still around afterwards is killed and
/// collected before the report is returned.
pub struct ProcessTestRunner {
    config: RunnerConfig,
}

impl ProcessTestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        adopt_orphans();
        Self { config }
    }

    /// Path of the program implementing `test_name`.
    pub fn program_path(&self, test_name: &str) -> Result<PathBuf, RunnerError> {
        let invalid = test_name.is_empty()
            || test_name == "."
            || test_name == ".."
            || test_name.contains(&['/', '\\', '\0'][..]);
        if invalid {
            return Err(RunnerError::InvalidTestName(test_name.to_string()));
        }

        Ok(self
            .config
            .tests_dir
            .join(format!("{}{}", test_name, self.config.program_extension)))
    }

    fn command_for(&self, program: &Path, url: &str) -> Command {
        let mut command = match &self.config.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(program);
                command
            }
            None => Command::new(program),
        };
        command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        command
    }

    async fn execute(
        &self,
        url: &str,
        test_name: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<TestReport, RunnerError> {
        let program = self.program_path(test_name)?;
        if tokio::fs::metadata(&program).await.is_err() {
            return Err(RunnerError::NotFound { path: program });
        }

        let mut child = self.command_for(&program, url).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::NotFound {
                    path: self
                        .config
                        .interpreter
                        .clone()
                        .unwrap_or_else(|| program.clone()),
                }
            } else {
                RunnerError::Spawn(e)
            }
        })?;

        let group = child.id().map(ProcessGroup::from_leader);
        let result = self.supervise(&mut child, group, test_name).await;

        if let Some(group) = group {
            if group.reap().await {
                metrics::STRAY_GROUPS_REAPED.inc();
                info!(
                    "Killed stray processes left behind by test {} (group {})",
                    test_name,
                    group.id()
                );
            }
        }

        let (status, stdout, stderr) = result?;
        if !status.success() {
            return Err(RunnerError::NonZeroExit {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        TestReport::from_output(test_name, &String::from_utf8_lossy(&stdout), executed_at)
    }

    /// Collect output and exit status, enforcing the timeout.
    async fn supervise(
        &self,
        child: &mut Child,
        group: Option<ProcessGroup>,
        test_name: &str,
    ) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), RunnerError> {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let result = timeout(self.config.timeout(), async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (read_out, read_err, status) = tokio::join!(
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait()
            );
            read_out?;
            read_err?;
            Ok::<_, std::io::Error>((status?, out, err))
        })
        .await;

        match result {
            Ok(Ok(collected)) => Ok(collected),
            Ok(Err(e)) => {
                match group {
                    Some(group) => {
                        group.kill();
                    }
                    None => {
                        let _ = child.start_kill();
                    }
                }
                let _ = child.wait().await;
                Err(RunnerError::Io(e))
            }
            Err(_) => {
                self.escalate(child, group, test_name).await;
                Err(RunnerError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                })
            }
        }
    }

    /// SIGTERM the group, give it the grace period, then SIGKILL.
    async fn escalate(&self, child: &mut Child, group: Option<ProcessGroup>, test_name: &str) {
        warn!(
            "Test {} timed out after {} ms, terminating its process group",
            test_name, self.config.timeout_ms
        );
        match group {
            Some(group) => {
                group.terminate();
            }
            None => {
                let _ = child.start_kill();
            }
        }

        if timeout(self.config.kill_grace(), child.wait()).await.is_ok() {
            return;
        }

        warn!(
            "Test {} still running {} ms after SIGTERM, killing its process group",
            test_name, self.config.kill_grace_ms
        );
        match group {
            Some(group) => {
                group.kill();
            }
            None => {
                let _ = child.start_kill();
            }
        }
        let _ = child.wait().await;
    }
}

#[async_trait]
impl TestRunner for ProcessTestRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, url: &str, test_name: &str) -> TestReport {
        let executed_at = Utc::now();
        let started = Instant::now();
        debug!("Running test {} against {}", test_name, url);

        let report = match self.execute(url, test_name, executed_at).await {
            Ok(report) => report,
            Err(e) => {
                match &e {
                    RunnerError::NonZeroExit { code, .. } => {
                        warn!("Test {} failed for {} (exit code {:?})", test_name, url, code)
                    }
                    RunnerError::InvalidOutput { reason } => warn!(
                        "Test {} printed invalid JSON for {}: {}",
                        test_name, url, reason
                    ),
                    RunnerError::Timeout { .. } => {
                        warn!("Test {} timed out for {}", test_name, url)
                    }
                    other => warn!("Could not run test {} for {}: {}", test_name, url, other),
                }
                TestReport::failed(test_name, e.record_message(), executed_at)
            }
        };

        metrics::TEST_DURATION_SECONDS
            .with_label_values(&[test_name])
            .observe(started.elapsed().as_secs_f64());
        debug!(
            "Test {} for {} finished with {} in {:?}",
            test_name,
            url,
            report.status,
            started.elapsed()
        );
        report
    }
}
