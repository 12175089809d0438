//! Process-group handles for test programs.
//!
//! Every test program is spawned as the leader of a fresh process group, so
//! anything it forks can be signalled and collected as one unit even after
//! the leader itself has exited.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Upper bound on polls while collecting killed group members.
const REAP_ATTEMPTS: u32 = 100;
const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the process group led by a spawned test program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    /// Group whose id equals the pid of its leader.
    pub fn from_leader(pid: u32) -> Self {
        Self {
            pgid: Pid::from_raw(pid as i32),
        }
    }

    pub fn id(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// Send `signal` to every member.
    ///
    /// Returns `false` when the group no longer has members.
    pub fn signal(&self, signal: Signal) -> bool {
        match killpg(self.pgid, signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!("Failed to send {:?} to process group {}: {}", signal, self.id(), e);
                false
            }
        }
    }

    pub fn terminate(&self) -> bool {
        self.signal(Signal::SIGTERM)
    }

    pub fn kill(&self) -> bool {
        self.signal(Signal::SIGKILL)
    }

    /// True once no process (zombies included) belongs to the group.
    pub fn is_empty(&self) -> bool {
        matches!(killpg(self.pgid, None), Err(Errno::ESRCH))
    }

    /// Kill whatever is left in the group and collect the members we can wait on.
    ///
    /// Members orphaned by the leader are only collectable here when this
    /// process is their subreaper (see [`adopt_orphans`]). Returns `true` if
    /// any member was still present. Calling it again is a no-op.
    pub async fn reap(&self) -> bool {
        if !self.kill() {
            return false;
        }

        let members = Pid::from_raw(-self.id());
        for _ in 0..REAP_ATTEMPTS {
            match waitpid(members, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    debug!("Collected stray process {:?} of group {}", status.pid(), self.id());
                    continue;
                }
                Err(Errno::ECHILD) => {
                    if self.is_empty() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("waitpid on process group {} failed: {}", self.id(), e);
                    break;
                }
            }
            tokio::time::sleep(REAP_INTERVAL).await;
        }

        true
    }
}

/// Become the subreaper for descendants of our children.
///
/// A test program's background children are reparented to us instead of
/// init when the program exits, which lets [`ProcessGroup::reap`] wait on
/// them. Only Linux supports this; elsewhere it does nothing.
pub fn adopt_orphans() {
    #[cfg(target_os = "linux")]
    if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
        warn!("Could not become child subreaper, stray zombies may linger: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_group(script: &str) -> (tokio::process::Child, ProcessGroup) {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let group = ProcessGroup::from_leader(child.id().unwrap());
        (child, group)
    }

    #[tokio::test]
    async fn test_live_group_is_not_empty() {
        let (mut child, group) = spawn_group("exec sleep 30");
        assert!(!group.is_empty());
        assert!(group.kill());
        child.wait().await.unwrap();
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_signal_on_empty_group() {
        let (mut child, group) = spawn_group("exit 0");
        child.wait().await.unwrap();
        assert!(!group.terminate());
        assert!(!group.reap().await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_reap_collects_orphaned_members() {
        adopt_orphans();
        let (mut child, group) = spawn_group("sleep 30 & exit 0");
        child.wait().await.unwrap();

        assert!(!group.is_empty());
        assert!(group.reap().await);
        assert!(group.is_empty());
        assert!(!group.reap().await);
    }
}
