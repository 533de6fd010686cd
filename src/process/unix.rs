//! POSIX process-group handling

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;

use super::ProcessHandle;

/// Session/group led by the spawned simulator.
///
/// The child calls `setsid()` before exec, so its pid is also its group id
/// and `killpg` reaches every helper it forks.
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: libc::pid_t,
    killed: AtomicBool,
}

impl ProcessGroup {
    /// Group led by a child spawned through [`detach`].
    pub fn for_child(pid: u32) -> Self {
        Self {
            pgid: pid as libc::pid_t,
            killed: AtomicBool::new(false),
        }
    }
}

impl ProcessHandle for ProcessGroup {
    fn pid(&self) -> u32 {
        self.pgid as u32
    }

    fn terminate(&self) -> io::Result<()> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // SAFETY: killpg only sends a signal; a stale pgid yields ESRCH.
        let rc = unsafe { libc::killpg(self.pgid, libc::SIGKILL) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // Group already gone
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            self.killed.store(false, Ordering::SeqCst);
            return Err(err);
        }

        Ok(())
    }
}

/// Start the child in a new session so it leads its own process group.
pub(super) fn detach(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
