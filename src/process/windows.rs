//! Windows process-tree handling

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;

use super::ProcessHandle;

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// taskkill exit code when the pid no longer exists
const TASKKILL_NOT_FOUND: i32 = 128;

/// Process tree rooted at the spawned simulator.
#[derive(Debug)]
pub struct ProcessTree {
    pid: u32,
    killed: AtomicBool,
}

impl ProcessTree {
    pub fn for_child(pid: u32) -> Self {
        Self {
            pid,
            killed: AtomicBool::new(false),
        }
    }
}

impl ProcessHandle for ProcessTree {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self) -> io::Result<()> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let status = std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(s) if s.success() || s.code() == Some(TASKKILL_NOT_FOUND) => Ok(()),
            Ok(s) => {
                self.killed.store(false, Ordering::SeqCst);
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("taskkill for pid {} exited with {}", self.pid, s),
                ))
            }
            Err(e) => {
                self.killed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Give the child its own process group, detached from our console signals.
pub(super) fn detach(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}
