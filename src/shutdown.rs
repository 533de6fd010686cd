//! Exit-time cleanup of the spawned simulator
//!
//! The registrar owns a single slot holding the termination hook for the
//! current server. Failed attempts empty the slot before the next launch, so
//! the hook can never point at a dead or foreign process group.
//!
//! The slot fires when [`ShutdownRegistrar::fire`] is called (signal
//! handler, fatal exit) or when the registrar is dropped at the end of
//! `main`. Firing takes the hook out of the slot, so a second fire does
//! nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::ProcessHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("a hook for pid {active_pid} is still registered")]
    AlreadyRegistered { active_pid: u32 },
}

/// Proof of registration, consumed by [`ShutdownRegistrar::unregister`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping the handle leaves the hook registered until exit"]
pub struct RegistrationHandle {
    id: u64,
    pid: u32,
}

impl RegistrationHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

#[derive(Debug)]
struct Registration {
    id: u64,
    process: Arc<dyn ProcessHandle>,
}

#[derive(Debug, Default)]
pub struct ShutdownRegistrar {
    slot: Mutex<Option<Registration>>,
    next_id: AtomicU64,
}

impl ShutdownRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the exit hook to `process`.
    ///
    /// Fails if a registration is already active; callers must unregister
    /// the previous attempt's hook first.
    pub fn register(
        &self,
        process: Arc<dyn ProcessHandle>,
    ) -> Result<RegistrationHandle, ShutdownError> {
        let mut slot = self.slot();
        if let Some(active) = slot.as_ref() {
            return Err(ShutdownError::AlreadyRegistered {
                active_pid: active.process.pid(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = process.pid();
        *slot = Some(Registration { id, process });
        debug!(pid, registration = id, "Registered shutdown hook");

        Ok(RegistrationHandle { id, pid })
    }

    /// Remove the hook without running it.
    ///
    /// Returns `false` when `handle` is not the active registration.
    pub fn unregister(&self, handle: RegistrationHandle) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(active) if active.id == handle.id => {
                *slot = None;
                debug!(pid = handle.pid, registration = handle.id, "Removed shutdown hook");
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Pid targeted by the active hook, if any.
    pub fn active_pid(&self) -> Option<u32> {
        self.slot().as_ref().map(|r| r.process.pid())
    }

    /// Run the active hook, if any, and clear the slot.
    ///
    /// Returns `true` when a process group was terminated.
    pub fn fire(&self) -> bool {
        let registration = self.slot().take();
        let Some(registration) = registration else {
            return false;
        };

        let pid = registration.process.pid();
        match registration.process.terminate() {
            Ok(()) => {
                info!(pid, "Terminated CARLA server on shutdown");
                true
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to terminate CARLA server on shutdown");
                false
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Registration>> {
        // Poisoning only means a panic elsewhere; the slot itself is still valid.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ShutdownRegistrar {
    fn drop(&mut self) {
        self.fire();
    }
}
