//! Bootstrap loop
//!
//! Each iteration: allocate a port, launch a server, bind the shutdown hook
//! to it, run one attempt. On success the server, its hook and the session
//! go to the caller. On failure the server's process group is killed and its
//! hook removed before the next iteration launches anything, so at most one
//! server and one hook exist at any time.
//!
//! Running out of attempts and failing to spawn at all are fatal: the
//! returned [`BootstrapError`] is meant to end the program.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::attempt::{AttemptManager, AttemptSettings, AttemptStage, ClientSession};
use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::policy::{self, Attempt, NextAction, Outcome};
use crate::process::{Launch, ServerProcess};
use crate::rpc::SimulatorConnector;
use crate::shutdown::{RegistrationHandle, ShutdownRegistrar};

/// How long to wait for a killed server to be reaped before moving on
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a successful bootstrap hands over.
#[derive(Debug)]
pub struct Bootstrapped<T> {
    pub session: ClientSession<T>,
    /// The live server. Its hook stays registered until program exit.
    pub server: ServerProcess,
    pub registration: RegistrationHandle,
    /// Every attempt made, in order, the last one successful
    pub attempts: Vec<Attempt>,
}

pub struct Bootstrapper<L, C> {
    launcher: L,
    attempts: AttemptManager<C>,
    registrar: Arc<ShutdownRegistrar>,
    max_attempts: u32,
    base_port: u16,
}

impl<L: Launch, C: SimulatorConnector> Bootstrapper<L, C> {
    /// Validate `config` and wire up the loop. Nothing is spawned yet.
    pub fn new(
        config: &BootstrapConfig,
        launcher: L,
        connector: C,
        registrar: Arc<ShutdownRegistrar>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            launcher,
            attempts: AttemptManager::new(connector, AttemptSettings::from(config)),
            registrar,
            max_attempts: config.max_attempts,
            base_port: config.base_port,
        })
    }

    /// Run attempts until one succeeds or the budget is spent.
    pub async fn bootstrap(&self) -> Result<Bootstrapped<C::Client>> {
        let mut attempt = Attempt::new(0, self.base_port);
        let mut history = Vec::new();
        let mut last_error = None;

        loop {
            info!(
                attempt = attempt.index + 1,
                max_attempts = self.max_attempts,
                port = attempt.port,
                "Setting up the CARLA simulator"
            );

            debug!(port = attempt.port, stage = %AttemptStage::Launching, "Launching CARLA server");
            let server = self.launcher.launch(attempt.port)?;
            let registration = match self.registrar.register(server.handle()) {
                Ok(registration) => registration,
                Err(e) => {
                    // Never leave an unhooked server behind
                    if let Err(kill_err) = server.terminate() {
                        warn!(pid = server.pid(), error = %kill_err, "Failed to stop unregistered CARLA server");
                    }
                    return Err(e.into());
                }
            };

            let ready = match self.attempts.attempt(attempt.port).await {
                Ok(session) => {
                    attempt.outcome = Outcome::Success;
                    Some(Bootstrapped {
                        session,
                        server,
                        registration,
                        attempts: Vec::new(),
                    })
                }
                Err(failure) => {
                    warn!(
                        attempt = attempt.index + 1,
                        port = attempt.port,
                        stage = %failure.stage,
                        error = %failure.source,
                        "CARLA setup attempt failed"
                    );
                    self.tear_down(server, registration).await;
                    attempt.outcome = Outcome::RetryableFailure;
                    last_error = Some(failure.to_string());
                    None
                }
            };
            history.push(attempt);

            match next_step(policy::decide(&attempt, self.max_attempts), ready) {
                Step::Finish(mut ready) => {
                    info!(
                        attempts = history.len(),
                        port = attempt.port,
                        frame_id = ready.session.frame_id(),
                        "CARLA simulator ready"
                    );
                    ready.attempts = history;
                    return Ok(ready);
                }
                Step::Retry { next_index } => {
                    attempt = Attempt::new(next_index, self.base_port);
                }
                Step::GiveUp => {
                    error!(
                        attempts = self.max_attempts,
                        "Failed to connect to CARLA after {} attempts", self.max_attempts
                    );
                    return Err(BootstrapError::Exhausted {
                        attempts: self.max_attempts,
                        last_error,
                    });
                }
                Step::Mismatch { action, leftover } => {
                    let ready = leftover.is_some();
                    if let Some(leftover) = leftover {
                        self.tear_down(leftover.server, leftover.registration).await;
                    }
                    error!(?action, attempt = attempt.index + 1, ready, "Retry policy and attempt disagree");
                    return Err(BootstrapError::Policy {
                        action: format!("{action:?}"),
                        attempt: attempt.index + 1,
                        ready,
                    });
                }
            }
        }
    }

    /// Kill the failed attempt's process group, drop its hook, reap it.
    async fn tear_down(&self, mut server: ServerProcess, registration: RegistrationHandle) {
        info!(port = server.port(), pid = server.pid(), "Stopping CARLA server");
        if let Err(e) = server.terminate() {
            warn!(pid = server.pid(), error = %e, "Failed to kill CARLA process group");
        }
        self.registrar.unregister(registration);

        match tokio::time::timeout(REAP_TIMEOUT, server.wait()).await {
            Ok(Ok(Some(status))) => debug!(pid = server.pid(), %status, "CARLA server exited"),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(pid = server.pid(), error = %e, "Failed to reap CARLA server"),
            Err(_) => warn!(
                pid = server.pid(),
                timeout = ?REAP_TIMEOUT,
                "CARLA server still running after kill"
            ),
        }
    }
}

/// What the loop does once an attempt has settled.
#[derive(Debug, PartialEq)]
enum Step<T> {
    Finish(T),
    Retry { next_index: u32 },
    GiveUp,
    /// The policy's verdict does not fit the attempt's result
    Mismatch {
        action: Option<NextAction>,
        leftover: Option<T>,
    },
}

fn next_step<T>(action: Option<NextAction>, ready: Option<T>) -> Step<T> {
    match (action, ready) {
        (Some(NextAction::Succeed), Some(ready)) => Step::Finish(ready),
        (Some(NextAction::Retry { next_index }), None) => Step::Retry { next_index },
        (Some(NextAction::FailFatal), None) => Step::GiveUp,
        (action, leftover) => Step::Mismatch { action, leftover },
    }
}
