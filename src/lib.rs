//! carla-bootstrap - gets a training loop a lock-step CARLA world
//!
//! Spawns the simulator as a child process, waits for it to boot, connects,
//! loads the requested town and switches the world into fixed-step
//! synchronous mode. Failed attempts are torn down and retried on the next
//! port; the surviving server stays bound to a shutdown hook that kills its
//! whole process group when the program exits.
//!
//! ## Modules
//!
//! - **port**: attempt index to RPC port mapping
//! - **process**: simulator launch and platform process-group termination
//! - **shutdown**: single-slot registry for the exit-time kill hook
//! - **signal**: Ctrl-C / SIGTERM listeners that outlive a single wait
//! - **rpc**: msgpack-rpc client for the simulator
//! - **attempt**: one warm-up/connect/configure cycle
//! - **policy**: retry decision table
//! - **orchestrator**: the retrying bootstrap loop

pub mod attempt;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod port;
pub mod process;
pub mod rpc;
pub mod shutdown;
pub mod signal;

pub use attempt::{AttemptFailure, AttemptManager, AttemptStage, ClientSession};
pub use config::{BootstrapConfig, QualityLevel, Town};
pub use error::{BootstrapError, RpcError};
pub use orchestrator::{Bootstrapped, Bootstrapper};
pub use process::{ProcessHandle, ServerProcess, SimulatorLauncher};
pub use rpc::{SimulatorClient, SimulatorConnector};
pub use shutdown::{RegistrationHandle, ShutdownRegistrar};
pub use signal::ShutdownSignal;
