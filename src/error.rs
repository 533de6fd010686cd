//! Error types for carla-bootstrap

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the simulator over RPC.
///
/// Every variant is retryable from the bootstrap loop's point of view.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Connection closed by server")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error in {method}: {message}")]
    Remote { method: String, message: String },
}

/// Fatal bootstrap errors. None of these are retried.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown town '{0}', expected one of Town01, Town02, Town03, Town04, Town05")]
    UnknownTown(String),

    #[error("Failed to spawn simulator {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shutdown hook registration failed: {0}")]
    Registration(#[from] crate::shutdown::ShutdownError),

    #[error("Failed to connect to CARLA after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("Retry policy chose {action} after attempt {attempt} (session ready: {ready})")]
    Policy {
        action: String,
        attempt: u32,
        ready: bool,
    },
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
