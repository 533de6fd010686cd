//! Simulator process launch
//!
//! Spawns the CARLA server as a child in its own process group with a
//! controlled environment. The server forks helper processes of its own, so
//! termination always targets the whole group (POSIX) or process tree
//! (Windows) through a [`ProcessHandle`], never the bare child.
//!
//! Launching does not wait for the server to come up; the attempt manager
//! owns the warm-up.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::ProcessGroup as PlatformHandle;
#[cfg(windows)]
pub use windows::ProcessTree as PlatformHandle;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::info;

use crate::config::{BootstrapConfig, QualityLevel};
use crate::error::{BootstrapError, Result};

/// Capability to force-kill a spawned process and every descendant.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS id of the group leader / root of the tree
    fn pid(&self) -> u32;

    /// Kill immediately. Calling it again after success is a no-op.
    fn terminate(&self) -> std::io::Result<()>;
}

/// Environment changes applied on top of the parent's environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    set: BTreeMap<String, String>,
    remove: BTreeSet<String>,
}

impl EnvOverlay {
    /// Overlay for a CARLA server: GPU pinned, and when headless, SDL forced
    /// off-screen with no X display to attach to.
    pub fn for_simulator(headless: bool, gpu_device: &str) -> Self {
        let overlay = Self::default().set("SDL_HINT_CUDA_DEVICE", gpu_device);
        if headless {
            overlay
                .set("SDL_VIDEODRIVER", "offscreen")
                .remove("DISPLAY")
        } else {
            overlay
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.remove.remove(&key);
        self.set.insert(key, value.into());
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set.remove(&key);
        self.remove.insert(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.set.get(key).map(String::as_str)
    }

    pub fn removes(&self, key: &str) -> bool {
        self.remove.contains(key)
    }

    /// Unset the removed keys, then set the overrides. Everything else is
    /// inherited from this process.
    fn apply(&self, cmd: &mut Command) {
        for key in &self.remove {
            cmd.env_remove(key);
        }
        cmd.envs(&self.set);
    }
}

/// A running (or once-running) simulator owned by one attempt.
pub struct ServerProcess {
    port: u16,
    handle: Arc<dyn ProcessHandle>,
    child: Option<Child>,
    env: EnvOverlay,
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("pid", &self.pid())
            .field("port", &self.port)
            .field("env", &self.env)
            .finish()
    }
}

impl ServerProcess {
    /// Wrap an externally managed handle. No child is reaped for it.
    pub fn from_handle(port: u16, handle: Arc<dyn ProcessHandle>) -> Self {
        Self {
            port,
            handle,
            child: None,
            env: EnvOverlay::default(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Overlay the server was launched with.
    pub fn env(&self) -> &EnvOverlay {
        &self.env
    }

    /// Shared termination handle, handed to the shutdown registrar.
    pub fn handle(&self) -> Arc<dyn ProcessHandle> {
        Arc::clone(&self.handle)
    }

    /// Kill the whole process group.
    pub fn terminate(&self) -> std::io::Result<()> {
        self.handle.terminate()
    }

    /// Reap the direct child. `None` when this process has no owned child.
    pub async fn wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.wait().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Starts one simulator server per call.
pub trait Launch: Send + Sync {
    fn launch(&self, port: u16) -> Result<ServerProcess>;
}

/// Launches the real CARLA executable.
#[derive(Debug, Clone)]
pub struct SimulatorLauncher {
    executable: PathBuf,
    leading_args: Vec<String>,
    quality_level: QualityLevel,
    env: EnvOverlay,
}

impl SimulatorLauncher {
    /// Headless launcher on GPU 0 at Epic quality.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            leading_args: Vec::new(),
            quality_level: QualityLevel::Epic,
            env: EnvOverlay::for_simulator(true, "0"),
        }
    }

    pub fn from_config(config: &BootstrapConfig, executable: impl Into<PathBuf>) -> Self {
        Self::new(executable)
            .with_quality_level(config.quality_level)
            .with_env(EnvOverlay::for_simulator(config.headless, &config.gpu_device))
    }

    /// Arguments placed before the simulator flags, for wrapper commands.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quality_level(mut self, level: QualityLevel) -> Self {
        self.quality_level = level;
        self
    }

    pub fn with_env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }

    /// Simulator flags for the given RPC port.
    pub fn simulator_args(&self, port: u16) -> Vec<String> {
        vec![
            "-opengl".to_string(),
            format!("-carla-rpc-port={port}"),
            format!("-quality-level={}", self.quality_level),
        ]
    }

    fn command(&self, port: u16) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.leading_args)
            .args(self.simulator_args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        self.env.apply(&mut cmd);

        #[cfg(unix)]
        unix::detach(&mut cmd);
        #[cfg(windows)]
        windows::detach(&mut cmd);

        cmd
    }
}

impl Launch for SimulatorLauncher {
    fn launch(&self, port: u16) -> Result<ServerProcess> {
        let spawn_error = |source| BootstrapError::Spawn {
            path: self.executable.clone(),
            source,
        };

        let child = self.command(port).spawn().map_err(spawn_error)?;
        let pid = child.id().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulator exited before its pid could be read",
            ))
        })?;

        info!(
            pid,
            port,
            executable = %self.executable.display(),
            "Spawned CARLA server"
        );

        Ok(ServerProcess {
            port,
            handle: Arc::new(PlatformHandle::for_child(pid)),
            child: Some(child),
            env: self.env.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_overlay() {
        let overlay = EnvOverlay::for_simulator(true, "1");
        assert_eq!(overlay.get("SDL_VIDEODRIVER"), Some("offscreen"));
        assert_eq!(overlay.get("SDL_HINT_CUDA_DEVICE"), Some("1"));
        assert!(overlay.removes("DISPLAY"));
    }

    #[test]
    fn test_windowed_overlay_keeps_display() {
        let overlay = EnvOverlay::for_simulator(false, "0");
        assert_eq!(overlay.get("SDL_VIDEODRIVER"), None);
        assert!(!overlay.removes("DISPLAY"));
    }

    #[test]
    fn test_set_after_remove_wins() {
        let overlay = EnvOverlay::default().remove("DISPLAY").set("DISPLAY", ":1");
        assert_eq!(overlay.get("DISPLAY"), Some(":1"));
        assert!(!overlay.removes("DISPLAY"));
    }

    #[test]
    fn test_simulator_args() {
        let launcher = SimulatorLauncher::new("/opt/carla/CarlaUE4.sh");
        assert_eq!(
            launcher.simulator_args(2003),
            vec!["-opengl", "-carla-rpc-port=2003", "-quality-level=Epic"]
        );

        let launcher = launcher.with_quality_level(QualityLevel::Low);
        assert!(launcher
            .simulator_args(2000)
            .contains(&"-quality-level=Low".to_string()));
    }

    #[test]
    fn test_command_layout() {
        let launcher = SimulatorLauncher::new("/opt/carla/CarlaUE4.sh").with_leading_args(["-nosound"]);
        let cmd = launcher.command(2001);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-nosound");
        assert!(args.contains(&"-carla-rpc-port=2001".to_string()));
    }

    #[tokio::test]
    async fn test_launch_missing_executable_is_spawn_error() {
        let launcher = SimulatorLauncher::new("/nonexistent/carla/CarlaUE4.sh");
        let err = launcher.launch(2000).unwrap_err();
        assert!(matches!(err, BootstrapError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/carla/CarlaUE4.sh"));
    }
}
