//! Bootstrap configuration
//!
//! Everything here is a launch parameter, nothing is persisted. Loaded from an
//! optional TOML file, overridden from the CLI, then validated before any
//! process is spawned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BootstrapError, Result};
use crate::port::max_attempts_for_base;

/// Environment variable pointing at the CARLA installation
pub const CARLA_ROOT_ENV: &str = "CARLA_ROOT";

/// Maps the simulator can be asked to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Town {
    Town01,
    Town02,
    Town03,
    Town04,
    Town05,
}

impl Town {
    pub const ALL: [Town; 5] = [
        Town::Town01,
        Town::Town02,
        Town::Town03,
        Town::Town04,
        Town::Town05,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Town::Town01 => "Town01",
            Town::Town02 => "Town02",
            Town::Town03 => "Town03",
            Town::Town04 => "Town04",
            Town::Town05 => "Town05",
        }
    }
}

impl fmt::Display for Town {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Town {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        Town::ALL
            .into_iter()
            .find(|town| town.as_str() == s)
            .ok_or_else(|| BootstrapError::UnknownTown(s.to_string()))
    }
}

impl TryFrom<String> for Town {
    type Error = BootstrapError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Town> for String {
    fn from(town: Town) -> Self {
        town.as_str().to_string()
    }
}

/// Rendering quality passed to the simulator as `-quality-level=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum QualityLevel {
    Low,
    #[default]
    Epic,
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityLevel::Low => f.write_str("Low"),
            QualityLevel::Epic => f.write_str("Epic"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Map to load once connected
    #[serde(default = "default_town")]
    pub town: Town,

    /// Fixed simulation frequency in Hz
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u32,

    /// Unconditional wait between spawning the server and the first RPC
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f64,

    /// Timeout applied to connect and to every RPC
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: f64,

    /// Launch-and-connect cycles before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// RPC port of the first attempt; attempt `i` uses `base_port + i`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Host the client connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Simulator executable (defaults to the launcher script under CARLA_ROOT)
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Value for SDL_HINT_CUDA_DEVICE
    #[serde(default = "default_gpu_device")]
    pub gpu_device: String,

    /// Force off-screen rendering and drop DISPLAY
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub quality_level: QualityLevel,
}

// Defaults
fn default_town() -> Town { Town::Town04 }
fn default_frequency_hz() -> u32 { 10 }
fn default_warmup_secs() -> f64 { 30.0 }
fn default_client_timeout_secs() -> f64 { 20.0 }
fn default_max_attempts() -> u32 { 10 }
fn default_base_port() -> u16 { 2000 }
fn default_host() -> String { "localhost".to_string() }
fn default_gpu_device() -> String { "0".to_string() }
fn default_true() -> bool { true }

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            town: default_town(),
            frequency_hz: default_frequency_hz(),
            warmup_secs: default_warmup_secs(),
            client_timeout_secs: default_client_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_port: default_base_port(),
            host: default_host(),
            executable: None,
            gpu_device: default_gpu_device(),
            headless: true,
            quality_level: QualityLevel::default(),
        }
    }
}

impl BootstrapConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BootstrapError::Config(e.to_string()))
    }

    /// Load and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations that cannot produce a usable run.
    pub fn validate(&self) -> Result<()> {
        if self.frequency_hz == 0 {
            return Err(BootstrapError::Config(
                "frequency_hz must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(BootstrapError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_port == 0 {
            return Err(BootstrapError::Config("base_port must not be 0".to_string()));
        }
        let ceiling = max_attempts_for_base(self.base_port);
        if self.max_attempts > ceiling {
            return Err(BootstrapError::Config(format!(
                "max_attempts {} from base_port {} runs past port 65535 (at most {})",
                self.max_attempts, self.base_port, ceiling
            )));
        }
        seconds("warmup_secs", self.warmup_secs, true)?;
        seconds("client_timeout_secs", self.client_timeout_secs, false)?;
        if self.host.trim().is_empty() {
            return Err(BootstrapError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }

    /// Warm-up as a `Duration`. Out-of-range values fall back to the
    /// default; `validate` rejects them.
    pub fn warmup(&self) -> Duration {
        seconds("warmup_secs", self.warmup_secs, true)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_warmup_secs()))
    }

    /// Client timeout as a `Duration`. Out-of-range values fall back to the
    /// default; `validate` rejects them.
    pub fn client_timeout(&self) -> Duration {
        seconds("client_timeout_secs", self.client_timeout_secs, false)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_client_timeout_secs()))
    }

    /// The executable to launch: the explicit override, else the launcher
    /// script under `carla_root`.
    pub fn resolve_executable(&self, carla_root: Option<&Path>) -> Result<PathBuf> {
        if let Some(exe) = &self.executable {
            return Ok(exe.clone());
        }
        match carla_root {
            Some(root) => Ok(root.join(launcher_script_name())),
            None => Err(BootstrapError::Config(format!(
                "{CARLA_ROOT_ENV} is not set and no executable was configured"
            ))),
        }
    }

    /// `resolve_executable` against the process environment.
    pub fn executable_from_env(&self) -> Result<PathBuf> {
        let root = std::env::var_os(CARLA_ROOT_ENV).map(PathBuf::from);
        self.resolve_executable(root.as_deref())
    }
}

/// Convert a seconds field, rejecting NaN, infinities, negatives (and zero
/// unless allowed) and anything too large for a `Duration`.
fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration> {
    let in_range = value > 0.0 || (allow_zero && value == 0.0);
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if in_range => Ok(duration),
        _ => Err(BootstrapError::Config(format!(
            "{name} must be a {} number of seconds no larger than {}, got {value}",
            if allow_zero { "non-negative" } else { "positive" },
            Duration::MAX.as_secs()
        ))),
    }
}

#[cfg(windows)]
fn launcher_script_name() -> &'static str {
    "CarlaUE4.exe"
}

#[cfg(not(windows))]
fn launcher_script_name() -> &'static str {
    "CarlaUE4.sh"
}
