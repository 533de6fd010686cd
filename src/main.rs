//! carla-bootstrap: bring up a lock-step CARLA server for training
//!
//! Launches the simulator, retries until a synchronous world is ready,
//! optionally advances a few frames, then holds the server until Ctrl-C.
//! The server's process group is killed on every way out.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carla_bootstrap::{
    rpc::TcpConnector, BootstrapConfig, Bootstrapper, QualityLevel, ShutdownRegistrar,
    ShutdownSignal, SimulatorClient, SimulatorLauncher, Town,
};

/// Exit status used when a signal interrupts the run
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "carla-bootstrap")]
#[command(about = "Launch CARLA and configure it for fixed-step synchronous simulation")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "CARLA_BOOTSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// CARLA map to load (Town01..Town05)
    #[arg(long = "map", env = "CARLA_TOWN")]
    town: Option<Town>,

    /// Simulation frequency in Hz
    #[arg(long, env = "CARLA_FPS")]
    fps: Option<u32>,

    /// Seconds to wait after spawning the server before connecting
    #[arg(long)]
    warmup_secs: Option<f64>,

    /// Client RPC timeout in seconds
    #[arg(long)]
    client_timeout_secs: Option<f64>,

    /// Launch-and-connect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// RPC port of the first attempt
    #[arg(long, env = "CARLA_BASE_PORT")]
    base_port: Option<u16>,

    /// Simulator executable (defaults to the launcher under CARLA_ROOT)
    #[arg(long, env = "CARLA_EXECUTABLE")]
    executable: Option<PathBuf>,

    /// GPU index exported as SDL_HINT_CUDA_DEVICE
    #[arg(long)]
    gpu_device: Option<String>,

    #[arg(long, value_enum)]
    quality_level: Option<QualityLevel>,

    /// Render to a window instead of off-screen
    #[arg(long)]
    windowed: bool,

    /// Synchronous ticks to advance once the world is ready
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Stop the server right after setup instead of holding it until Ctrl-C
    #[arg(long)]
    exit_after_setup: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BootstrapConfig> {
        let mut config = match &self.config {
            Some(path) => BootstrapConfig::load(path)?,
            None => BootstrapConfig::default(),
        };

        if let Some(town) = self.town {
            config.town = town;
        }
        if let Some(fps) = self.fps {
            config.frequency_hz = fps;
        }
        if let Some(secs) = self.warmup_secs {
            config.warmup_secs = secs;
        }
        if let Some(secs) = self.client_timeout_secs {
            config.client_timeout_secs = secs;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(base_port) = self.base_port {
            config.base_port = base_port;
        }
        if let Some(executable) = &self.executable {
            config.executable = Some(executable.clone());
        }
        if let Some(gpu_device) = &self.gpu_device {
            config.gpu_device = gpu_device.clone();
        }
        if let Some(level) = self.quality_level {
            config.quality_level = level;
        }
        if self.windowed {
            config.headless = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("carla_bootstrap={},info", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.load_config()?;
    let executable = config.executable_from_env()?;

    info!("Town: {}", config.town);
    info!("Frequency: {} Hz", config.frequency_hz);
    info!("Executable: {}", executable.display());
    info!(
        "Ports: {}..={}",
        config.base_port,
        u32::from(config.base_port) + config.max_attempts - 1
    );

    let registrar = Arc::new(ShutdownRegistrar::new());
    let launcher = SimulatorLauncher::from_config(&config, executable);
    let bootstrapper = Bootstrapper::new(&config, launcher, TcpConnector, Arc::clone(&registrar))?;
    let mut signals = ShutdownSignal::new()?;

    // A signal mid-attempt drops the attempt; the registrar still holds the
    // hook for its server.
    let ready = tokio::select! {
        result = bootstrapper.bootstrap() => result?,
        name = signals.recv() => {
            warn!(signal = name, "Interrupted during bootstrap");
            registrar.fire();
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    let mut session = ready.session;
    let _server = ready.server;
    info!(
        host = session.host(),
        port = session.port(),
        town = %session.town(),
        timeout = ?session.timeout(),
        frame_id = session.frame_id(),
        pid = registrar.active_pid(),
        "CARLA ready in synchronous mode"
    );

    for _ in 0..cli.ticks {
        let frame = tokio::select! {
            frame = session.client_mut().tick() => frame?,
            name = signals.recv() => {
                warn!(signal = name, "Interrupted while ticking");
                registrar.fire();
                return Ok(ExitCode::from(INTERRUPTED));
            }
        };
        tracing::debug!(frame, "Tick");
    }
    if cli.ticks > 0 {
        info!(ticks = cli.ticks, "Advanced simulation");
    }

    if !cli.exit_after_setup {
        info!("Holding CARLA server, press Ctrl-C to stop");
        let name = signals.recv().await;
        info!(signal = name, "Stopping");
    }

    drop(session);
    registrar.fire();
    Ok(ExitCode::SUCCESS)
}
