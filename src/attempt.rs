//! A single connect-and-configure attempt
//!
//! ```text
//! Launching -> WarmingUp -> Connecting -> LoadingScenario -> ConfiguringSync -> Ready
//! ```
//!
//! `Launching` belongs to the orchestrator; this module starts at the
//! warm-up. The server gives no readiness signal, so the warm-up is a plain
//! sleep rather than a poll loop. Any RPC error ends the attempt with an
//! [`AttemptFailure`] naming the stage that was running, which the
//! orchestrator treats as retryable.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BootstrapConfig, Town};
use crate::error::RpcError;
use crate::rpc::{SimulatorClient, SimulatorConnector, WeatherParameters, WorldSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    Launching,
    WarmingUp,
    Connecting,
    LoadingScenario,
    ConfiguringSync,
    Ready,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptStage::Launching => "launching",
            AttemptStage::WarmingUp => "warming up",
            AttemptStage::Connecting => "connecting",
            AttemptStage::LoadingScenario => "loading scenario",
            AttemptStage::ConfiguringSync => "configuring synchronous mode",
            AttemptStage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Retryable failure of one attempt.
#[derive(Error, Debug)]
#[error("Attempt on port {port} failed while {stage}: {source}")]
pub struct AttemptFailure {
    pub port: u16,
    /// Stage that was running when the error hit
    pub stage: AttemptStage,
    #[source]
    pub source: RpcError,
}

fn failed_at(port: u16, stage: AttemptStage) -> impl FnOnce(RpcError) -> AttemptFailure {
    move |source| AttemptFailure {
        port,
        stage,
        source,
    }
}

/// A connected simulator in fixed-step synchronous mode.
///
/// The connection parameters are fixed at creation. The client is exposed so
/// the caller can drive ticks; closing it does not stop the server.
pub struct ClientSession<C> {
    host: String,
    port: u16,
    timeout: Duration,
    town: Town,
    frequency_hz: u32,
    frame_id: u64,
    client: C,
}

impl<C> fmt::Debug for ClientSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("town", &self.town)
            .field("frequency_hz", &self.frequency_hz)
            .field("frame_id", &self.frame_id)
            .finish_non_exhaustive()
    }
}

impl<C> ClientSession<C> {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn town(&self) -> Town {
        self.town
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Frame on which synchronous mode took effect
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

/// Per-attempt parameters that do not change between attempts.
#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub host: String,
    pub town: Town,
    pub frequency_hz: u32,
    pub client_timeout: Duration,
    pub warmup: Duration,
}

impl From<&BootstrapConfig> for AttemptSettings {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            host: config.host.clone(),
            town: config.town,
            frequency_hz: config.frequency_hz,
            client_timeout: config.client_timeout(),
            warmup: config.warmup(),
        }
    }
}

pub struct AttemptManager<C> {
    connector: C,
    settings: AttemptSettings,
}

impl<C: SimulatorConnector> AttemptManager<C> {
    pub fn new(connector: C, settings: AttemptSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Warm up, connect, load the town and lock the world to fixed steps.
    pub async fn attempt(&self, port: u16) -> Result<ClientSession<C::Client>, AttemptFailure> {
        let settings = &self.settings;

        debug!(
            port,
            stage = %AttemptStage::WarmingUp,
            warmup = ?settings.warmup,
            "Waiting for CARLA server to boot"
        );
        tokio::time::sleep(settings.warmup).await;

        info!(port, stage = %AttemptStage::Connecting, "Connecting CARLA client");
        let mut client = self
            .connector
            .connect(&settings.host, port, settings.client_timeout)
            .await
            .map_err(failed_at(port, AttemptStage::Connecting))?;

        info!(port, town = %settings.town, stage = %AttemptStage::LoadingScenario, "Loading world");
        client
            .load_world(settings.town)
            .await
            .map_err(failed_at(port, AttemptStage::LoadingScenario))?;
        client
            .set_weather(&WeatherParameters::clear_noon())
            .await
            .map_err(failed_at(port, AttemptStage::LoadingScenario))?;

        debug!(
            port,
            frequency_hz = settings.frequency_hz,
            stage = %AttemptStage::ConfiguringSync,
            "Applying fixed-step synchronous settings"
        );
        let frame_id = client
            .apply_settings(&WorldSettings::fixed_step(settings.frequency_hz))
            .await
            .map_err(failed_at(port, AttemptStage::ConfiguringSync))?;

        match client.server_version().await {
            Ok(version) => debug!(server_version = %version, "Server version"),
            Err(e) => warn!(error = %e, "Could not query server version"),
        }
        debug!(client_version = client.client_version(), "Client version");

        info!(port, frame_id, stage = %AttemptStage::Ready, "CARLA world configured");
        Ok(ClientSession {
            host: settings.host.clone(),
            port,
            timeout: settings.client_timeout,
            town: settings.town,
            frequency_hz: settings.frequency_hz,
            frame_id,
            client,
        })
    }
}
