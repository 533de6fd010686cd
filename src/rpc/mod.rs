//! Simulator RPC boundary
//!
//! [`SimulatorConnector`] and [`SimulatorClient`] are the only surface the
//! bootstrap logic sees. [`client::RpcClient`] implements them over
//! msgpack-rpc on TCP, which is what the CARLA server speaks.

pub mod client;
pub mod codec;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Town;
use crate::error::RpcError;

pub use client::{RpcClient, TcpConnector};

/// Opens client sessions against a simulator server.
#[async_trait]
pub trait SimulatorConnector: Send + Sync {
    type Client: SimulatorClient;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self::Client, RpcError>;
}

/// Request/response operations against a connected simulator.
#[async_trait]
pub trait SimulatorClient: Send {
    /// Load a map, resetting episode settings to the server defaults.
    async fn load_world(&mut self, town: Town) -> Result<(), RpcError>;

    /// Fire-and-forget; only transport errors are reported.
    async fn set_weather(&mut self, weather: &WeatherParameters) -> Result<(), RpcError>;

    /// Apply episode settings and return the frame they take effect on.
    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<u64, RpcError>;

    /// Advance a synchronous world by one fixed step, returning the new frame.
    async fn tick(&mut self) -> Result<u64, RpcError>;

    async fn server_version(&mut self) -> Result<String, RpcError>;

    fn client_version(&self) -> &str;
}

/// Episode settings. Serialized positionally, in field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSettings {
    pub synchronous_mode: bool,
    pub no_rendering_mode: bool,
    pub fixed_delta_seconds: Option<f64>,
    pub substepping: bool,
    pub max_substep_delta_time: f64,
    pub max_substeps: i32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            synchronous_mode: false,
            no_rendering_mode: false,
            fixed_delta_seconds: None,
            substepping: true,
            max_substep_delta_time: 0.01,
            max_substeps: 10,
        }
    }
}

impl WorldSettings {
    /// Lock-step mode: time only advances on `tick`, by `1 / frequency_hz`.
    pub fn fixed_step(frequency_hz: u32) -> Self {
        Self {
            synchronous_mode: true,
            fixed_delta_seconds: Some(1.0 / f64::from(frequency_hz)),
            ..Default::default()
        }
    }
}

/// Weather state. Serialized positionally, in field order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherParameters {
    pub cloudiness: f32,
    pub precipitation: f32,
    pub precipitation_deposits: f32,
    pub wind_intensity: f32,
    pub sun_azimuth_angle: f32,
    pub sun_altitude_angle: f32,
    pub fog_density: f32,
    pub fog_distance: f32,
    pub fog_falloff: f32,
    pub wetness: f32,
}

impl WeatherParameters {
    pub fn clear_noon() -> Self {
        Self {
            cloudiness: 5.0,
            precipitation: 0.0,
            precipitation_deposits: 0.0,
            wind_intensity: 10.0,
            sun_azimuth_angle: -1.0,
            sun_altitude_angle: 45.0,
            fog_density: 2.0,
            fog_distance: 0.75,
            fog_falloff: 0.1,
            wetness: 0.0,
        }
    }
}
