//! msgpack-rpc client over TCP
//!
//! One persistent connection per session. Calls are sequential: write a
//! request, then read until the response with the matching id arrives.
//! Responses to calls that already timed out carry a stale id and are
//! skipped.

use async_trait::async_trait;
use rmpv::Value;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::codec::{self, Message};
use super::{SimulatorClient, SimulatorConnector, WeatherParameters, WorldSettings};
use crate::config::Town;
use crate::error::RpcError;

/// Reported by [`SimulatorClient::client_version`]
pub const CLIENT_VERSION: &str = concat!("carla-bootstrap/", env!("CARGO_PKG_VERSION"));

/// Map layer mask selecting every layer
const ALL_MAP_LAYERS: u16 = 0xFFFF;

const READ_CHUNK: usize = 8 * 1024;

/// Connects [`RpcClient`]s over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl SimulatorConnector for TcpConnector {
    type Client = RpcClient;

    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<RpcClient, RpcError> {
        RpcClient::connect(host, port, timeout).await
    }
}

pub struct RpcClient {
    stream: TcpStream,
    buf: Vec<u8>,
    next_id: u32,
    timeout: Duration,
}

impl RpcClient {
    /// Open a connection; `timeout` bounds the connect and every later call.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, RpcError> {
        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| RpcError::Timeout {
                operation: format!("connect to {addr}"),
                timeout,
            })?
            .map_err(|source| RpcError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        debug!(%addr, "Connected to CARLA RPC server");
        Ok(Self {
            stream,
            buf: Vec::new(),
            next_id: 0,
            timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call `method` and wait for its result.
    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let request = codec::encode_request(id, method, params)?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.round_trip(id, method, &request))
            .await
            .map_err(|_| RpcError::Timeout {
                operation: method.to_string(),
                timeout,
            })?
    }

    /// Send `method` without waiting for any reply.
    pub async fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        let notification = codec::encode_notification(method, params)?;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.stream.write_all(&notification))
            .await
            .map_err(|_| RpcError::Timeout {
                operation: method.to_string(),
                timeout,
            })??;
        Ok(())
    }

    async fn round_trip(&mut self, id: u32, method: &str, request: &[u8]) -> Result<Value, RpcError> {
        self.stream.write_all(request).await?;

        loop {
            while let Some((value, used)) = codec::try_decode(&self.buf)? {
                self.buf.drain(..used);
                match codec::parse_message(value)? {
                    Message::Response { id: got, result } if got == id => {
                        return result.map_err(|e| RpcError::Remote {
                            method: method.to_string(),
                            message: codec::error_message(&e),
                        });
                    }
                    other => debug!(?other, "Skipping unrelated RPC message"),
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RpcError::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn to_param<T: Serialize>(method: &str, value: &T) -> Result<Value, RpcError> {
    rmpv::ext::to_value(value)
        .map_err(|e| RpcError::Protocol(format!("Failed to encode {method} params: {e}")))
}

fn frame_id(method: &str, value: Value) -> Result<u64, RpcError> {
    value
        .as_u64()
        .ok_or_else(|| RpcError::Protocol(format!("{method} returned {value}, expected a frame id")))
}

#[async_trait]
impl SimulatorClient for RpcClient {
    async fn load_world(&mut self, town: Town) -> Result<(), RpcError> {
        self.call(
            "load_new_episode",
            vec![
                Value::from(town.as_str()),
                Value::Boolean(true),
                Value::from(ALL_MAP_LAYERS),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_weather(&mut self, weather: &WeatherParameters) -> Result<(), RpcError> {
        let method = "set_weather_parameters";
        let params = vec![to_param(method, weather)?];
        self.notify(method, params).await
    }

    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<u64, RpcError> {
        let method = "apply_episode_settings";
        let params = vec![to_param(method, settings)?];
        let value = self.call(method, params).await?;
        frame_id(method, value)
    }

    async fn tick(&mut self) -> Result<u64, RpcError> {
        let method = "tick_cue";
        let value = self.call(method, vec![]).await?;
        frame_id(method, value)
    }

    async fn server_version(&mut self) -> Result<String, RpcError> {
        let value = self.call("version", vec![]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Protocol(format!("version returned {value}")))
    }

    fn client_version(&self) -> &str {
        CLIENT_VERSION
    }
}
