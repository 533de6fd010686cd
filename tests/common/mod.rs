//! Fake launcher and simulator shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use carla_bootstrap::error::{BootstrapError, RpcError};
use carla_bootstrap::process::{Launch, ProcessHandle, ServerProcess};
use carla_bootstrap::rpc::{SimulatorClient, SimulatorConnector, WeatherParameters, WorldSettings};
use carla_bootstrap::{BootstrapConfig, ShutdownRegistrar, Town};

pub const BASE_PORT: u16 = 2000;

/// Fake pids are derived from the port so assertions can name them.
pub fn pid_for(port: u16) -> u32 {
    10_000 + u32::from(port)
}

/// Config with no warm-up so the tests do not sleep.
pub fn fast_config(max_attempts: u32) -> BootstrapConfig {
    BootstrapConfig {
        town: Town::Town03,
        frequency_hz: 20,
        warmup_secs: 0.0,
        client_timeout_secs: 1.0,
        max_attempts,
        base_port: BASE_PORT,
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A server was launched; `hook_active` is the registrar state at that moment
    Launched { port: u16, hook_active: bool },
    Terminated { pid: u32 },
    Connected { port: u16 },
    LoadedWorld { port: u16, town: Town },
    Weather { port: u16, weather: WeatherParameters },
    Settings { port: u16, settings: WorldSettings },
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn launched_ports(&self) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Launched { port, .. } => Some(port),
                _ => None,
            })
            .collect()
    }

    pub fn terminated_pids(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminated { pid } => Some(pid),
                _ => None,
            })
            .collect()
    }

    /// True if any launch happened while a hook was still registered.
    pub fn launched_with_stale_hook(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, Event::Launched { hook_active: true, .. }))
    }
}

#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    log: Arc<EventLog>,
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self) -> std::io::Result<()> {
        self.log.push(Event::Terminated { pid: self.pid });
        Ok(())
    }
}

pub struct FakeLauncher {
    log: Arc<EventLog>,
    registrar: Arc<ShutdownRegistrar>,
    missing_executable: bool,
}

impl FakeLauncher {
    pub fn new(log: Arc<EventLog>, registrar: Arc<ShutdownRegistrar>) -> Self {
        Self {
            log,
            registrar,
            missing_executable: false,
        }
    }

    /// Every launch fails the way a missing executable does.
    pub fn missing_executable(mut self) -> Self {
        self.missing_executable = true;
        self
    }
}

impl Launch for FakeLauncher {
    fn launch(&self, port: u16) -> Result<ServerProcess, BootstrapError> {
        if self.missing_executable {
            return Err(BootstrapError::Spawn {
                path: "/missing/CarlaUE4.sh".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        self.log.push(Event::Launched {
            port,
            hook_active: self.registrar.is_active(),
        });
        let process = FakeProcess {
            pid: pid_for(port),
            log: Arc::clone(&self.log),
        };
        Ok(ServerProcess::from_handle(port, Arc::new(process)))
    }
}

/// How the fake server on a given port behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Plan {
    RefuseConnect,
    FailLoad,
    FailSettings,
    Succeed { frame_id: u64 },
}

pub struct FakeConnector {
    log: Arc<EventLog>,
    plans: HashMap<u16, Plan>,
    default_plan: Plan,
}

impl FakeConnector {
    pub fn new(log: Arc<EventLog>, default_plan: Plan) -> Self {
        Self {
            log,
            plans: HashMap::new(),
            default_plan,
        }
    }

    pub fn with_plan(mut self, port: u16, plan: Plan) -> Self {
        self.plans.insert(port, plan);
        self
    }
}

#[async_trait]
impl SimulatorConnector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self, host: &str, port: u16, _timeout: Duration) -> Result<FakeClient, RpcError> {
        let plan = self.plans.get(&port).copied().unwrap_or(self.default_plan);
        if plan == Plan::RefuseConnect {
            return Err(RpcError::Connect {
                addr: format!("{host}:{port}"),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }

        self.log.push(Event::Connected { port });
        Ok(FakeClient {
            port,
            plan,
            frame: 0,
            log: Arc::clone(&self.log),
        })
    }
}

#[derive(Debug)]
pub struct FakeClient {
    port: u16,
    plan: Plan,
    frame: u64,
    log: Arc<EventLog>,
}

#[async_trait]
impl SimulatorClient for FakeClient {
    async fn load_world(&mut self, town: Town) -> Result<(), RpcError> {
        if self.plan == Plan::FailLoad {
            return Err(RpcError::Remote {
                method: "load_new_episode".to_string(),
                message: "map not ready".to_string(),
            });
        }
        self.log.push(Event::LoadedWorld {
            port: self.port,
            town,
        });
        Ok(())
    }

    async fn set_weather(&mut self, weather: &WeatherParameters) -> Result<(), RpcError> {
        self.log.push(Event::Weather {
            port: self.port,
            weather: *weather,
        });
        Ok(())
    }

    async fn apply_settings(&mut self, settings: &WorldSettings) -> Result<u64, RpcError> {
        match self.plan {
            Plan::Succeed { frame_id } => {
                self.log.push(Event::Settings {
                    port: self.port,
                    settings: settings.clone(),
                });
                self.frame = frame_id;
                Ok(frame_id)
            }
            _ => Err(RpcError::Timeout {
                operation: "apply_episode_settings".to_string(),
                timeout: Duration::from_secs(1),
            }),
        }
    }

    async fn tick(&mut self) -> Result<u64, RpcError> {
        self.frame += 1;
        Ok(self.frame)
    }

    async fn server_version(&mut self) -> Result<String, RpcError> {
        Ok("0.9.13".to_string())
    }

    fn client_version(&self) -> &str {
        "fake"
    }
}
