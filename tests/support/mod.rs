//! Loopback stand-ins for eSCL drives.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use automic_runtime::config::{MotorEndpoint, RigConfig};
use automic_runtime::motor::scl;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A fake drive on 127.0.0.1 that records every command it receives.
///
/// It acks everything, answers a few queries with canned data, and drops the
/// connection (without replying) when it sees the command it is told to fail on.
/// A silent drive accepts connections and records commands but never answers.
#[derive(Clone)]
pub struct FakeDrive {
    pub port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeDrive {
    pub async fn spawn() -> Self {
        Self::spawn_failing_on(None).await
    }

    pub async fn spawn_failing_on(fail_on: Option<&str>) -> Self {
        Self::start(fail_on, false).await
    }

    pub async fn spawn_silent() -> Self {
        Self::start(None, true).await
    }

    async fn start(fail_on: Option<&str>, silent: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let drive = FakeDrive {
            port: listener.local_addr().unwrap().port(),
            commands: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let fail_on = fail_on.map(str::to_string);

        let state = drive.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                state.connections.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                let fail_on = fail_on.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        let command = scl::decode(&buf[..n]).unwrap();
                        state.commands.lock().unwrap().push(command.clone());

                        if fail_on.as_deref().is_some_and(|f| command.starts_with(f)) {
                            return;
                        }
                        if silent {
                            continue;
                        }
                        let reply = match command.as_str() {
                            "RS" => "RS=R",
                            "AL" => "AL=0000",
                            "IA1" => "+\r\n16380",
                            "IA2" => "IA2=32760",
                            _ => "%",
                        };
                        if socket.write_all(&scl::encode(reply)).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        drive
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self, name: &str) -> MotorEndpoint {
        local_endpoint(name, self.port)
    }
}

fn local_endpoint(name: &str, port: u16) -> MotorEndpoint {
    let mut endpoint = MotorEndpoint::new(name, "127.0.0.1");
    endpoint.port = port;
    endpoint.timeout_ms = 1000;
    endpoint
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint(name: &str) -> MotorEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    local_endpoint(name, port)
}

/// Default rig geometry wired to the given endpoints.
pub fn rig(endpoints: [MotorEndpoint; 4]) -> RigConfig {
    let mut config = RigConfig::default();
    for (slot, endpoint) in config.motors.iter_mut().zip(endpoints) {
        let inverted = slot.inverted;
        *slot = endpoint;
        slot.inverted = inverted;
    }
    config.timeouts.health_check_ms = 500;
    config.validate().unwrap();
    config
}

/// Four healthy drives, named motor1..motor4.
pub async fn healthy_rig() -> (RigConfig, Vec<FakeDrive>) {
    let mut drives = Vec::new();
    for _ in 0..4 {
        drives.push(FakeDrive::spawn().await);
    }
    let config = rig([
        drives[0].endpoint("motor1"),
        drives[1].endpoint("motor2"),
        drives[2].endpoint("motor3"),
        drives[3].endpoint("motor4"),
    ]);
    (config, drives)
}
