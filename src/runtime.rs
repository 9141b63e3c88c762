// Control loop: receives requests over zenoh, drives the rig, publishes replies and health
//
// The runtime owns the kinematics solver, so calibrate/solve calls are
// serialized: one worker task handles requests in arrival order. Stop requests
// skip that queue and go straight to the shared coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{LOOP_HZ, RigConfig, TOPIC_CMD, TOPIC_HEALTH, TOPIC_REPLY};
use crate::messages::{
    ControlReply, ControlRequest, HealthState, Position, ReplyStatus, RuntimeHealth, Workspace,
};
use crate::motor::{
    AggregatedError, CalibrationState, ConnectionStatus, DispatchResults, KinematicsSolver,
    MotionCoordinator, Phase,
};

pub struct Runtime {
    solver: KinematicsSolver,
    coordinator: Arc<MotionCoordinator>,
    position: Option<Position>,
}

impl Runtime {
    pub fn new(config: &RigConfig) -> Self {
        Self {
            solver: KinematicsSolver::new(config),
            coordinator: Arc::new(MotionCoordinator::new(config)),
            position: None,
        }
    }

    /// Shared handle for work that must not wait behind queued requests (stop).
    pub fn coordinator(&self) -> Arc<MotionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn health(&self) -> RuntimeHealth {
        let state = if self.solver.is_calibrated() {
            HealthState::Ready
        } else {
            HealthState::Uncalibrated
        };
        RuntimeHealth {
            state,
            position: self.position,
        }
    }

    /// Handle one request and build its reply
    pub async fn handle(&mut self, request: ControlRequest) -> ControlReply {
        let op = request.op();
        info!("Handling {:?}", request);

        match request {
            ControlRequest::Calibrate(p) => self.calibrate(op, p),
            ControlRequest::Move(p) => self.move_to(op, p).await,
            ControlRequest::Stop => {
                let result = self.coordinator.stop_all().await;
                phase_reply(op, result, "stopped")
            }
            ControlRequest::ResetAlarms => {
                let result = self.coordinator.reset_alarms().await;
                phase_reply(op, result, "alarms reset")
            }
            ControlRequest::CheckMotors => {
                let statuses = self.coordinator.check_connections().await;
                let disconnected = statuses
                    .values()
                    .filter(|s| **s != ConnectionStatus::Connected)
                    .count();
                let message = if disconnected == 0 {
                    "all motors connected".to_string()
                } else {
                    format!("{} of {} motors disconnected", disconnected, statuses.len())
                };
                let motors = statuses
                    .into_iter()
                    .map(|(name, status)| (name, Value::from(status.to_string())))
                    .collect();
                ControlReply::new(op, ReplyStatus::Ok, message).with_motors(motors)
            }
            ControlRequest::ReadAlarms => {
                let results = self.coordinator.read_alarms().await;
                dispatch_reply(op, results, Value::from)
            }
            ControlRequest::ReadAnalog { channel } => {
                let results = self.coordinator.read_analog(channel).await;
                dispatch_reply(op, results, |reading| {
                    serde_json::to_value(reading).unwrap_or(Value::Null)
                })
            }
            ControlRequest::GetConfig => ControlReply::new(op, ReplyStatus::Ok, "ok")
                .with_position(self.position)
                .with_workspace(self.workspace()),
        }
    }

    fn workspace(&self) -> Workspace {
        let geometry = self.solver.geometry();
        let point = |p: &[f64; 3]| Position::new(p[0], p[1], p[2]);
        Workspace {
            max: point(&geometry.max),
            anchors: self
                .solver
                .motor_names()
                .iter()
                .zip(&geometry.anchors)
                .map(|(name, anchor)| (name.clone(), point(anchor)))
                .collect(),
            step_size_in: geometry.step_size_in,
        }
    }

    fn calibrate(&mut self, op: &str, p: Position) -> ControlReply {
        match self.solver.calibrate(p.x, p.y, p.z) {
            Ok(lengths) => {
                self.position = Some(p);
                let motors = self
                    .solver
                    .motor_names()
                    .iter()
                    .zip(lengths)
                    .map(|(name, length)| (name.clone(), Value::from(length)))
                    .collect();
                ControlReply::new(op, ReplyStatus::Ok, "calibrated")
                    .with_position(self.position)
                    .with_motors(motors)
            }
            Err(e) => ControlReply::new(op, ReplyStatus::ClientError, e.to_string()),
        }
    }

    async fn move_to(&mut self, op: &str, p: Position) -> ControlReply {
        let before = self.solver.state();
        let commands = match self.solver.solve(p.x, p.y, p.z) {
            Ok(commands) => commands,
            Err(e) => {
                warn!("Rejected move to {:?}: {}", p, e);
                return ControlReply::new(op, ReplyStatus::ClientError, e.to_string());
            }
        };

        if commands.is_empty() {
            return ControlReply::new(op, ReplyStatus::Ok, "already at target")
                .with_position(self.position);
        }

        match self.coordinator.execute_movement(&commands).await {
            Ok(()) => {
                self.position = Some(p);
                ControlReply::new(op, ReplyStatus::Ok, "moving").with_position(self.position)
            }
            Err(e) if e.phase == Phase::Configure => {
                // No drive was triggered, the rig is still at the old lengths.
                self.solver.restore(before);
                warn!("Move aborted before any trigger, position unchanged");
                failure_reply(op, e).with_position(self.position)
            }
            Err(e) => {
                // Some drives may be moving; the real position is unknown now.
                self.solver.restore(CalibrationState::Uncalibrated);
                self.position = None;
                warn!("Move failed after trigger, recalibrate before the next move");
                failure_reply(op, e)
            }
        }
    }
}

fn phase_reply(op: &str, result: Result<(), AggregatedError>, done: &str) -> ControlReply {
    match result {
        Ok(()) => ControlReply::new(op, ReplyStatus::Ok, done),
        Err(e) => failure_reply(op, e),
    }
}

fn failure_reply(op: &str, err: AggregatedError) -> ControlReply {
    let message = err.to_string();
    let motors = err
        .failures
        .into_iter()
        .map(|(name, failure)| (name, Value::from(failure.to_string())))
        .collect();
    ControlReply::new(op, ReplyStatus::ServerError, message).with_motors(motors)
}

fn dispatch_reply<T>(
    op: &str,
    results: DispatchResults<T>,
    to_value: impl Fn(T) -> Value,
) -> ControlReply {
    let mut failed = 0;
    let motors: BTreeMap<_, _> = results
        .into_iter()
        .map(|(name, result)| {
            let value = match result {
                Ok(v) => to_value(v),
                Err(e) => {
                    failed += 1;
                    Value::from(format!("error: {}", e))
                }
            };
            (name, value)
        })
        .collect();

    if failed == 0 {
        ControlReply::new(op, ReplyStatus::Ok, "ok").with_motors(motors)
    } else {
        let message = format!("{} motor(s) failed", failed);
        ControlReply::new(op, ReplyStatus::ServerError, message).with_motors(motors)
    }
}

/// Handle queued requests one at a time, publishing health after each.
async fn serve_requests(
    mut runtime: Runtime,
    mut requests: mpsc::UnboundedReceiver<ControlRequest>,
    replies: mpsc::UnboundedSender<ControlReply>,
    health: watch::Sender<RuntimeHealth>,
) {
    while let Some(request) = requests.recv().await {
        let reply = runtime.handle(request).await;
        health.send_replace(runtime.health());
        if replies.send(reply).is_err() {
            break;
        }
    }
}

fn spawn_stop(coordinator: Arc<MotionCoordinator>, replies: mpsc::UnboundedSender<ControlReply>) {
    tokio::spawn(async move {
        let result = coordinator.stop_all().await;
        let _ = replies.send(phase_reply("stop", result, "stopped"));
    });
}

pub async fn run(config: RigConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_reply = session.declare_publisher(TOPIC_REPLY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let runtime = Runtime::new(&config);
    let coordinator = runtime.coordinator();
    let (health_tx, health_rx) = watch::channel(runtime.health());
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve_requests(runtime, request_rx, reply_tx.clone(), health_tx));

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, motors {:?}",
        LOOP_HZ,
        config.motor_names().collect::<Vec<_>>()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_REPLY, TOPIC_HEALTH);

    loop {
        tokio::select! {
            // 1. Route requests: stop goes out at once, the rest queue for the solver
            sample = subscriber.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<ControlRequest>(&payload) {
                    Ok(ControlRequest::Stop) => {
                        warn!("Stop requested");
                        spawn_stop(Arc::clone(&coordinator), reply_tx.clone());
                    }
                    Ok(request) => {
                        if request_tx.send(request).is_err() {
                            return Err("request worker stopped".into());
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        let reply = ControlReply::new("unknown", ReplyStatus::ClientError, e.to_string());
                        let _ = reply_tx.send(reply);
                    }
                }
            }

            // 2. Publish replies as they complete
            Some(reply) = reply_rx.recv() => {
                if reply.status == ReplyStatus::ServerError {
                    error!("{} failed: {}", reply.op, reply.message);
                }
                let reply_json = serde_json::to_string(&reply)?;
                pub_reply.put(reply_json).await?;
            }

            // 3. Publish health
            _ = tick.tick() => {
                let health_json = serde_json::to_string(&*health_rx.borrow())?;
                pub_health.put(health_json).await?;
            }
        }
    }
}
