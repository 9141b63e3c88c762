// Multi-motor coordination for the cable rig
//
// Moves run in two phases so the drives start together:
// 1. configure: every motor gets ME, AC, DE, VE, DI over its own session
// 2. trigger: only if every motor configured cleanly, every motor gets FL/FP
// Both phases fan out one task per motor and wait for all of them.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::kinematics::MoveCommand;
use super::link::{ConnectionError, LinkError, MotorLink};
use super::scl::{self, ParsedReply, cmd};
use crate::config::{ADC_MAX, ADC_VREF, MotorEndpoint, RigConfig};

/// Relative moves feed a length (FL); absolute moves feed to a position (FP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Relative,
    Absolute,
}

/// Ordered commands for one motor: configuration first, then the single trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSequence {
    pub configure: Vec<String>,
    pub trigger: String,
}

impl CommandSequence {
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.configure
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.trigger.as_str()))
    }
}

pub fn build_sequence(command: &MoveCommand, kind: MoveKind) -> CommandSequence {
    let trigger = match kind {
        MoveKind::Relative => cmd::FEED_TO_LENGTH,
        MoveKind::Absolute => cmd::FEED_TO_POSITION,
    };

    CommandSequence {
        configure: vec![
            cmd::MOTION_ENABLE.to_string(),
            format!("{}{}", cmd::ACCELERATION, scl::format_value(command.accel)),
            format!("{}{}", cmd::DECELERATION, scl::format_value(command.decel)),
            format!("{}{}", cmd::VELOCITY, scl::format_value(command.speed)),
            format!("{}{}", cmd::DISTANCE, command.steps),
        ],
        trigger: trigger.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configure,
    Trigger,
    Stop,
    AlarmReset,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Configure => "configure",
            Phase::Trigger => "trigger",
            Phase::Stop => "stop",
            Phase::AlarmReset => "alarm reset",
        };
        f.write_str(name)
    }
}

/// Why a single motor's part of an operation failed
#[derive(Debug, thiserror::Error)]
pub enum MotorFailure {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Command '{command}' failed: {source}")]
    Command { command: String, source: LinkError },

    #[error("Unexpected reply to '{command}': '{reply}'")]
    UnexpectedReply { command: String, reply: String },

    #[error("Motor '{0}' is not configured")]
    UnknownMotor(String),

    #[error("Motor task aborted: {0}")]
    Task(String),
}

/// One or more motors failed during a coordinated phase
#[derive(Debug, thiserror::Error)]
#[error("{phase} phase failed on {}", describe(.failures))]
pub struct AggregatedError {
    pub phase: Phase,
    pub failures: BTreeMap<String, MotorFailure>,
}

fn describe(failures: &BTreeMap<String, MotorFailure>) -> String {
    failures
        .iter()
        .map(|(name, failure)| format!("{} ({})", name, failure))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Analog input sample, decimal counts and the matching voltage
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalogReading {
    pub raw: f64,
    pub volts: f64,
}

impl AnalogReading {
    pub fn from_raw(raw: f64) -> Self {
        Self {
            raw,
            volts: raw / ADC_MAX * ADC_VREF,
        }
    }
}

/// Per-motor outcome of a fanned-out operation
pub type DispatchResults<T> = BTreeMap<String, Result<T, MotorFailure>>;

/// Run one task per unit concurrently and collect every outcome by name.
///
/// A task that panics is reported as `MotorFailure::Task`; it never takes its
/// siblings down with it.
pub async fn fan_out<U, T, F, Fut>(units: Vec<(String, U)>, work: F) -> DispatchResults<T>
where
    F: Fn(U) -> Fut,
    Fut: Future<Output = Result<T, MotorFailure>> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = units
        .into_iter()
        .map(|(name, unit)| (name, tokio::spawn(work(unit))))
        .collect();

    let mut results = BTreeMap::new();
    for (name, handle) in handles {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(MotorFailure::Task(e.to_string())));
        results.insert(name, result);
    }
    results
}

/// Open a session and send `commands` in order, stopping at the first failure.
async fn run_commands(link: MotorLink, commands: Vec<String>) -> Result<Vec<String>, MotorFailure> {
    let mut session = link.connect().await?;
    let mut replies = Vec::with_capacity(commands.len());

    for command in commands {
        match session.send_command(&command).await {
            Ok(reply) => replies.push(reply),
            Err(source) => return Err(MotorFailure::Command { command, source }),
        }
    }

    session.close().await;
    Ok(replies)
}

async fn query_analog(link: MotorLink, channel: u8) -> Result<AnalogReading, MotorFailure> {
    let mut session = link.connect().await?;

    // Switch numeric replies to decimal first; firmwares answer this inconsistently.
    match session.query(cmd::FORMAT_DECIMAL).await {
        Ok(ParsedReply::Ack) => {}
        Ok(other) => debug!(motor = session.motor(), reply = ?other, "unusual IFD reply"),
        Err(source) => {
            return Err(MotorFailure::Command {
                command: cmd::FORMAT_DECIMAL.to_string(),
                source,
            });
        }
    }

    let command = format!("{}{}", cmd::ANALOG_INPUT, channel);
    let reply = session
        .query(&command)
        .await
        .map_err(|source| MotorFailure::Command {
            command: command.clone(),
            source,
        })?;
    session.close().await;

    match reply.number() {
        Some(raw) => Ok(AnalogReading::from_raw(raw)),
        None => Err(MotorFailure::UnexpectedReply {
            command,
            reply: format!("{:?}", reply),
        }),
    }
}

/// Dispatches commands to all four drives.
pub struct MotionCoordinator {
    motors: BTreeMap<String, MotorEndpoint>,
    health_timeout: Duration,
}

impl MotionCoordinator {
    pub fn new(config: &RigConfig) -> Self {
        let motors = config
            .motors
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect();

        Self {
            motors,
            health_timeout: config.timeouts.health_check(),
        }
    }

    fn link(&self, name: &str, timeout: Option<Duration>) -> Option<MotorLink> {
        self.motors.get(name).map(|e| MotorLink::new(e, timeout))
    }

    fn all_links(&self, timeout: Option<Duration>) -> Vec<(String, MotorLink)> {
        self.motors
            .iter()
            .map(|(name, endpoint)| (name.clone(), MotorLink::new(endpoint, timeout)))
            .collect()
    }

    /// Send each motor its command list over a fresh session, all motors at once.
    async fn run_phase(
        &self,
        phase: Phase,
        commands: BTreeMap<String, Vec<String>>,
    ) -> Result<(), AggregatedError> {
        info!(%phase, motors = commands.len(), "Phase started");

        let mut units = Vec::with_capacity(commands.len());
        let mut failures = BTreeMap::new();
        for (name, list) in commands {
            match self.link(&name, None) {
                Some(link) => units.push((name, (link, list))),
                None => {
                    failures.insert(name.clone(), MotorFailure::UnknownMotor(name));
                }
            }
        }
        if !failures.is_empty() {
            return Err(self.report(phase, failures));
        }

        let results = fan_out(units, |(link, list)| run_commands(link, list)).await;
        let failures: BTreeMap<_, _> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect();

        if failures.is_empty() {
            info!(%phase, "Phase complete");
            Ok(())
        } else {
            Err(self.report(phase, failures))
        }
    }

    fn report(&self, phase: Phase, failures: BTreeMap<String, MotorFailure>) -> AggregatedError {
        let err = AggregatedError { phase, failures };
        error!(%phase, failed = err.failures.len(), "{}", err);
        err
    }

    /// Execute a solved move as a relative (FL) move.
    pub async fn execute_movement(
        &self,
        commands: &BTreeMap<String, MoveCommand>,
    ) -> Result<(), AggregatedError> {
        let sequences = commands
            .iter()
            .map(|(name, command)| (name.clone(), build_sequence(command, MoveKind::Relative)))
            .collect();
        self.execute_sequences(sequences).await
    }

    /// Two-phase execution of prebuilt sequences.
    ///
    /// Nothing is triggered unless every motor configured cleanly. Already
    /// configured drives are not rolled back. A trigger failure on one motor
    /// does not recall triggers already delivered to the others.
    pub async fn execute_sequences(
        &self,
        sequences: BTreeMap<String, CommandSequence>,
    ) -> Result<(), AggregatedError> {
        if sequences.is_empty() {
            debug!("Empty move, nothing to dispatch");
            return Ok(());
        }

        let unknown: BTreeMap<_, _> = sequences
            .keys()
            .filter(|name| !self.motors.contains_key(*name))
            .map(|name| (name.clone(), MotorFailure::UnknownMotor(name.clone())))
            .collect();
        if !unknown.is_empty() {
            return Err(self.report(Phase::Configure, unknown));
        }

        info!("Executing move on {} motor(s)", sequences.len());

        let (configure, trigger): (BTreeMap<_, _>, BTreeMap<_, _>) = sequences
            .into_iter()
            .map(|(name, seq)| ((name.clone(), seq.configure), (name, vec![seq.trigger])))
            .unzip();

        self.run_phase(Phase::Configure, configure).await?;
        self.run_phase(Phase::Trigger, trigger).await?;

        info!("Move dispatched");
        Ok(())
    }

    /// Send ST to every motor, skipping the configure phase.
    pub async fn stop_all(&self) -> Result<(), AggregatedError> {
        warn!("Stopping all motors");
        self.run_phase(Phase::Stop, self.broadcast(cmd::STOP)).await
    }

    /// Clear drive alarms (AR) on every motor.
    pub async fn reset_alarms(&self) -> Result<(), AggregatedError> {
        self.run_phase(Phase::AlarmReset, self.broadcast(cmd::ALARM_RESET))
            .await
    }

    fn broadcast(&self, command: &str) -> BTreeMap<String, Vec<String>> {
        self.motors
            .keys()
            .map(|name| (name.clone(), vec![command.to_string()]))
            .collect()
    }

    /// Probe every drive with a status request using the short health timeout.
    pub async fn check_connections(&self) -> BTreeMap<String, ConnectionStatus> {
        let units = self.all_links(Some(self.health_timeout));
        let results = fan_out(units, |link| {
            run_commands(link, vec![cmd::REQUEST_STATUS.to_string()])
        })
        .await;

        let statuses: BTreeMap<_, _> = results
            .into_iter()
            .map(|(name, result)| {
                let status = match result {
                    Ok(_) => ConnectionStatus::Connected,
                    Err(e) => {
                        debug!(motor = %name, "Health check failed: {}", e);
                        ConnectionStatus::Disconnected
                    }
                };
                (name, status)
            })
            .collect();

        info!("Connection check: {:?}", statuses);
        statuses
    }

    /// Read the alarm code (AL) reported by every drive.
    pub async fn read_alarms(&self) -> DispatchResults<String> {
        let units = self.all_links(None);
        fan_out(units, |link| async move {
            let mut replies = run_commands(link, vec![cmd::ALARM_CODE.to_string()]).await?;
            Ok::<_, MotorFailure>(replies.pop().unwrap_or_default())
        })
        .await
    }

    /// Sample analog input `channel` on every drive (wire tension sensors).
    pub async fn read_analog(&self, channel: u8) -> DispatchResults<AnalogReading> {
        let units = self.all_links(None);
        fan_out(units, move |link| query_analog(link, channel)).await
    }
}
