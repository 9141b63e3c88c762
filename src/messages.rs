// Message types exchanged with the runtime over zenoh (JSON payloads)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Microphone position in rig coordinates (feet)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

// Request from UI/scripts -> runtime
// e.g. {"op": "move", "x": 6.5, "y": 6.5, "z": 3.0}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Calibrate(Position),
    Move(Position),
    Stop,
    CheckMotors,
    ResetAlarms,
    ReadAlarms,
    ReadAnalog { channel: u8 },
    GetConfig,
}

impl ControlRequest {
    pub fn op(&self) -> &'static str {
        match self {
            ControlRequest::Calibrate(_) => "calibrate",
            ControlRequest::Move(_) => "move",
            ControlRequest::Stop => "stop",
            ControlRequest::CheckMotors => "check_motors",
            ControlRequest::ResetAlarms => "reset_alarms",
            ControlRequest::ReadAlarms => "read_alarms",
            ControlRequest::ReadAnalog { .. } => "read_analog",
            ControlRequest::GetConfig => "get_config",
        }
    }
}

/// Outcome class of a request: bad request vs. hardware trouble
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    ClientError,
    ServerError,
}

// Reply from runtime -> requester, one per request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlReply {
    pub op: String,
    pub status: ReplyStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub motors: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,
}

/// Rig geometry for clients drawing the reachable volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub max: Position,
    pub anchors: BTreeMap<String, Position>,
    pub step_size_in: f64,
}

impl ControlReply {
    pub fn new(op: &str, status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            op: op.to_string(),
            status,
            message: message.into(),
            position: None,
            motors: BTreeMap::new(),
            workspace: None,
        }
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    pub fn with_motors(mut self, motors: BTreeMap<String, serde_json::Value>) -> Self {
        self.motors = motors;
        self
    }

    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Uncalibrated,
    Ready,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RuntimeHealth {
    pub state: HealthState,
    pub position: Option<Position>,
}
