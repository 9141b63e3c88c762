// Cable-rig inverse kinematics
// Converts a target microphone position into per-motor step counts and paced speeds.
//
// Each wire runs from a fixed anchor to the microphone, so its length is just the
// Euclidean distance between the two. A move is the difference between the wire
// lengths at the last known position and at the target.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::{
    GeometryConfig, INCHES_PER_FOOT, MIN_SPEED, MOTOR_COUNT, MotionDefaults, Point3, RigConfig,
};

const AXES: [char; 3] = ['x', 'y', 'z'];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("Rig is not calibrated; calibrate at a known position first")]
    Uncalibrated,

    #[error("Target {axis}={value} is outside the workspace [0, {max}]")]
    OutOfBounds { axis: char, value: f64, max: f64 },

    #[error("Position {0:?} is not finite")]
    NonFinite(Point3),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationState {
    Uncalibrated,
    Calibrated { last_lengths: [f64; MOTOR_COUNT] },
}

/// One motor's share of a move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCommand {
    pub steps: i64,
    pub speed: f64,
    pub accel: f64,
    pub decel: f64,
}

/// Straight-line distance between two points
pub fn distance(a: &Point3, b: &Point3) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Scale every motor's speed by its share of the largest displacement, so all
/// motors finish together. Never returns less than `MIN_SPEED`.
pub fn pace(steps: &[i64; MOTOR_COUNT], target_speed: f64) -> [f64; MOTOR_COUNT] {
    let max_steps = steps.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    if max_steps == 0 {
        return [MIN_SPEED; MOTOR_COUNT];
    }

    steps.map(|s| {
        let share = s.unsigned_abs() as f64 / max_steps as f64;
        (share * target_speed).max(MIN_SPEED)
    })
}

/// Keeps the wire lengths at the last commanded position.
///
/// Not meant for concurrent use: the runtime owns the solver and serializes
/// `calibrate` and `solve`.
#[derive(Debug, Clone)]
pub struct KinematicsSolver {
    names: [String; MOTOR_COUNT],
    inverted: [bool; MOTOR_COUNT],
    geometry: GeometryConfig,
    motion: MotionDefaults,
    state: CalibrationState,
}

impl KinematicsSolver {
    pub fn new(config: &RigConfig) -> Self {
        Self {
            names: config.motors.clone().map(|m| m.name),
            inverted: config.motors.each_ref().map(|m| m.inverted),
            geometry: config.geometry.clone(),
            motion: config.motion,
            state: CalibrationState::Uncalibrated,
        }
    }

    /// Motor names in configuration order, aligned with wire length arrays
    pub fn motor_names(&self) -> &[String; MOTOR_COUNT] {
        &self.names
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Put back a state captured earlier with `state`.
    pub fn restore(&mut self, state: CalibrationState) {
        self.state = state;
    }

    pub fn geometry(&self) -> &GeometryConfig {
        &self.geometry
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated { .. })
    }

    /// Wire lengths (feet) from every anchor to `point`
    pub fn wire_lengths(&self, point: &Point3) -> [f64; MOTOR_COUNT] {
        self.geometry.anchors.each_ref().map(|anchor| distance(anchor, point))
    }

    /// Record that the microphone currently hangs at `(x, y, z)`.
    pub fn calibrate(&mut self, x: f64, y: f64, z: f64) -> Result<[f64; MOTOR_COUNT], SolveError> {
        let point = [x, y, z];
        if point.iter().any(|c| !c.is_finite()) {
            return Err(SolveError::NonFinite(point));
        }

        let lengths = self.wire_lengths(&point);
        info!("Calibrated at {:?}, wire lengths {:?}", point, lengths);
        self.state = CalibrationState::Calibrated {
            last_lengths: lengths,
        };
        Ok(lengths)
    }

    /// Compute the per-motor moves that bring the microphone to `(x, y, z)`.
    ///
    /// Returns an empty map when no motor would move a whole step; in that case
    /// the stored lengths are left untouched.
    pub fn solve(&mut self, x: f64, y: f64, z: f64) -> Result<BTreeMap<String, MoveCommand>, SolveError> {
        let CalibrationState::Calibrated { last_lengths } = self.state else {
            return Err(SolveError::Uncalibrated);
        };

        let target = [x, y, z];
        for ((&value, &max), axis) in target.iter().zip(&self.geometry.max).zip(AXES) {
            if !(0.0..=max).contains(&value) {
                return Err(SolveError::OutOfBounds { axis, value, max });
            }
        }

        let new_lengths = self.wire_lengths(&target);
        let step_size = self.geometry.step_size_in;
        let steps: [i64; MOTOR_COUNT] = std::array::from_fn(|i| {
            let delta_in = (last_lengths[i] - new_lengths[i]) * INCHES_PER_FOOT;
            (delta_in / step_size).trunc() as i64
        });

        if steps.iter().all(|&s| s == 0) {
            debug!("Move to {:?} is below one step, nothing to do", target);
            return Ok(BTreeMap::new());
        }

        let speeds = pace(&steps, self.motion.speed);
        self.state = CalibrationState::Calibrated {
            last_lengths: new_lengths,
        };

        let commands = (0..MOTOR_COUNT)
            .map(|i| {
                let signed = if self.inverted[i] { -steps[i] } else { steps[i] };
                let command = MoveCommand {
                    steps: signed,
                    speed: speeds[i],
                    accel: self.motion.accel,
                    decel: self.motion.decel,
                };
                (self.names[i].clone(), command)
            })
            .collect();

        debug!("Solved {:?}: steps {:?}, speeds {:?}", target, steps, speeds);
        Ok(commands)
    }
}
