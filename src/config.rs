// Timeouts, topics, rig geometry and motor endpoints
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 10;

// Per-session socket timeout (connect, write and read each get this budget)
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

// Shorter budget used when probing drives for connectivity
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

// eSCL drives listen on this TCP port
pub const DEFAULT_PORT: u16 = 7776;

// Zenoh topics
pub const TOPIC_CMD: &str = "automic/cmd"; // requests
pub const TOPIC_REPLY: &str = "automic/state/reply"; // one reply per request
pub const TOPIC_HEALTH: &str = "automic/state/health"; // health status

// Number of cable motors on the rig
pub const MOTOR_COUNT: usize = 4;

// Lowest velocity ever commanded, so a slow axis never receives VE0
pub const MIN_SPEED: f64 = 0.1;

// Analog input scaling once the drive reports in decimal (IFD)
pub const ADC_MAX: f64 = 32760.0;
pub const ADC_VREF: f64 = 5.0;

pub const INCHES_PER_FOOT: f64 = 12.0;

/// A point in rig space, in feet: `[x, y, z]`.
pub type Point3 = [f64; 3];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Network identity of one drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorEndpoint {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Wound the other way round on its spool; step signs are flipped.
    #[serde(default)]
    pub inverted: bool,
}

impl MotorEndpoint {
    pub fn new(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: SESSION_TIMEOUT.as_millis() as u64,
            inverted: false,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Fixed rig geometry. Anchors are index-aligned with `RigConfig::motors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub anchors: [Point3; MOTOR_COUNT],
    /// Inclusive workspace upper bounds, lower bounds are 0 on every axis.
    pub max: Point3,
    /// Wire travel per drive step, in inches.
    pub step_size_in: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionDefaults {
    pub speed: f64,
    pub accel: f64,
    pub decel: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    pub health_check_ms: u64,
}

impl Timeouts {
    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check_ms)
    }
}

/// Everything the core needs, built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub motors: [MotorEndpoint; MOTOR_COUNT],
    pub geometry: GeometryConfig,
    pub motion: MotionDefaults,
    pub timeouts: Timeouts,
}

impl Default for RigConfig {
    fn default() -> Self {
        let mut motor4 = MotorEndpoint::new("motor4", "192.168.0.40");
        // Overhead motor is mounted upside down.
        motor4.inverted = true;

        Self {
            motors: [
                MotorEndpoint::new("motor1", "192.168.1.10"),
                MotorEndpoint::new("motor2", "192.168.1.20"),
                MotorEndpoint::new("motor3", "192.168.1.30"),
                motor4,
            ],
            geometry: GeometryConfig {
                anchors: [
                    [6.5, 13.0, 0.0],
                    [1.0, 3.0, 0.0],
                    [12.0, 3.0, 0.0],
                    [6.5, 6.5, 13.0],
                ],
                max: [13.0, 13.0, 13.0],
                step_size_in: 0.0005,
            },
            motion: MotionDefaults {
                speed: 5.0,
                accel: 100.0,
                decel: 100.0,
            },
            timeouts: Timeouts {
                health_check_ms: HEALTH_CHECK_TIMEOUT.as_millis() as u64,
            },
        }
    }
}

impl RigConfig {
    /// Load from a TOML file, or fall back to the built-in rig when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for motor in &self.motors {
            if motor.name.is_empty() {
                return Err(ConfigError::Invalid("motor name must not be empty".into()));
            }
            if !names.insert(motor.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate motor name '{}'",
                    motor.name
                )));
            }
            if motor.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "motor '{}' has a zero timeout",
                    motor.name
                )));
            }
        }

        let geometry = &self.geometry;
        if !(geometry.step_size_in.is_finite() && geometry.step_size_in > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "step size must be positive, got {}",
                geometry.step_size_in
            )));
        }
        if geometry.max.iter().any(|m| !(m.is_finite() && *m > 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "workspace bounds must be positive, got {:?}",
                geometry.max
            )));
        }
        if geometry.anchors.iter().flatten().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid("anchor coordinates must be finite".into()));
        }

        if !(self.motion.speed.is_finite() && self.motion.speed >= MIN_SPEED) {
            return Err(ConfigError::Invalid(format!(
                "default speed must be at least {}, got {}",
                MIN_SPEED, self.motion.speed
            )));
        }
        if self.motion.accel <= 0.0 || self.motion.decel <= 0.0 {
            return Err(ConfigError::Invalid(
                "acceleration and deceleration must be positive".into(),
            ));
        }
        if self.timeouts.health_check_ms == 0 {
            return Err(ConfigError::Invalid("health check timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Motor names in configuration order.
    pub fn motor_names(&self) -> impl Iterator<Item = &str> {
        self.motors.iter().map(|m| m.name.as_str())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    SESSION_TIMEOUT.as_millis() as u64
}
