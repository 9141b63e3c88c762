// Motor control for the AUTOMIC cable rig
//
// Provides:
// - eSCL line protocol framing and reply parsing
// - Per-drive TCP sessions
// - Cable inverse kinematics with speed pacing
// - Two-phase multi-motor move coordination

mod coordinator;
pub mod kinematics;
pub mod link;
pub mod scl;

pub use coordinator::{
    AggregatedError, AnalogReading, CommandSequence, ConnectionStatus, DispatchResults,
    MotionCoordinator, MotorFailure, MoveKind, Phase, build_sequence, fan_out,
};
pub use kinematics::{CalibrationState, KinematicsSolver, MoveCommand, SolveError, distance};
pub use link::{ConnectionError, LinkError, MotorLink, Session};
pub use scl::{ParsedReply, ProtocolError};
