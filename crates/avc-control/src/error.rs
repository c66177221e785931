use avc_proto::MissionState;
use thiserror::Error;

/// Why a command was refused. A rejection never changes mission state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("invalid parameters for {command}: {reason}")]
    BadParams { command: &'static str, reason: String },
    #[error("{command} not allowed while {state}")]
    InvalidState { command: &'static str, state: MissionState },
    #[error("no waypoints loaded")]
    NoWaypoints,
    #[error("compass not calibrated")]
    CompassNotCalibrated,
    #[error("throttle {0} out of range (0, 1]")]
    ThrottleOutOfRange(f64),
    #[error("waypoint file: {0}")]
    WaypointFile(String),
    #[error("shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("no data from {0}")]
    Unavailable(&'static str),
    #[error("fix is stale ({age_ms} ms old)")]
    Stale { age_ms: u64 },
    #[error("device error: {0}")]
    Device(String),
}
