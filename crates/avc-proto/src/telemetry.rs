use serde::{Deserialize, Serialize};

/// Planar offset in meters from the route origin. +x is east, +y is north.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x_m: f64,
    pub y_m: f64,
}

impl Position {
    pub const fn new(x_m: f64, y_m: f64) -> Self {
        Self { x_m, y_m }
    }

    pub fn is_finite(&self) -> bool {
        self.x_m.is_finite() && self.y_m.is_finite()
    }
}

/// Heading is in compass degrees: 0 = north, clockwise positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    pub heading_deg: f64,
    pub speed_m_s: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissionState {
    #[default]
    Idle,
    CalibratingCompass,
    LiningUp,
    CountingDown,
    Running,
    Stopped,
    Error,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Idle => "idle",
            MissionState::CalibratingCompass => "calibrating-compass",
            MissionState::LiningUp => "lining-up",
            MissionState::CountingDown => "counting-down",
            MissionState::Running => "running",
            MissionState::Stopped => "stopped",
            MissionState::Error => "error",
        }
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One control tick worth of state. Built once, published, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub ts_unix_ms: i64,
    pub state: MissionState,
    pub pose: Pose,
    // Target fields are only populated while running.
    pub target_waypoint_index: Option<usize>,
    pub target_waypoint: Option<Position>,
    pub distance_to_target_m: Option<f64>,
    pub bearing_to_target_deg: Option<f64>,
    pub waypoint_count: usize,
    pub throttle: f64,
    pub steering: f64,
    pub max_throttle: f64,
    pub compass_calibrated: bool,
    pub satellites: u8,
    pub accuracy_m: f64,
}

/// Transient log line for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
}

impl LogEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
