use async_trait::async_trait;
use avc_nav::GeoPoint;
use avc_proto::TelemetrySnapshot;

use crate::error::SensorError;

/// One telemetry reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub fix: GeoPoint,
    pub heading_deg: f64,
    pub speed_m_s: f64,
    pub compass_calibrated: bool,
    pub satellites: u8,
    pub accuracy_m: f64,
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self) -> Result<Sample, SensorError>;

    /// Starts a calibration run and returns without waiting for it. Completion
    /// shows up as `compass_calibrated` in later samples.
    async fn request_compass_calibration(&self) -> Result<(), SensorError>;
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Both values in [-1, 1].
    async fn drive(&self, throttle: f64, steering: f64) -> Result<(), SensorError>;
}

pub trait TelemetrySink: Send + Sync {
    fn publish(&self, snapshot: &TelemetrySnapshot);
}
