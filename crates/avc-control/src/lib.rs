pub mod controller;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod io;
pub mod mission;
pub mod nmea;
pub mod sim;
pub mod state;

use serde::Deserialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use controller::{Controller, SharedMission};
pub use error::{Rejection, SensorError};
pub use gateway::CommandGateway;
pub use io::{Driver, Sample, TelemetrySink, TelemetrySource};
pub use mission::{Command, Mission, MissionConfig, Transition};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop period. 100 ms gives the usual 10 Hz.
    pub tick_ms: u64,

    /// Upper bound on one telemetry read or driver command. Exceeding it
    /// counts as a sensor fault.
    pub sample_timeout_ms: u64,

    #[serde(flatten)]
    pub mission: MissionConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { tick_ms: 100, sample_timeout_ms: 50, mission: MissionConfig::default() }
    }
}

impl ControlConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub mod doctor {
    use anyhow::Result;

    use crate::ControlConfig;

    pub fn check_control(cfg: &ControlConfig) -> Result<()> {
        anyhow::ensure!((20..=1_000).contains(&cfg.tick_ms), "control.tick_ms should be 20..1000");
        anyhow::ensure!(
            cfg.sample_timeout_ms > 0 && cfg.sample_timeout_ms < cfg.tick_ms,
            "control.sample_timeout_ms must be below control.tick_ms"
        );
        anyhow::ensure!(cfg.mission.sensor_fault_limit >= 1, "control.sensor_fault_limit must be >= 1");
        anyhow::ensure!(cfg.mission.calibration_timeout_ms >= 1_000, "control.calibration_timeout_ms too short");
        anyhow::ensure!(
            cfg.mission.stuck_speed_m_s.is_finite() && cfg.mission.stuck_speed_m_s >= 0.0,
            "control.stuck_speed_m_s must be >= 0"
        );
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn defaults_pass() {
            assert!(check_control(&ControlConfig::default()).is_ok());
        }

        #[test]
        fn timeout_must_fit_in_tick() {
            let cfg = ControlConfig { sample_timeout_ms: 100, ..ControlConfig::default() };
            assert!(check_control(&cfg).is_err());
        }

        #[test]
        fn negative_stuck_speed_is_rejected() {
            let mut cfg = ControlConfig::default();
            cfg.mission.stuck_speed_m_s = -0.5;
            assert!(check_control(&cfg).is_err());
        }
    }
}
