use std::time::Duration;
use tokio::time::Instant;

use crate::error::SensorError;

/// Sensor health as seen by the control tick.
#[derive(Debug, Clone, Default)]
pub struct SensorHealth {
    pub consecutive_faults: u32,
    pub total_faults: u64,
    pub last_sample: Option<Instant>,
    pub last_fault: Option<SensorError>,
}

impl SensorHealth {
    pub fn record_ok(&mut self, now: Instant) {
        self.consecutive_faults = 0;
        self.last_sample = Some(now);
    }

    /// Returns the number of faults in a row including this one.
    pub fn record_fault(&mut self, err: SensorError) -> u32 {
        self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        self.total_faults += 1;
        self.last_fault = Some(err);
        self.consecutive_faults
    }

    pub fn sample_age(&self, now: Instant) -> Option<Duration> {
        self.last_sample.map(|t| now.saturating_duration_since(t))
    }

    pub fn clear(&mut self) {
        self.consecutive_faults = 0;
        self.last_fault = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_sample_resets_streak() {
        let mut h = SensorHealth::default();
        assert_eq!(h.record_fault(SensorError::Timeout("telemetry")), 1);
        assert_eq!(h.record_fault(SensorError::Unavailable("gnss")), 2);
        let now = Instant::now();
        h.record_ok(now);
        assert_eq!(h.consecutive_faults, 0);
        assert_eq!(h.total_faults, 2);
        assert_eq!(h.sample_age(now), Some(Duration::ZERO));
    }
}
