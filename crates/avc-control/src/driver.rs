use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::SensorError;
use crate::io::Driver;
use crate::lock;

/// Driver sink that only records commands. Used for bench runs against a
/// live GNSS feed with the drivetrain disconnected.
#[derive(Debug, Default)]
pub struct LogDriver {
    last: Mutex<(f64, f64)>,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for LogDriver {
    async fn drive(&self, throttle: f64, steering: f64) -> Result<(), SensorError> {
        if !throttle.is_finite() || !steering.is_finite() {
            return Err(SensorError::Device(format!("non-finite command ({}, {})", throttle, steering)));
        }
        let mut last = lock(&self.last);
        let was_moving = last.0 != 0.0;
        let moving = throttle != 0.0;
        if was_moving != moving {
            info!(throttle, "driver: motors {}", if moving { "engaged" } else { "neutral" });
        }
        debug!(throttle, steering, "driver: command");
        *last = (throttle, steering);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_finite_command_is_refused() {
        let d = LogDriver::new();
        d.drive(0.4, -0.2).await.unwrap();
        assert!(d.drive(f64::NAN, 0.0).await.is_err());
        assert!(d.drive(0.0, f64::INFINITY).await.is_err());
        assert_eq!(*lock(&d.last), (0.4, -0.2));
    }
}
