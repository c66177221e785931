use async_trait::async_trait;
use avc_nav::gnss::{GnssFix, GnssReader};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::SensorError;
use crate::io::{Sample, TelemetrySource};
use crate::lock;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NmeaConfig {
    /// Fixes older than this are a sensor fault.
    pub stale_after_ms: u64,
    /// User equivalent range error; accuracy is reported as `hdop * uere_m`.
    pub uere_m: f64,
    /// Below this ground speed the course is considered noise and the last
    /// good heading is held.
    pub min_course_speed_m_s: f64,
}

impl Default for NmeaConfig {
    fn default() -> Self {
        Self { stale_after_ms: 2_000, uere_m: 5.0, min_course_speed_m_s: 0.5 }
    }
}

type LatestFix = Option<(GnssFix, Instant)>;

/// Anything that yields GNSS fixes one at a time. An error ends the feed.
#[async_trait]
pub trait FixFeed: Send {
    async fn next_fix(&mut self) -> anyhow::Result<GnssFix>;
}

#[async_trait]
impl FixFeed for GnssReader {
    async fn next_fix(&mut self) -> anyhow::Result<GnssFix> {
        GnssReader::next_fix(self).await
    }
}

/// Telemetry backed by a GNSS receiver. Heading is course over ground, so
/// there is no compass to calibrate; a calibration request just marks the
/// heading source ready.
pub struct NmeaSource {
    cfg: NmeaConfig,
    rx: watch::Receiver<LatestFix>,
    heading_deg: Mutex<f64>,
    calibrated: AtomicBool,
}

impl NmeaSource {
    pub fn new(cfg: NmeaConfig, rx: watch::Receiver<LatestFix>) -> Self {
        Self { cfg, rx, heading_deg: Mutex::new(0.0), calibrated: AtomicBool::new(false) }
    }

    /// Starts a background task feeding fixes from `feed`. The task ends
    /// when the feed fails; samples then go stale and fault the mission.
    pub fn spawn<F: FixFeed + 'static>(cfg: NmeaConfig, mut feed: F) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            loop {
                match feed.next_fix().await {
                    Ok(fix) => {
                        if tx.send(Some((fix, Instant::now()))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("gnss: feed ended: {:#}", e);
                        break;
                    }
                }
            }
        });
        (Self::new(cfg, rx), handle)
    }

    fn heading_from(&self, fix: &GnssFix) -> f64 {
        let mut held = lock(&self.heading_deg);
        if let Some(course) = fix.course_deg {
            if fix.speed_m_s >= self.cfg.min_course_speed_m_s && course.is_finite() {
                *held = course.rem_euclid(360.0);
            }
        }
        *held
    }
}

#[async_trait]
impl TelemetrySource for NmeaSource {
    async fn sample(&self) -> Result<Sample, SensorError> {
        let (fix, received) = match &*self.rx.borrow() {
            Some((fix, at)) => (fix.clone(), *at),
            None => return Err(SensorError::Unavailable("gnss")),
        };
        let age = Instant::now().saturating_duration_since(received);
        if age > Duration::from_millis(self.cfg.stale_after_ms) {
            return Err(SensorError::Stale { age_ms: age.as_millis() as u64 });
        }
        Ok(Sample {
            fix: fix.point,
            heading_deg: self.heading_from(&fix),
            speed_m_s: fix.speed_m_s,
            compass_calibrated: self.calibrated.load(Ordering::Relaxed),
            satellites: fix.quality.sats,
            accuracy_m: f64::from(fix.quality.hdop) * self.cfg.uere_m,
        })
    }

    async fn request_compass_calibration(&self) -> Result<(), SensorError> {
        self.calibrated.store(true, Ordering::Relaxed);
        info!("gnss: heading from course over ground, marked calibrated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avc_nav::gnss::FixQuality;
    use avc_nav::GeoPoint;
    use std::collections::VecDeque;
    use time::OffsetDateTime;

    fn fix(speed: f64, course: Option<f64>) -> GnssFix {
        GnssFix {
            point: GeoPoint::new(40.0, -105.0),
            speed_m_s: speed,
            course_deg: course,
            quality: FixQuality { sats: 8, hdop: 1.2 },
            ts: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_fix_is_unavailable() {
        let (_tx, rx) = watch::channel(None);
        let src = NmeaSource::new(NmeaConfig::default(), rx);
        assert_eq!(src.sample().await, Err(SensorError::Unavailable("gnss")));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fix_is_a_fault() {
        let (tx, rx) = watch::channel(None);
        let src = NmeaSource::new(NmeaConfig::default(), rx);
        tx.send(Some((fix(1.0, Some(90.0)), Instant::now()))).unwrap();
        assert!(src.sample().await.is_ok());
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert!(matches!(src.sample().await, Err(SensorError::Stale { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn heading_held_when_slow() {
        let (tx, rx) = watch::channel(None);
        let src = NmeaSource::new(NmeaConfig::default(), rx);
        tx.send(Some((fix(2.0, Some(120.0)), Instant::now()))).unwrap();
        let s = src.sample().await.unwrap();
        assert_eq!(s.heading_deg, 120.0);
        assert!((s.accuracy_m - 6.0).abs() < 1e-5);

        tx.send(Some((fix(0.1, Some(300.0)), Instant::now()))).unwrap();
        assert_eq!(src.sample().await.unwrap().heading_deg, 120.0);
        tx.send(Some((fix(3.0, None), Instant::now()))).unwrap();
        assert_eq!(src.sample().await.unwrap().heading_deg, 120.0);
    }

    struct Scripted(VecDeque<GnssFix>);

    #[async_trait]
    impl FixFeed for Scripted {
        async fn next_fix(&mut self) -> anyhow::Result<GnssFix> {
            self.0.pop_front().ok_or_else(|| anyhow::anyhow!("nmea serial closed"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reader_task_ends_when_feed_fails() {
        let feed = Scripted(VecDeque::from(vec![fix(2.0, Some(45.0))]));
        let (src, handle) = NmeaSource::spawn(NmeaConfig::default(), feed);
        handle.await.unwrap();

        assert_eq!(src.sample().await.unwrap().heading_deg, 45.0);
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert!(matches!(src.sample().await, Err(SensorError::Stale { .. })));
    }

    #[tokio::test]
    async fn calibration_request_marks_ready() {
        let (tx, rx) = watch::channel(None);
        let src = NmeaSource::new(NmeaConfig::default(), rx);
        tx.send(Some((fix(0.0, None), Instant::now()))).unwrap();
        assert!(!src.sample().await.unwrap().compass_calibrated);
        src.request_compass_calibration().await.unwrap();
        assert!(src.sample().await.unwrap().compass_calibrated);
    }
}
