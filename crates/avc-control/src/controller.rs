use anyhow::Result;
use avc_proto::TelemetrySnapshot;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::SensorError;
use crate::io::{Driver, TelemetrySink, TelemetrySource};
use crate::mission::{Mission, TickInput};
use crate::{lock, ControlConfig};

pub type SharedMission = Arc<Mutex<Mission>>;

pub struct Controller {
    cfg: ControlConfig,
    mission: SharedMission,
    source: Arc<dyn TelemetrySource>,
    driver: Arc<dyn Driver>,
    sink: Arc<dyn TelemetrySink>,
    driver_fault: Option<SensorError>,
}

impl Controller {
    pub fn new(
        cfg: ControlConfig,
        mission: SharedMission,
        source: Arc<dyn TelemetrySource>,
        driver: Arc<dyn Driver>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self { cfg, mission, source, driver, sink, driver_fault: None }
    }

    pub fn mission(&self) -> SharedMission {
        Arc::clone(&self.mission)
    }

    /// Runs one sense/decide/actuate/publish cycle.
    pub async fn tick(&mut self) -> TelemetrySnapshot {
        let timeout = self.cfg.sample_timeout();
        let sample = bounded(timeout, "telemetry", self.source.sample()).await;

        let (out, calibrate) = {
            let mut m = lock(&self.mission);
            let out = m.tick(TickInput { sample, driver_fault: self.driver_fault.take() }, Instant::now());
            (out, m.take_calibration_request())
        };

        if calibrate {
            info!("requesting compass calibration");
            if let Err(e) = bounded(timeout, "compass calibration", self.source.request_compass_calibration()).await {
                lock(&self.mission).calibration_failed(&e, Instant::now());
            }
        }

        if let Err(e) = bounded(timeout, "driver", self.driver.drive(out.throttle, out.steering)).await {
            warn!("driver command failed: {}", e);
            self.driver_fault = Some(e);
        }

        self.sink.publish(&out.snapshot);
        out.snapshot
    }

    /// Ticks until `shutdown` flips to true (or its sender goes away), then
    /// forces `Stopped` and runs one last neutral tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.cfg.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("control loop started at {:?} per tick", self.cfg.tick());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        lock(&self.mission).shutdown(Instant::now());
        let last = self.tick().await;
        info!(state = %last.state, "control loop stopped");
        Ok(())
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T, SensorError>>,
) -> Result<T, SensorError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(SensorError::Timeout(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Sample;
    use crate::mission::MissionConfig;
    use async_trait::async_trait;
    use avc_nav::{GeoPoint, NavigatorConfig};
    use avc_proto::MissionState;

    struct Hanging;

    #[async_trait]
    impl TelemetrySource for Hanging {
        async fn sample(&self) -> Result<Sample, SensorError> {
            std::future::pending().await
        }

        async fn request_compass_calibration(&self) -> Result<(), SensorError> {
            Ok(())
        }
    }

    struct Fixed;

    #[async_trait]
    impl TelemetrySource for Fixed {
        async fn sample(&self) -> Result<Sample, SensorError> {
            Ok(Sample {
                fix: GeoPoint::new(40.0, -105.0),
                heading_deg: 0.0,
                speed_m_s: 0.0,
                compass_calibrated: true,
                satellites: 10,
                accuracy_m: 1.0,
            })
        }

        async fn request_compass_calibration(&self) -> Result<(), SensorError> {
            Err(SensorError::Device("no compass".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        drives: Mutex<Vec<(f64, f64)>>,
        snapshots: Mutex<Vec<TelemetrySnapshot>>,
    }

    #[async_trait]
    impl Driver for Recorder {
        async fn drive(&self, throttle: f64, steering: f64) -> Result<(), SensorError> {
            lock(&self.drives).push((throttle, steering));
            Ok(())
        }
    }

    impl TelemetrySink for Recorder {
        fn publish(&self, snapshot: &TelemetrySnapshot) {
            lock(&self.snapshots).push(snapshot.clone());
        }
    }

    fn controller(source: Arc<dyn TelemetrySource>, rec: Arc<Recorder>) -> Controller {
        let mission = Mission::new(MissionConfig::default(), NavigatorConfig::default(), Instant::now());
        Controller::new(ControlConfig::default(), Arc::new(Mutex::new(mission)), source, rec.clone(), rec)
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_times_out_into_error() {
        let rec = Arc::new(Recorder::default());
        let mut c = controller(Arc::new(Hanging), rec.clone());
        for _ in 0..3 {
            c.tick().await;
        }
        assert_eq!(lock(&c.mission).state(), MissionState::Error);
        assert_eq!(lock(&rec.drives).len(), 3);
        assert!(lock(&rec.drives).iter().all(|d| *d == (0.0, 0.0)));
        assert_eq!(lock(&rec.snapshots).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_calibration_request_returns_to_idle() {
        let rec = Arc::new(Recorder::default());
        let mut c = controller(Arc::new(Fixed), rec);
        lock(&c.mission).apply(crate::Command::CalibrateCompass, Instant::now()).unwrap();
        c.tick().await;
        assert_eq!(lock(&c.mission).state(), MissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_runs_final_stopped_tick() {
        let rec = Arc::new(Recorder::default());
        let c = controller(Arc::new(Fixed), rec.clone());
        let mission = c.mission();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(c.run(rx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(lock(&mission).state(), MissionState::Stopped);
        let snaps = lock(&rec.snapshots);
        assert!(snaps.len() >= 4, "got {} snapshots", snaps.len());
        assert_eq!(snaps.last().map(|s| s.state), Some(MissionState::Stopped));
        assert_eq!(lock(&rec.drives).last(), Some(&(0.0, 0.0)));
        assert_eq!(
            lock(&mission).apply(crate::Command::Run, Instant::now()),
            Err(crate::Rejection::ShuttingDown)
        );
    }
}
