//! Kinematic rover used when no hardware is attached.
//!
//! One `Simulator` plays both collaborators: commands given through
//! [`Driver::drive`] move the vehicle, [`TelemetrySource::sample`] reports it.
//! Motion is integrated lazily from the time elapsed since the previous call.

use async_trait::async_trait;
use avc_nav::{GeoPoint, LocalFrame};
use avc_proto::Position;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::error::SensorError;
use crate::io::{Driver, Sample, TelemetrySource};
use crate::lock;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub start_heading_deg: f64,
    pub max_speed_m_s: f64,
    pub max_turn_rate_deg_s: f64,
    pub calibration_delay_ms: u64,
    pub start_calibrated: bool,
    pub satellites: u8,
    pub accuracy_m: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            origin_lat: 40.091244,
            origin_lon: -105.185276,
            start_heading_deg: 0.0,
            max_speed_m_s: 4.5,
            max_turn_rate_deg_s: 90.0,
            calibration_delay_ms: 2_000,
            start_calibrated: false,
            satellites: 12,
            accuracy_m: 1.0,
        }
    }
}

#[derive(Debug)]
struct Vehicle {
    position: Position,
    heading_deg: f64,
    speed_m_s: f64,
    throttle: f64,
    steering: f64,
    calibrated: bool,
    calibrating_until: Option<Instant>,
    updated: Instant,
}

pub struct Simulator {
    cfg: SimConfig,
    frame: LocalFrame,
    vehicle: Mutex<Vehicle>,
}

impl Simulator {
    pub fn new(cfg: SimConfig) -> Self {
        let frame = LocalFrame::new(GeoPoint::new(cfg.origin_lat, cfg.origin_lon));
        let vehicle = Vehicle {
            position: Position::default(),
            heading_deg: cfg.start_heading_deg.rem_euclid(360.0),
            speed_m_s: 0.0,
            throttle: 0.0,
            steering: 0.0,
            calibrated: cfg.start_calibrated,
            calibrating_until: None,
            updated: Instant::now(),
        };
        Self { cfg, frame, vehicle: Mutex::new(vehicle) }
    }

    pub fn frame(&self) -> LocalFrame {
        self.frame
    }

    /// Planar position relative to the simulator origin.
    pub fn position(&self) -> Position {
        let mut v = lock(&self.vehicle);
        self.step(&mut v, Instant::now());
        v.position
    }

    fn step(&self, v: &mut Vehicle, now: Instant) {
        let dt = now.saturating_duration_since(v.updated).as_secs_f64();
        v.updated = now;

        if let Some(until) = v.calibrating_until {
            if now >= until {
                v.calibrated = true;
                v.calibrating_until = None;
            }
        }
        if dt <= 0.0 {
            return;
        }

        v.speed_m_s = v.throttle * self.cfg.max_speed_m_s;
        // Turning scales with speed so a parked rover does not spin in place.
        let speed_frac = if self.cfg.max_speed_m_s > 0.0 { (v.speed_m_s / self.cfg.max_speed_m_s).abs() } else { 0.0 };
        v.heading_deg =
            (v.heading_deg + v.steering * self.cfg.max_turn_rate_deg_s * speed_frac * dt).rem_euclid(360.0);
        let h = v.heading_deg.to_radians();
        v.position.x_m += h.sin() * v.speed_m_s * dt;
        v.position.y_m += h.cos() * v.speed_m_s * dt;
    }
}

#[async_trait]
impl TelemetrySource for Simulator {
    async fn sample(&self) -> Result<Sample, SensorError> {
        let mut v = lock(&self.vehicle);
        self.step(&mut v, Instant::now());
        Ok(Sample {
            fix: self.frame.to_geo(v.position),
            heading_deg: v.heading_deg,
            speed_m_s: v.speed_m_s,
            compass_calibrated: v.calibrated,
            satellites: self.cfg.satellites,
            accuracy_m: self.cfg.accuracy_m,
        })
    }

    async fn request_compass_calibration(&self) -> Result<(), SensorError> {
        let mut v = lock(&self.vehicle);
        let now = Instant::now();
        self.step(&mut v, now);
        v.calibrated = false;
        v.calibrating_until = Some(now + Duration::from_millis(self.cfg.calibration_delay_ms));
        info!("sim: compass calibration started");
        Ok(())
    }
}

#[async_trait]
impl Driver for Simulator {
    async fn drive(&self, throttle: f64, steering: f64) -> Result<(), SensorError> {
        let mut v = lock(&self.vehicle);
        self.step(&mut v, Instant::now());
        v.throttle = throttle.clamp(-1.0, 1.0);
        v.steering = steering.clamp(-1.0, 1.0);
        Ok(())
    }
}
