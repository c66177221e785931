//! Mission state machine.
//!
//! `Mission` is the single owner of [`MissionState`], the navigator settings,
//! the loaded route and the current target. It is driven from two places
//! only: [`Mission::apply`] for operator commands and [`Mission::tick`] for
//! the fixed-rate control loop. Both are plain synchronous calls; the caller
//! holds the lock and never awaits inside it.

use avc_nav::{advance, distance_m, relative_bearing_deg, LocalFrame, NavigatorConfig, Route};
use avc_proto::{MissionState, Pose, Position, TelemetrySnapshot};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Rejection, SensorError};
use crate::io::Sample;
use crate::state::SensorHealth;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub line_up_ms: u64,
    pub count_down_ms: u64,
    pub calibration_timeout_ms: u64,
    /// Consecutive faulted ticks before the mission enters `Error`.
    pub sensor_fault_limit: u32,
    /// Ground speed at or below which a running rover counts as not moving.
    pub stuck_speed_m_s: f64,
    /// Consecutive not-moving samples while running before a stuck warning.
    pub stuck_samples: u32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            line_up_ms: 3_000,
            count_down_ms: 3_000,
            calibration_timeout_ms: 30_000,
            sensor_fault_limit: 3,
            stuck_speed_m_s: 0.1,
            stuck_samples: 10,
        }
    }
}

impl MissionConfig {
    fn line_up(&self) -> Duration {
        Duration::from_millis(self.line_up_ms)
    }

    fn count_down(&self) -> Duration {
        Duration::from_millis(self.count_down_ms)
    }

    fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Run,
    Stop,
    Reset,
    CalibrateCompass,
    LineUp,
    CountDown,
    SetMaxThrottle(f64),
    SetWaypoints(Route),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run => "run",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::CalibrateCompass => "calibrate-compass",
            Command::LineUp => "line-up",
            Command::CountDown => "count-down",
            Command::SetMaxThrottle(_) => "set-max-throttle",
            Command::SetWaypoints(_) => "set-waypoints",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: MissionState,
    pub to: MissionState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.to)
        } else {
            write!(f, "{} -> {}", self.from, self.to)
        }
    }
}

/// Inputs gathered by the controller outside the lock.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub sample: Result<Sample, SensorError>,
    /// Failure of the previous tick's driver command, if any.
    pub driver_fault: Option<SensorError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub throttle: f64,
    pub steering: f64,
    pub snapshot: TelemetrySnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Calibration {
    Idle,
    Requested,
    Dispatched,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastSample {
    pose: Pose,
    compass_calibrated: bool,
    satellites: u8,
    accuracy_m: f64,
}

pub struct Mission {
    cfg: MissionConfig,
    nav: NavigatorConfig,
    state: MissionState,
    phase_started: Instant,
    route: Option<Route>,
    frame: Option<LocalFrame>,
    target_index: Option<usize>,
    resume_index: Option<usize>,
    calibration: Calibration,
    last: LastSample,
    health: SensorHealth,
    stalled_samples: u32,
    shutting_down: bool,
}

impl Mission {
    pub fn new(cfg: MissionConfig, nav: NavigatorConfig, now: Instant) -> Self {
        Self {
            cfg,
            nav,
            state: MissionState::Idle,
            phase_started: now,
            route: None,
            frame: None,
            target_index: None,
            resume_index: None,
            calibration: Calibration::Idle,
            last: LastSample::default(),
            health: SensorHealth::default(),
            stalled_samples: 0,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn nav_config(&self) -> &NavigatorConfig {
        &self.nav
    }

    pub fn target_index(&self) -> Option<usize> {
        self.target_index
    }

    pub fn waypoint_count(&self) -> usize {
        self.route.as_ref().map_or(0, Route::len)
    }

    pub fn compass_calibrated(&self) -> bool {
        self.last.compass_calibrated
    }

    pub fn health(&self) -> &SensorHealth {
        &self.health
    }

    /// Applies an operator command. On rejection nothing changes.
    pub fn apply(&mut self, cmd: Command, now: Instant) -> Result<Transition, Rejection> {
        if self.shutting_down {
            return Err(Rejection::ShuttingDown);
        }
        let from = self.state;
        let name = cmd.name();
        match cmd {
            Command::Run => {
                if !matches!(from, MissionState::Idle | MissionState::Stopped) {
                    return Err(Rejection::InvalidState { command: name, state: from });
                }
                self.check_run_guard()?;
                let start = match from {
                    MissionState::Stopped => self.resume_index.unwrap_or(0),
                    _ => 0,
                };
                self.start_running(start, now);
            }
            Command::Stop => {
                if from == MissionState::Error {
                    return Err(Rejection::InvalidState { command: name, state: from });
                }
                self.enter_stopped(now);
            }
            Command::Reset => {
                if let Some(fault) = &self.health.last_fault {
                    info!("reset clears sensor fault: {}", fault);
                }
                self.set_state(MissionState::Idle, now);
                self.target_index = None;
                self.resume_index = None;
                self.health.clear();
            }
            Command::CalibrateCompass => {
                self.stage(name, MissionState::CalibratingCompass, now)?;
                self.calibration = Calibration::Requested;
            }
            Command::LineUp => self.stage(name, MissionState::LiningUp, now)?,
            Command::CountDown => self.stage(name, MissionState::CountingDown, now)?,
            Command::SetMaxThrottle(value) => {
                if !NavigatorConfig::throttle_in_range(value) {
                    return Err(Rejection::ThrottleOutOfRange(value));
                }
                self.nav.max_throttle = value;
            }
            Command::SetWaypoints(route) => {
                if !matches!(from, MissionState::Idle | MissionState::Stopped | MissionState::Error) {
                    return Err(Rejection::InvalidState { command: name, state: from });
                }
                self.frame = Some(route.frame);
                self.route = Some(route);
                self.resume_index = None;
                self.target_index = None;
            }
        }
        Ok(Transition { from, to: self.state })
    }

    /// Called by the controller after taking the lock. True once per
    /// `calibrate-compass` command.
    pub fn take_calibration_request(&mut self) -> bool {
        if self.calibration == Calibration::Requested {
            self.calibration = Calibration::Dispatched;
            true
        } else {
            false
        }
    }

    pub fn calibration_failed(&mut self, err: &SensorError, now: Instant) {
        if self.state == MissionState::CalibratingCompass {
            warn!("compass calibration could not start: {}", err);
            self.set_state(MissionState::Idle, now);
        }
    }

    /// Forces `Stopped` ahead of the final tick. `Error` is left alone.
    /// From here on every command is rejected and every tick is neutral.
    pub fn shutdown(&mut self, now: Instant) {
        self.shutting_down = true;
        if self.state != MissionState::Error {
            self.enter_stopped(now);
        }
    }

    pub fn tick(&mut self, input: TickInput, now: Instant) -> TickOutput {
        self.run_timers(now);

        let fault = match (&input.sample, input.driver_fault) {
            (Err(e), _) => Some(e.clone()),
            (Ok(_), driver) => driver,
        };
        if let Ok(sample) = &input.sample {
            self.absorb(sample);
        }

        let (throttle, steering) = match fault {
            Some(err) => {
                self.on_fault(err, now);
                (0.0, 0.0)
            }
            None => {
                self.health.record_ok(now);
                self.check_calibration(now);
                if self.state == MissionState::Running && !self.shutting_down {
                    self.check_stuck();
                    self.navigate(now)
                } else {
                    (0.0, 0.0)
                }
            }
        };

        TickOutput { throttle, steering, snapshot: self.snapshot(throttle, steering) }
    }

    fn check_run_guard(&self) -> Result<(), Rejection> {
        if self.waypoint_count() == 0 {
            return Err(Rejection::NoWaypoints);
        }
        if !self.last.compass_calibrated {
            return Err(Rejection::CompassNotCalibrated);
        }
        Ok(())
    }

    // Staging phases are entered from Idle only.
    fn stage(&mut self, command: &'static str, to: MissionState, now: Instant) -> Result<(), Rejection> {
        if self.state != MissionState::Idle {
            return Err(Rejection::InvalidState { command, state: self.state });
        }
        self.set_state(to, now);
        Ok(())
    }

    fn set_state(&mut self, to: MissionState, now: Instant) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "mission state");
            // An outstanding calibration request dies with its phase.
            if self.state == MissionState::CalibratingCompass {
                self.calibration = Calibration::Idle;
            }
            self.stalled_samples = 0;
        }
        self.state = to;
        self.phase_started = now;
    }

    fn start_running(&mut self, index: usize, now: Instant) {
        self.target_index = Some(index.min(self.waypoint_count().saturating_sub(1)));
        self.resume_index = None;
        self.set_state(MissionState::Running, now);
    }

    fn enter_stopped(&mut self, now: Instant) {
        if self.state == MissionState::Running {
            self.resume_index = self.target_index;
        }
        self.target_index = None;
        self.set_state(MissionState::Stopped, now);
    }

    fn run_timers(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.phase_started);
        match self.state {
            MissionState::LiningUp if elapsed >= self.cfg.line_up() => {
                info!("line-up complete");
                self.set_state(MissionState::Idle, now);
            }
            MissionState::CountingDown if elapsed >= self.cfg.count_down() => match self.check_run_guard() {
                Ok(()) => {
                    info!("count-down complete, running");
                    self.start_running(0, now);
                }
                Err(reason) => {
                    warn!("count-down complete but cannot run: {}", reason);
                    self.target_index = None;
                    self.set_state(MissionState::Stopped, now);
                }
            },
            MissionState::CalibratingCompass if elapsed >= self.cfg.calibration_timeout() => {
                warn!("compass calibration timed out after {:?}", elapsed);
                self.set_state(MissionState::Idle, now);
            }
            _ => {}
        }
    }

    fn absorb(&mut self, sample: &Sample) {
        let frame = *self.frame.get_or_insert_with(|| {
            info!(lat = sample.fix.lat, lon = sample.fix.lon, "local frame anchored at first fix");
            LocalFrame::new(sample.fix)
        });
        self.last = LastSample {
            pose: Pose {
                position: frame.to_local(sample.fix),
                heading_deg: sample.heading_deg,
                speed_m_s: sample.speed_m_s,
            },
            compass_calibrated: sample.compass_calibrated,
            satellites: sample.satellites,
            accuracy_m: sample.accuracy_m,
        };
    }

    // Only samples taken after the request went out count.
    fn check_calibration(&mut self, now: Instant) {
        if self.state == MissionState::CalibratingCompass
            && self.calibration == Calibration::Dispatched
            && self.last.compass_calibrated
        {
            info!("compass calibrated");
            self.set_state(MissionState::Idle, now);
        }
    }

    fn on_fault(&mut self, err: SensorError, now: Instant) {
        let limit = self.cfg.sensor_fault_limit.max(1);
        let n = self.health.record_fault(err.clone());
        if self.state == MissionState::Error {
            debug!("sensor fault while in error: {}", err);
            return;
        }
        warn!("sensor fault {}/{}: {}", n, limit, err);
        if n >= limit {
            warn!(
                total_faults = self.health.total_faults,
                last_good_sample = ?self.health.sample_age(now),
                "sensor fault limit reached, mission halted until reset"
            );
            self.target_index = None;
            self.set_state(MissionState::Error, now);
        }
    }

    // Warns once per window of samples showing no ground speed while running.
    // Actuation is left to the navigator.
    fn check_stuck(&mut self) {
        if self.last.pose.speed_m_s.abs() > self.cfg.stuck_speed_m_s {
            self.stalled_samples = 0;
            return;
        }
        self.stalled_samples += 1;
        if self.cfg.stuck_samples > 0 && self.stalled_samples >= self.cfg.stuck_samples {
            warn!(
                x_m = self.last.pose.position.x_m,
                y_m = self.last.pose.position.y_m,
                "rover not moving for {} samples while running, possibly stuck",
                self.stalled_samples
            );
            self.stalled_samples = 0;
        }
    }

    fn navigate(&mut self, now: Instant) -> (f64, f64) {
        let (Some(route), Some(index)) = (self.route.as_ref(), self.target_index) else {
            return (0.0, 0.0);
        };
        let out = advance(&self.last.pose, &route.waypoints, index, &self.nav);
        if out.reached_final {
            info!("final waypoint {} reached, mission complete", out.target_index);
            self.target_index = None;
            self.resume_index = None;
            self.set_state(MissionState::Stopped, now);
            return (0.0, 0.0);
        }
        if out.target_index != index {
            info!("waypoint {} reached, heading for {}", out.target_index - 1, out.target_index);
        }
        self.target_index = Some(out.target_index);
        (out.throttle, out.steering)
    }

    fn snapshot(&self, throttle: f64, steering: f64) -> TelemetrySnapshot {
        let pose = self.last.pose;
        let target: Option<(usize, Position)> = match (self.state, self.target_index, self.route.as_ref()) {
            (MissionState::Running, Some(i), Some(route)) => route.waypoints.get(i).map(|w| (i, w.position)),
            _ => None,
        };
        TelemetrySnapshot {
            ts_unix_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            state: self.state,
            pose,
            target_waypoint_index: target.map(|(i, _)| i),
            target_waypoint: target.map(|(_, p)| p),
            distance_to_target_m: target.map(|(_, p)| distance_m(pose.position, p)),
            bearing_to_target_deg: target.map(|(_, p)| relative_bearing_deg(pose.position, p)),
            waypoint_count: self.waypoint_count(),
            throttle,
            steering,
            max_throttle: self.nav.max_throttle,
            compass_calibrated: self.last.compass_calibrated,
            satellites: self.last.satellites,
            accuracy_m: self.last.accuracy_m,
        }
    }
}
