//! Waypoint navigator.
//!
//! Given the current pose and an ordered list of waypoints, picks the active
//! target and turns heading error into proportional steering. Throttle is
//! simply the configured limit; the mission layer decides whether to drive.

use avc_proto::{Pose, Position};
use serde::{Deserialize, Serialize};

use crate::geo::{distance_m, normalize_deg, relative_bearing_deg};

/// Heading error that maps to full steering lock.
pub const FULL_LOCK_ERROR_DEG: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Position,
}

impl Waypoint {
    pub const fn new(x_m: f64, y_m: f64) -> Self {
        Self { position: Position::new(x_m, y_m) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavigatorConfig {
    /// Upper bound on commanded throttle, in (0, 1].
    pub max_throttle: f64,
    pub waypoint_radius_m: f64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self { max_throttle: 0.5, waypoint_radius_m: 1.5 }
    }
}

impl NavigatorConfig {
    pub fn throttle_in_range(value: f64) -> bool {
        value.is_finite() && value > 0.0 && value <= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavOutput {
    pub target_index: usize,
    pub throttle: f64,
    pub steering: f64,
    pub reached_final: bool,
    /// Distance and bearing to the target in effect after any advance.
    pub distance_m: f64,
    pub bearing_deg: f64,
}

impl NavOutput {
    fn neutral(target_index: usize) -> Self {
        Self {
            target_index,
            throttle: 0.0,
            steering: 0.0,
            reached_final: false,
            distance_m: f64::NAN,
            bearing_deg: f64::NAN,
        }
    }
}

/// Runs one navigation step.
///
/// A waypoint counts as reached once `distance <= waypoint_radius_m`. Reaching
/// an intermediate waypoint moves on to the next one within the same call, so
/// there is never a tick without a steering command. Reaching the last one
/// reports `reached_final` with a stop command.
///
/// Never panics: a non-finite pose, an empty list or an index past the end
/// produce a neutral output with the index left untouched.
pub fn advance(pose: &Pose, waypoints: &[Waypoint], target_index: usize, config: &NavigatorConfig) -> NavOutput {
    if waypoints.is_empty() || target_index >= waypoints.len() {
        return NavOutput::neutral(target_index);
    }
    if !pose.position.is_finite() || !pose.heading_deg.is_finite() {
        return NavOutput::neutral(target_index);
    }

    let last = waypoints.len() - 1;
    let mut index = target_index;
    let mut distance = distance_m(pose.position, waypoints[index].position);

    while distance <= config.waypoint_radius_m {
        if index == last {
            return NavOutput {
                target_index: index,
                throttle: 0.0,
                steering: 0.0,
                reached_final: true,
                distance_m: distance,
                bearing_deg: relative_bearing_deg(pose.position, waypoints[index].position),
            };
        }
        index += 1;
        distance = distance_m(pose.position, waypoints[index].position);
    }

    let bearing = relative_bearing_deg(pose.position, waypoints[index].position);
    let heading_error = normalize_deg(bearing - pose.heading_deg);
    let steering = (heading_error / FULL_LOCK_ERROR_DEG).clamp(-1.0, 1.0);

    NavOutput {
        target_index: index,
        throttle: clamp_throttle(config.max_throttle),
        steering,
        reached_final: false,
        distance_m: distance,
        bearing_deg: bearing,
    }
}

fn clamp_throttle(max_throttle: f64) -> f64 {
    if max_throttle.is_finite() {
        max_throttle.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(x: f64, y: f64, heading: f64) -> Pose {
        Pose { position: Position::new(x, y), heading_deg: heading, speed_m_s: 0.0 }
    }

    fn cfg(max_throttle: f64, radius: f64) -> NavigatorConfig {
        NavigatorConfig { max_throttle, waypoint_radius_m: radius }
    }

    #[test]
    fn target_ahead_drives_straight() {
        let wps = [Waypoint::new(0.0, 100.0)];
        let out = advance(&pose(0.0, 0.0, 0.0), &wps, 0, &cfg(0.7, 1.5));
        assert_eq!(out.target_index, 0);
        assert_eq!(out.steering, 0.0);
        assert_eq!(out.throttle, 0.7);
        assert!(!out.reached_final);
        assert!((out.distance_m - 100.0).abs() < 1e-9);
    }

    #[test]
    fn steering_is_proportional_with_full_lock_at_ninety() {
        let wps = [Waypoint::new(100.0, 100.0)];
        // bearing 45, heading 0 => error +45 => half right
        let out = advance(&pose(0.0, 0.0, 0.0), &wps, 0, &cfg(0.5, 1.0));
        assert!((out.steering - 0.5).abs() < 1e-9, "got {}", out.steering);

        // bearing 45, heading 90 => error -45 => half left
        let out = advance(&pose(0.0, 0.0, 90.0), &wps, 0, &cfg(0.5, 1.0));
        assert!((out.steering + 0.5).abs() < 1e-9, "got {}", out.steering);

        // target behind => clamped to full lock
        let wps = [Waypoint::new(0.0, -100.0)];
        let out = advance(&pose(0.0, 0.0, 10.0), &wps, 0, &cfg(0.5, 1.0));
        assert_eq!(out.steering, 1.0);
    }

    #[test]
    fn heading_error_wraps_across_north() {
        // bearing 10, heading 350 => +20, not -340
        let target = Position::new(10f64.to_radians().sin() * 50.0, 10f64.to_radians().cos() * 50.0);
        let wps = [Waypoint { position: target }];
        let out = advance(&pose(0.0, 0.0, 350.0), &wps, 0, &cfg(0.5, 1.0));
        assert!((out.steering - 20.0 / 90.0).abs() < 1e-6, "got {}", out.steering);
    }

    #[test]
    fn advances_exactly_at_radius_not_before() {
        let wps = [Waypoint::new(0.0, 10.0), Waypoint::new(0.0, 50.0)];
        let c = cfg(0.5, 2.0);

        let outside = advance(&pose(0.0, 7.999, 0.0), &wps, 0, &c);
        assert_eq!(outside.target_index, 0);

        let on_edge = advance(&pose(0.0, 8.0, 0.0), &wps, 0, &c);
        assert_eq!(on_edge.target_index, 1);
        assert!(!on_edge.reached_final);
        assert_eq!(on_edge.throttle, 0.5);
        assert!((on_edge.distance_m - 42.0).abs() < 1e-9);
    }

    #[test]
    fn skips_through_stacked_waypoints_in_one_call() {
        let wps = [Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 0.5), Waypoint::new(0.0, 30.0)];
        let out = advance(&pose(0.0, 0.0, 0.0), &wps, 0, &cfg(0.5, 1.0));
        assert_eq!(out.target_index, 2);
        assert!(!out.reached_final);
    }

    #[test]
    fn final_waypoint_reports_reached_and_stops() {
        let wps = [Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 100.0)];
        let out = advance(&pose(0.3, 99.5, 0.0), &wps, 1, &cfg(0.8, 1.5));
        assert!(out.reached_final);
        assert_eq!(out.throttle, 0.0);
        assert_eq!(out.steering, 0.0);
        assert_eq!(out.target_index, 1);
    }

    #[test]
    fn duplicate_final_waypoints_finish() {
        let wps = [Waypoint::new(5.0, 5.0), Waypoint::new(5.0, 5.0)];
        let out = advance(&pose(5.0, 5.0, 0.0), &wps, 0, &cfg(0.5, 1.0));
        assert!(out.reached_final);
        assert_eq!(out.target_index, 1);
    }

    #[test]
    fn throttle_never_exceeds_limit() {
        let wps = [Waypoint::new(-40.0, 80.0), Waypoint::new(60.0, -10.0)];
        for limit in [0.1, 0.5, 1.0] {
            for heading in [0.0, 90.0, 181.0, 275.0] {
                let out = advance(&pose(3.0, -2.0, heading), &wps, 0, &cfg(limit, 1.0));
                assert!(out.throttle <= limit);
                assert!(out.steering >= -1.0 && out.steering <= 1.0);
            }
        }
    }

    #[test]
    fn malformed_inputs_are_neutral() {
        let wps = [Waypoint::new(0.0, 10.0)];
        let c = cfg(0.5, 1.0);

        let out = advance(&pose(f64::NAN, 0.0, 0.0), &wps, 0, &c);
        assert_eq!((out.throttle, out.steering, out.reached_final), (0.0, 0.0, false));

        let out = advance(&pose(0.0, 0.0, f64::INFINITY), &wps, 0, &c);
        assert_eq!((out.throttle, out.steering), (0.0, 0.0));

        let out = advance(&pose(0.0, 0.0, 0.0), &[], 0, &c);
        assert_eq!(out.target_index, 0);
        assert_eq!(out.throttle, 0.0);

        let out = advance(&pose(0.0, 0.0, 0.0), &wps, 3, &c);
        assert_eq!(out.target_index, 3);
        assert_eq!(out.throttle, 0.0);
    }

    #[test]
    fn throttle_range_check() {
        assert!(NavigatorConfig::throttle_in_range(0.5));
        assert!(NavigatorConfig::throttle_in_range(1.0));
        assert!(!NavigatorConfig::throttle_in_range(0.0));
        assert!(!NavigatorConfig::throttle_in_range(1.5));
        assert!(!NavigatorConfig::throttle_in_range(-0.2));
        assert!(!NavigatorConfig::throttle_in_range(f64::NAN));
    }
}
