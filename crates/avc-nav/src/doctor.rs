use anyhow::Result;
use std::path::Path;

use crate::navigator::NavigatorConfig;
use crate::waypoints::{load_route, Route};

pub fn check_navigator(cfg: &NavigatorConfig) -> Result<()> {
    anyhow::ensure!(
        NavigatorConfig::throttle_in_range(cfg.max_throttle),
        "nav.max_throttle must be in (0, 1], got {}",
        cfg.max_throttle
    );
    anyhow::ensure!(
        cfg.waypoint_radius_m.is_finite() && cfg.waypoint_radius_m > 0.0,
        "nav.waypoint_radius_m must be > 0"
    );
    anyhow::ensure!(cfg.waypoint_radius_m <= 25.0, "nav.waypoint_radius_m too large");
    Ok(())
}

pub fn check_waypoint_dir(dir: &Path) -> Result<()> {
    anyhow::ensure!(dir.is_dir(), "nav.waypoint_dir {} is not a directory", dir.display());
    Ok(())
}

/// Loads the route and flags legs too short to be told apart at the given
/// waypoint radius.
pub fn check_route(path: &Path, cfg: &NavigatorConfig) -> Result<Route> {
    let route = load_route(path)?;
    for (i, pair) in route.waypoints.windows(2).enumerate() {
        let leg = crate::geo::distance_m(pair[0].position, pair[1].position);
        if leg <= cfg.waypoint_radius_m {
            tracing::warn!(leg = i, leg_m = leg, "waypoints {} and {} are within the waypoint radius", i, i + 1);
        }
    }
    Ok(route)
}

pub fn check_gnss_thresholds(stale_after_ms: u64, uere_m: f64) -> Result<()> {
    anyhow::ensure!(
        (200..=10_000).contains(&stale_after_ms),
        "telemetry.stale_after_ms should be 200..10000"
    );
    anyhow::ensure!(uere_m > 0.0 && uere_m < 50.0, "telemetry.uere_m out of range");
    Ok(())
}
