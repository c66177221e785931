//! Position model: geographic to planar conversion and compass geometry.
//!
//! All navigation math runs in a local east/north plane anchored at the first
//! waypoint of a route. Distances are meters, bearings are compass degrees
//! (0 = north, clockwise).

use avc_proto::Position;
use serde::{Deserialize, Serialize};

pub const EQUATORIAL_RADIUS_M: f64 = 6_378_137.0;

/// Meters per degree of latitude on the equatorial-radius sphere.
pub const M_PER_DEG_LAT: f64 = EQUATORIAL_RADIUS_M * 2.0 * std::f64::consts::PI / 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.lat.abs() <= 90.0 && self.lon.abs() <= 180.0
    }
}

/// Equirectangular frame around a fixed origin. Good to well under a meter
/// over the few hundred meters a course spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin: GeoPoint,
    m_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        Self { origin, m_per_deg_lon: m_per_deg_lon(origin.lat) }
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn to_local(&self, p: GeoPoint) -> Position {
        Position {
            x_m: (p.lon - self.origin.lon) * self.m_per_deg_lon,
            y_m: (p.lat - self.origin.lat) * M_PER_DEG_LAT,
        }
    }

    pub fn to_geo(&self, p: Position) -> GeoPoint {
        GeoPoint {
            lat: self.origin.lat + p.y_m / M_PER_DEG_LAT,
            lon: self.origin.lon + p.x_m / self.m_per_deg_lon,
        }
    }
}

/// Meters per degree of longitude at the given latitude.
pub fn m_per_deg_lon(lat_deg: f64) -> f64 {
    lat_deg.to_radians().cos() * EQUATORIAL_RADIUS_M * 2.0 * std::f64::consts::PI / 360.0
}

pub fn distance_m(a: Position, b: Position) -> f64 {
    let dx = b.x_m - a.x_m;
    let dy = b.y_m - a.y_m;
    (dx * dx + dy * dy).sqrt()
}

/// Compass bearing from `a` to `b`, in `[0, 360)`.
///
/// Identical points give 0. A target straight north gives 0, straight south
/// gives 180. The piecewise `atan` form is kept instead of `atan2` because the
/// two conventions disagree on sign once `dx < 0`.
pub fn relative_bearing_deg(a: Position, b: Position) -> f64 {
    let dx = b.x_m - a.x_m;
    let dy = b.y_m - a.y_m;
    if dx == 0.0 {
        return if dy >= 0.0 { 0.0 } else { 180.0 };
    }
    let deg = (dy / dx).atan().to_degrees();
    let bearing = if dx > 0.0 { 90.0 - deg } else { 270.0 - deg };
    // atan stays within (-90, 90), so this only guards float edge noise.
    bearing.rem_euclid(360.0)
}

/// Wraps an angle into `(-180, 180]`.
pub fn normalize_deg(deg: f64) -> f64 {
    let r = deg % 360.0;
    if r <= -180.0 {
        r + 360.0
    } else if r > 180.0 {
        r - 360.0
    } else {
        r
    }
}
