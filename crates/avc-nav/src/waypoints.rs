use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::geo::{GeoPoint, LocalFrame};
use crate::navigator::Waypoint;

/// Waypoints resolved into the planar frame anchored at the first point.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub frame: LocalFrame,
    pub points: Vec<GeoPoint>,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn from_points(points: Vec<GeoPoint>) -> Result<Self> {
        let Some(origin) = points.first().copied() else {
            bail!("route has no waypoints");
        };
        for (i, p) in points.iter().enumerate() {
            anyhow::ensure!(p.is_valid(), "waypoint {} has invalid coordinates ({}, {})", i, p.lat, p.lon);
        }
        let frame = LocalFrame::new(origin);
        let waypoints = points.iter().map(|p| Waypoint { position: frame.to_local(*p) }).collect();
        Ok(Self { frame, points, waypoints })
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFormat {
    Toml,
    Csv,
    Kml,
}

impl RouteFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "csv" | "txt" => Ok(Self::Csv),
            "kml" => Ok(Self::Kml),
            other => bail!("unsupported waypoint file extension '{}' ({})", other, path.display()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TomlRoute {
    waypoints: Vec<GeoPoint>,
}

pub fn parse_route(text: &str, format: RouteFormat) -> Result<Route> {
    let points = match format {
        RouteFormat::Toml => {
            let doc: TomlRoute = toml::from_str(text).context("parse waypoint toml")?;
            doc.waypoints
        }
        RouteFormat::Csv => parse_csv(text)?,
        RouteFormat::Kml => parse_kml(text)?,
    };
    Route::from_points(points)
}

pub fn load_route(path: &Path) -> Result<Route> {
    let format = RouteFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).with_context(|| format!("read waypoint file {}", path.display()))?;
    parse_route(&text, format).with_context(|| format!("load waypoints from {}", path.display()))
}

fn parse_csv(text: &str) -> Result<Vec<GeoPoint>> {
    let mut out = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(lat), Some(lon)) = (fields.next(), fields.next()) else {
            bail!("line {}: expected 'lat,lon'", n + 1);
        };
        let lat: f64 = lat.parse().with_context(|| format!("line {}: bad latitude '{}'", n + 1, lat))?;
        let lon: f64 = lon.parse().with_context(|| format!("line {}: bad longitude '{}'", n + 1, lon))?;
        out.push(GeoPoint::new(lat, lon));
    }
    Ok(out)
}

// KML stores "lon,lat[,alt]" tuples separated by whitespace.
fn parse_kml(text: &str) -> Result<Vec<GeoPoint>> {
    const OPEN: &str = "<coordinates>";
    const CLOSE: &str = "</coordinates>";
    let start = text.find(OPEN).context("kml has no <coordinates> element")? + OPEN.len();
    let len = text[start..].find(CLOSE).context("unterminated <coordinates> element")?;

    let mut out = Vec::new();
    for tuple in text[start..start + len].split_whitespace() {
        let mut fields = tuple.split(',');
        let (Some(lon), Some(lat)) = (fields.next(), fields.next()) else {
            bail!("bad kml coordinate tuple '{}'", tuple);
        };
        let lon: f64 = lon.parse().with_context(|| format!("bad kml longitude '{}'", lon))?;
        let lat: f64 = lat.parse().with_context(|| format!("bad kml latitude '{}'", lat))?;
        out.push(GeoPoint::new(lat, lon));
    }
    Ok(out)
}
