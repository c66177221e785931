use anyhow::{Context, Result};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::geo::GeoPoint;

pub const KNOTS_TO_M_S: f64 = 0.514_444;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixQuality {
    pub sats: u8,
    pub hdop: f32,
}

impl Default for FixQuality {
    fn default() -> Self {
        Self { sats: 0, hdop: 99.9 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GnssFix {
    pub point: GeoPoint,
    pub speed_m_s: f64,
    /// Course over ground. Receivers leave it empty when stationary.
    pub course_deg: Option<f64>,
    pub quality: FixQuality,
    pub ts: OffsetDateTime,
}

/// Stateful NMEA 0183 decoder.
///
/// GGA sentences update the quality figures; each valid RMC sentence yields a
/// fix carrying the most recent quality. Other talkers and sentences are
/// ignored.
#[derive(Debug, Default)]
pub struct NmeaParser {
    last_quality: FixQuality,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<GnssFix> {
        let s = strip_checksum(line.trim());
        let parts: Vec<&str> = s.split(',').collect();
        let kind = parts.first().copied().unwrap_or("");
        if !kind.starts_with('$') || kind.len() < 6 {
            return None;
        }

        match kind.get(3..).unwrap_or("") {
            "GGA" if parts.len() > 8 => {
                let fix_type: u8 = parts[6].parse().unwrap_or(0);
                self.last_quality = if fix_type == 0 {
                    FixQuality::default()
                } else {
                    FixQuality {
                        sats: parts[7].parse().unwrap_or(0),
                        hdop: parts[8].parse().unwrap_or(99.9),
                    }
                };
                None
            }
            "RMC" if parts.len() > 8 => {
                // parts[2] = A (valid) or V (void)
                if parts[2] != "A" {
                    return None;
                }
                let lat = parse_deg_min(parts[3], parts[4])?;
                let lon = parse_deg_min(parts[5], parts[6])?;
                let speed_kn: f64 = parts[7].parse().unwrap_or(0.0);
                let course_deg = parts[8].parse::<f64>().ok();
                Some(GnssFix {
                    point: GeoPoint::new(lat, lon),
                    speed_m_s: speed_kn * KNOTS_TO_M_S,
                    course_deg,
                    quality: self.last_quality,
                    ts: OffsetDateTime::now_utc(),
                })
            }
            _ => None,
        }
    }
}

fn strip_checksum(s: &str) -> &str {
    match s.find('*') {
        Some(i) => &s[..i],
        None => s,
    }
}

pub enum GnssSource {
    Serial(BufReader<SerialStream>),
    /// Replays a capture, pausing `pace` after each fix.
    File { reader: BufReader<File>, pace: Duration },
}

pub struct GnssReader {
    source: GnssSource,
    parser: NmeaParser,
}

impl GnssReader {
    pub fn serial(dev: &str, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open serial {}", dev))?;
        Ok(Self::new(GnssSource::Serial(BufReader::new(port))))
    }

    pub async fn file(path: &str, pace: Duration) -> Result<Self> {
        let f = File::open(path).await.with_context(|| format!("open nmea file {}", path))?;
        Ok(Self::new(GnssSource::File { reader: BufReader::new(f), pace }))
    }

    pub fn new(source: GnssSource) -> Self {
        Self { source, parser: NmeaParser::new() }
    }

    /// Errors only when the underlying stream fails or closes. Line noise,
    /// including bytes that are not UTF-8, is skipped.
    pub async fn next_fix(&mut self) -> Result<GnssFix> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match &mut self.source {
                GnssSource::Serial(r) => {
                    let n = r.read_until(b'\n', &mut buf).await.context("read nmea serial")?;
                    anyhow::ensure!(n > 0, "nmea serial closed");
                }
                GnssSource::File { reader, .. } => {
                    let n = reader.read_until(b'\n', &mut buf).await.context("read nmea file")?;
                    if n == 0 {
                        // EOF: wait for the capture to grow
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                }
            }
            if let Some(fix) = self.parser.push_line(&String::from_utf8_lossy(&buf)) {
                if let GnssSource::File { pace, .. } = &self.source {
                    tokio::time::sleep(*pace).await;
                }
                return Ok(fix);
            }
        }
    }
}

fn parse_deg_min(v: &str, hemi: &str) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    // lat: ddmm.mmmm, lon: dddmm.mmmm
    let dot = v.find('.').unwrap_or(v.len());
    if dot < 3 {
        return None;
    }
    let deg_len = dot - 2;
    let deg: f64 = v.get(..deg_len)?.parse().ok()?;
    let min: f64 = v.get(deg_len..)?.parse().ok()?;
    let mut out = deg + (min / 60.0);
    if hemi == "S" || hemi == "W" {
        out = -out;
    }
    Some(out)
}
