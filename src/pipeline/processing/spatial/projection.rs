use once_cell::sync::Lazy;
use regex::Regex;
use std::f64::consts::FRAC_PI_2;
use std::fmt;

use super::geometry::Coord;
use crate::error::GeometryError;

static EPSG_CODE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)EPSG:{1,2}(?:[\d.]*:)?(\d+)$").ok());
static CRS84: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)CRS:?84$").ok());

/// Coordinate reference systems the polygon loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude degrees (EPSG:4326, OGC CRS84)
    Wgs84,
    /// NAD83 / New York Long Island, US survey feet (EPSG:2263)
    NyLongIslandFtUs,
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => f.write_str("EPSG:4326"),
            Crs::NyLongIslandFtUs => f.write_str("EPSG:2263"),
        }
    }
}

impl Crs {
    /// Parse a CRS name such as `EPSG:2263`, `urn:ogc:def:crs:EPSG::4326` or
    /// `urn:ogc:def:crs:OGC:1.3:CRS84`
    pub fn parse(name: &str) -> Result<Crs, GeometryError> {
        let name = name.trim();
        if CRS84.as_ref().is_some_and(|re| re.is_match(name)) {
            return Ok(Crs::Wgs84);
        }
        let code = EPSG_CODE
            .as_ref()
            .and_then(|re| re.captures(name))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());
        match code {
            Some("4326") => Ok(Crs::Wgs84),
            Some("2263") => Ok(Crs::NyLongIslandFtUs),
            _ => Err(GeometryError::UnsupportedCrs(name.to_string())),
        }
    }

    pub fn is_wgs84(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Convert a position in this CRS to WGS84 (x = longitude, y = latitude)
    pub fn to_wgs84(&self, coord: Coord) -> Coord {
        match self {
            Crs::Wgs84 => coord,
            Crs::NyLongIslandFtUs => NY_LONG_ISLAND.inverse(coord),
        }
    }
}

const US_SURVEY_FOOT: f64 = 1200.0 / 3937.0;

/// Lambert Conformal Conic (2SP) on an ellipsoid, inverse only
struct LambertConformal {
    a: f64,
    e: f64,
    n: f64,
    f: f64,
    r0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    unit_to_meters: f64,
}

// GRS80, standard parallels 41°02' and 40°40', origin 40°10' N 74° W,
// false easting 300000 m
static NY_LONG_ISLAND: Lazy<LambertConformal> = Lazy::new(|| {
    LambertConformal::new(
        6_378_137.0,
        1.0 / 298.257_222_101,
        dms(41.0, 2.0),
        dms(40.0, 40.0),
        dms(40.0, 10.0),
        -74.0,
        300_000.0,
        0.0,
        US_SURVEY_FOOT,
    )
});

fn dms(degrees: f64, minutes: f64) -> f64 {
    degrees + minutes / 60.0
}

impl LambertConformal {
    #[allow(clippy::too_many_arguments)]
    fn new(
        a: f64,
        flattening: f64,
        parallel1: f64,
        parallel2: f64,
        lat0: f64,
        lon0: f64,
        false_easting: f64,
        false_northing: f64,
        unit_to_meters: f64,
    ) -> Self {
        let e = (2.0 * flattening - flattening * flattening).sqrt();
        let (p1, p2, p0) = (parallel1.to_radians(), parallel2.to_radians(), lat0.to_radians());

        let m = |phi: f64| phi.cos() / (1.0 - (e * phi.sin()).powi(2)).sqrt();
        let t = |phi: f64| {
            let es = e * phi.sin();
            (std::f64::consts::FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
        };

        let n = (m(p1).ln() - m(p2).ln()) / (t(p1).ln() - t(p2).ln());
        let f = m(p1) / (n * t(p1).powf(n));
        let r0 = a * f * t(p0).powf(n);

        Self {
            a,
            e,
            n,
            f,
            r0,
            lon0: lon0.to_radians(),
            false_easting,
            false_northing,
            unit_to_meters,
        }
    }

    fn inverse(&self, coord: Coord) -> Coord {
        let dx = coord.x * self.unit_to_meters - self.false_easting;
        let dy = self.r0 - (coord.y * self.unit_to_meters - self.false_northing);

        let r = dx.hypot(dy).copysign(self.n);
        let t = (r / (self.a * self.f)).powf(1.0 / self.n);
        let theta = dx.atan2(dy);
        let lon = theta / self.n + self.lon0;

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            let converged = (next - phi).abs() < 1e-12;
            phi = next;
            if converged {
                break;
            }
        }

        Coord::new(lon.to_degrees(), phi.to_degrees())
    }
}
