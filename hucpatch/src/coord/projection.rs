//! Pure-Rust forward and inverse map projections (Snyder 1987, USGS
//! Professional Paper 1395).
//!
//! Every transform goes through geographic longitude/latitude. NAD83 and
//! WGS84 are treated as the same datum; the sub-metre shift between them is
//! below the resolution of every raster the pipeline handles.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use super::crs::{Crs, ProjectionKind};
use super::{Bounds, CoordError};

/// Points inserted per bounds edge when reprojecting a rectangle.
pub const DEFAULT_DENSIFY_SEGMENTS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Ellipsoid {
    a: f64,
    f: f64,
}

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    f: 1.0 / 298.257_223_563,
};

const GRS80: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    f: 1.0 / 298.257_222_101,
};

impl Ellipsoid {
    fn e2(&self) -> f64 {
        2.0 * self.f - self.f * self.f
    }

    fn e(&self) -> f64 {
        self.e2().sqrt()
    }
}

// ── UTM ──────────────────────────────────────────────────────────────────

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

fn utm_central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// Meridional arc from the equator to `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(ell: &Ellipsoid, lat: f64) -> f64 {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    ell.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// Snyder eqs. 8-9 and 8-10.
fn utm_forward(ell: &Ellipsoid, zone: u32, north: bool, lon: f64, lat: f64) -> (f64, f64) {
    let e2 = ell.e2();
    let ep2 = e2 / (1.0 - e2);
    let lat = lat.to_radians();
    let lon = lon.to_radians();
    let lon0 = utm_central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = ell.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = ep2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(ell, lat);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = UTM_K0
        * n
        * (a + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a4 * a / 120.0)
        + UTM_FALSE_EASTING;

    let northing = UTM_K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    if north {
        (easting, northing)
    } else {
        (easting, northing + UTM_FALSE_NORTHING_SOUTH)
    }
}

/// Footpoint-latitude inverse. Snyder eqs. 8-12 through 8-25.
fn utm_inverse(ell: &Ellipsoid, zone: u32, north: bool, x: f64, y: f64) -> (f64, f64) {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let x = x - UTM_FALSE_EASTING;
    let y = if north {
        y
    } else {
        y - UTM_FALSE_NORTHING_SOUTH
    };

    let m = y / UTM_K0;
    let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let sqrt_1me2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - e2 * sin1 * sin1;
    let n1 = ell.a / w.sqrt();
    let r1 = ell.a * (1.0 - e2) / w.powf(1.5);
    let d = x / (n1 * UTM_K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = utm_central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d4
                * d
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

// ── CONUS Albers (EPSG:5070) ─────────────────────────────────────────────

const ALBERS_LAT1: f64 = 29.5;
const ALBERS_LAT2: f64 = 45.5;
const ALBERS_LAT0: f64 = 23.0;
const ALBERS_LON0: f64 = -96.0;

/// Snyder eq. 3-12.
fn albers_q(ell: &Ellipsoid, phi: f64) -> f64 {
    let e2 = ell.e2();
    let e = ell.e();
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

/// Snyder eq. 14-15.
fn albers_m(ell: &Ellipsoid, phi: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - ell.e2() * s * s).sqrt()
}

struct AlbersConstants {
    n: f64,
    c: f64,
    rho0: f64,
}

fn albers_constants(ell: &Ellipsoid) -> AlbersConstants {
    let phi1 = ALBERS_LAT1.to_radians();
    let phi2 = ALBERS_LAT2.to_radians();
    let phi0 = ALBERS_LAT0.to_radians();

    let m1 = albers_m(ell, phi1);
    let m2 = albers_m(ell, phi2);
    let q1 = albers_q(ell, phi1);
    let q2 = albers_q(ell, phi2);
    let q0 = albers_q(ell, phi0);

    let n = (m1 * m1 - m2 * m2) / (q2 - q1);
    let c = m1 * m1 + n * q1;
    let rho0 = ell.a * (c - n * q0).sqrt() / n;
    AlbersConstants { n, c, rho0 }
}

fn albers_forward(ell: &Ellipsoid, lon: f64, lat: f64) -> (f64, f64) {
    let k = albers_constants(ell);
    let q = albers_q(ell, lat.to_radians());
    let rho = ell.a * (k.c - k.n * q).sqrt() / k.n;
    let theta = k.n * (lon - ALBERS_LON0).to_radians();
    (rho * theta.sin(), k.rho0 - rho * theta.cos())
}

/// Inverse with the iterative latitude solution of Snyder eq. 3-16.
fn albers_inverse(ell: &Ellipsoid, x: f64, y: f64) -> Option<(f64, f64)> {
    let k = albers_constants(ell);
    let e2 = ell.e2();
    let e = ell.e();

    let dy = k.rho0 - y;
    let rho = (x * x + dy * dy).sqrt();
    let theta = x.atan2(dy);
    let q = (k.c - rho * rho * k.n * k.n / (ell.a * ell.a)) / k.n;

    let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
    for _ in 0..15 {
        let s = phi.sin();
        let one_minus = 1.0 - e2 * s * s;
        let delta = one_minus * one_minus / (2.0 * phi.cos())
            * (q / (1.0 - e2) - s / one_minus
                + (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln());
        phi += delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    if !phi.is_finite() {
        return None;
    }

    let lon = ALBERS_LON0 + (theta / k.n).to_degrees();
    Some((lon, phi.to_degrees()))
}

// ── Web Mercator (EPSG:3857) ─────────────────────────────────────────────

const MERCATOR_RADIUS: f64 = 6_378_137.0;

fn mercator_forward(lon: f64, lat: f64) -> (f64, f64) {
    let x = MERCATOR_RADIUS * lon.to_radians();
    let y = MERCATOR_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / MERCATOR_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

// ── Public API ───────────────────────────────────────────────────────────

fn out_of_domain(crs: Crs, x: f64, y: f64) -> CoordError {
    CoordError::OutOfDomain {
        crs: crs.to_string(),
        x,
        y,
    }
}

fn ellipsoid_for(grs80: bool) -> Ellipsoid {
    if grs80 {
        GRS80
    } else {
        WGS84
    }
}

/// Project `(x, y)` in `crs` to geographic `(lon, lat)` degrees.
pub(crate) fn to_lonlat(crs: Crs, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
    if !x.is_finite() || !y.is_finite() {
        return Err(out_of_domain(crs, x, y));
    }
    let result = match crs.kind() {
        ProjectionKind::Geographic => Some((x, y)),
        ProjectionKind::ConusAlbers => albers_inverse(&GRS80, x, y),
        ProjectionKind::Utm { zone, north, grs80 } => {
            Some(utm_inverse(&ellipsoid_for(grs80), zone, north, x, y))
        }
        ProjectionKind::WebMercator => Some(mercator_inverse(x, y)),
    };
    match result {
        Some((lon, lat)) if lon.is_finite() && lat.is_finite() && lat.abs() <= 90.0 => {
            Ok((lon, lat))
        }
        _ => Err(out_of_domain(crs, x, y)),
    }
}

/// Project geographic `(lon, lat)` degrees into `crs`.
pub(crate) fn from_lonlat(crs: Crs, lon: f64, lat: f64) -> Result<(f64, f64), CoordError> {
    if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
        return Err(out_of_domain(crs, lon, lat));
    }
    let (x, y) = match crs.kind() {
        ProjectionKind::Geographic => (lon, lat),
        ProjectionKind::ConusAlbers => albers_forward(&GRS80, lon, lat),
        ProjectionKind::Utm { zone, north, grs80 } => {
            utm_forward(&ellipsoid_for(grs80), zone, north, lon, lat)
        }
        ProjectionKind::WebMercator => {
            if lat.abs() >= 90.0 {
                return Err(out_of_domain(crs, lon, lat));
            }
            mercator_forward(lon, lat)
        }
    };
    if x.is_finite() && y.is_finite() {
        Ok((x, y))
    } else {
        Err(out_of_domain(crs, lon, lat))
    }
}

/// Transform a point between two reference systems.
pub fn transform_point(from: Crs, to: Crs, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
    if from == to {
        return Ok((x, y));
    }
    let (lon, lat) = to_lonlat(from, x, y)?;
    from_lonlat(to, lon, lat)
}

/// Transform a rectangle between reference systems.
///
/// Each edge is densified into `segments` pieces before projection and the
/// envelope of all projected points is returned, so curved edges in the
/// target system are still covered.
pub fn transform_bounds(
    from: Crs,
    to: Crs,
    bounds: &Bounds,
    segments: usize,
) -> Result<Bounds, CoordError> {
    if from == to {
        return Ok(*bounds);
    }
    let segments = segments.max(1);

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for i in 0..=segments {
        let t = i as f64 / segments as f64;
        let x = bounds.min_x + t * bounds.width();
        let y = bounds.min_y + t * bounds.height();
        let edge_points = [
            (x, bounds.min_y),
            (x, bounds.max_y),
            (bounds.min_x, y),
            (bounds.max_x, y),
        ];
        for (px, py) in edge_points {
            let (tx, ty) = transform_point(from, to, px, py)?;
            min_x = min_x.min(tx);
            min_y = min_y.min(ty);
            max_x = max_x.max(tx);
            max_y = max_y.max(ty);
        }
    }

    Ok(Bounds {
        min_x,
        min_y,
        max_x,
        max_y,
    })
}
