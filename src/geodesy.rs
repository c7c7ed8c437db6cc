//! Spherical-Earth geodesy and local East-North-Up (ENU) helpers.
//!
//! Angles are degrees at every public boundary; trig happens in radians.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,  // degrees, [-90, 90]
    pub longitude: f64, // degrees, [-180, 180)
}

impl GeoCoordinate {
    /// Builds a coordinate, clamping latitude and wrapping longitude.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: latitude.clamp(-90.0, 90.0),
            longitude: normalize_longitude(longitude),
        }
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Wraps an angle into [0, 360).
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wraps a longitude into [-180, 180).
pub fn normalize_longitude(longitude: f64) -> f64 {
    normalize_degrees(longitude + 180.0) - 180.0
}

/// Great-circle distance in meters (haversine).
pub fn distance(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` to `b`, degrees clockwise from north.
pub fn bearing(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance` meters along `bearing` from `origin`.
pub fn destination(origin: GeoCoordinate, bearing: f64, distance: f64) -> GeoCoordinate {
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();
    let theta = bearing.to_radians();
    let delta = distance / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos())
        .clamp(-1.0, 1.0)
        .asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    GeoCoordinate::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Unit vector for an azimuth/altitude pair. East = x, North = y, Up = z.
pub fn az_alt_to_enu(azimuth: f64, altitude: f64) -> Vector3<f64> {
    let az = azimuth.to_radians();
    let alt = altitude.to_radians();

    Vector3::new(alt.cos() * az.sin(), alt.cos() * az.cos(), alt.sin())
}

/// Inverse of [`az_alt_to_enu`]. Returns `(azimuth, altitude)` in degrees.
///
/// The vector does not need to be normalized. A zero vector maps to (0, 0).
pub fn enu_to_az_alt(v: &Vector3<f64>) -> (f64, f64) {
    let horizontal = v.x.hypot(v.y);
    if horizontal == 0.0 && v.z == 0.0 {
        return (0.0, 0.0);
    }

    let azimuth = if horizontal == 0.0 {
        0.0
    } else {
        normalize_degrees(v.x.atan2(v.y).to_degrees())
    };
    let altitude = v.z.atan2(horizontal).to_degrees();

    (azimuth, altitude)
}

/// Planar ENU offset (meters) of `coordinate` relative to `origin`. Up is 0.
pub fn coordinate_to_enu(coordinate: GeoCoordinate, origin: GeoCoordinate) -> Vector3<f64> {
    let d = distance(origin, coordinate);
    if d == 0.0 {
        return Vector3::zeros();
    }
    let b = bearing(origin, coordinate).to_radians();
    Vector3::new(d * b.sin(), d * b.cos(), 0.0)
}

/// Converts a planar ENU offset back to a coordinate via bearing + distance.
/// The Up component is ignored.
pub fn enu_offset_to_coordinate(offset: &Vector3<f64>, origin: GeoCoordinate) -> GeoCoordinate {
    let d = offset.x.hypot(offset.y);
    if d == 0.0 {
        return origin;
    }
    let b = normalize_degrees(offset.x.atan2(offset.y).to_degrees());
    destination(origin, b, d)
}

/// Bilinear interpolation of four corner values.
///
/// `v00` is at (0, 0), `v10` at (1, 0), `v01` at (0, 1), `v11` at (1, 1);
/// `fx` runs along the first index and `fy` along the second.
pub fn bilinear(v00: f64, v10: f64, v01: f64, v11: f64, fx: f64, fy: f64) -> f64 {
    let top = v00 + (v10 - v00) * fx;
    let bottom = v01 + (v11 - v01) * fx;
    top + (bottom - top) * fy
}
