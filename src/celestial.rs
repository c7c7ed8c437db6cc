//! Low-precision Sun and Moon positions for a ground observer.
//!
//! Sun: NOAA / Meeus ch. 25 low-accuracy series (~0.01°).
//! Moon: the principal terms of Meeus ch. 47 (~0.3°), with topocentric
//! parallax applied since it reaches a full degree near the horizon.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::geodesy::{normalize_degrees, GeoCoordinate};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const EARTH_EQUATORIAL_RADIUS_KM: f64 = 6378.14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CelestialObject {
    Sun,
    Moon,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectPosition {
    pub time: DateTime<Utc>,
    pub azimuth: f64,   // degrees clockwise from true north, [0, 360)
    pub elevation: f64, // degrees above the astronomical horizon
}

/// Azimuth and elevation of `object` seen from `coordinate` at `time`.
pub fn position(
    object: CelestialObject,
    time: DateTime<Utc>,
    coordinate: GeoCoordinate,
) -> ObjectPosition {
    let jd = julian_day(time);

    let (ra, dec, distance_km) = match object {
        CelestialObject::Sun => {
            let (ra, dec) = sun_equatorial(jd);
            (ra, dec, None)
        }
        CelestialObject::Moon => {
            let (ra, dec, distance) = moon_equatorial(jd);
            (ra, dec, Some(distance))
        }
    };

    let lst = normalize_degrees(greenwich_mean_sidereal_time(jd) + coordinate.longitude);
    let hour_angle = lst - ra;
    let (azimuth, mut elevation) = equatorial_to_horizontal(hour_angle, dec, coordinate.latitude);

    if let Some(distance) = distance_km {
        // Horizontal parallax shifts a nearby body down towards the horizon
        let parallax = (EARTH_EQUATORIAL_RADIUS_KM / distance).asin();
        elevation -= (parallax * elevation.to_radians().cos()).to_degrees();
    }

    ObjectPosition {
        time,
        azimuth,
        elevation,
    }
}

pub fn julian_day(time: DateTime<Utc>) -> f64 {
    UNIX_EPOCH_JD + time.timestamp_millis() as f64 / 86_400_000.0
}

/// Greenwich mean sidereal time in degrees (Meeus 12.4).
pub fn greenwich_mean_sidereal_time(jd: f64) -> f64 {
    let d = jd - J2000;
    let t = d / 36_525.0;
    normalize_degrees(
        280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
            - t * t * t / 38_710_000.0,
    )
}

fn obliquity(t: f64) -> f64 {
    23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.000_59 - t * 0.001_813))) / 60.0) / 60.0
}

/// Apparent right ascension and declination of the Sun, degrees.
fn sun_equatorial(jd: f64) -> (f64, f64) {
    let t = (jd - J2000) / 36_525.0;

    let mean_longitude = normalize_degrees(280.466_46 + t * (36_000.769_83 + 0.000_303_2 * t));
    let mean_anomaly = (357.529_11 + t * (35_999.050_29 - 0.000_153_7 * t)).to_radians();

    let center = (1.914_602 - t * (0.004_817 + 0.000_014 * t)) * mean_anomaly.sin()
        + (0.019_993 - 0.000_101 * t) * (2.0 * mean_anomaly).sin()
        + 0.000_289 * (3.0 * mean_anomaly).sin();

    let omega = (125.04 - 1934.136 * t).to_radians();
    let apparent_longitude = (mean_longitude + center - 0.005_69 - 0.004_78 * omega.sin()).to_radians();
    let epsilon = (obliquity(t) + 0.002_56 * omega.cos()).to_radians();

    let ra = (epsilon.cos() * apparent_longitude.sin()).atan2(apparent_longitude.cos());
    let dec = (epsilon.sin() * apparent_longitude.sin()).asin();

    (normalize_degrees(ra.to_degrees()), dec.to_degrees())
}

/// Geocentric right ascension, declination (degrees) and distance (km) of the Moon.
fn moon_equatorial(jd: f64) -> (f64, f64, f64) {
    let d = jd - J2000;
    let t = d / 36_525.0;

    let mean_longitude = 218.316 + 13.176_396 * d;
    let elongation = (297.850 + 12.190_749 * d).to_radians();
    let sun_anomaly = (357.529 + 0.985_600_28 * d).to_radians();
    let moon_anomaly = (134.963 + 13.064_993 * d).to_radians();
    let latitude_arg = (93.272 + 13.229_350 * d).to_radians();

    let longitude = mean_longitude + 6.289 * moon_anomaly.sin()
        + 1.274 * (2.0 * elongation - moon_anomaly).sin()
        + 0.658 * (2.0 * elongation).sin()
        + 0.214 * (2.0 * moon_anomaly).sin()
        - 0.186 * sun_anomaly.sin()
        - 0.114 * (2.0 * latitude_arg).sin();

    let latitude = 5.128 * latitude_arg.sin()
        + 0.280 * (moon_anomaly + latitude_arg).sin()
        + 0.277 * (moon_anomaly - latitude_arg).sin()
        + 0.173 * (2.0 * elongation - latitude_arg).sin();

    let distance = 385_001.0
        - 20_905.0 * moon_anomaly.cos()
        - 3_699.0 * (2.0 * elongation - moon_anomaly).cos()
        - 2_956.0 * (2.0 * elongation).cos();

    let lambda = normalize_degrees(longitude).to_radians();
    let beta = latitude.to_radians();
    let epsilon = obliquity(t).to_radians();

    let ra = (lambda.sin() * epsilon.cos() - beta.tan() * epsilon.sin()).atan2(lambda.cos());
    let dec = (beta.sin() * epsilon.cos() + beta.cos() * epsilon.sin() * lambda.sin()).asin();

    (normalize_degrees(ra.to_degrees()), dec.to_degrees(), distance)
}

/// Hour angle / declination to (azimuth from north, elevation), degrees.
fn equatorial_to_horizontal(hour_angle: f64, declination: f64, latitude: f64) -> (f64, f64) {
    let h = hour_angle.to_radians();
    let dec = declination.to_radians();
    let lat = latitude.to_radians();

    let elevation = (lat.sin() * dec.sin() + lat.cos() * dec.cos() * h.cos())
        .clamp(-1.0, 1.0)
        .asin();

    // Measured from south in Meeus' convention; shift to north
    let azimuth_from_south = h.sin().atan2(h.cos() * lat.sin() - dec.tan() * lat.cos());
    let azimuth = normalize_degrees(azimuth_from_south.to_degrees() + 180.0);

    (azimuth, elevation.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_julian_day_at_j2000() {
        let t = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_day(t) - J2000).abs() < 1e-9);
    }

    #[test]
    fn test_gmst_reference_value() {
        // Meeus example 12.a: 1987-04-10 0h UT, GMST = 13h10m46.3668s
        let t = Utc.with_ymd_and_hms(1987, 4, 10, 0, 0, 0).unwrap();
        let expected = (13.0 + 10.0 / 60.0 + 46.3668 / 3600.0) * 15.0;
        assert!((greenwich_mean_sidereal_time(julian_day(t)) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_sun_declination_at_solstice() {
        let t = Utc.with_ymd_and_hms(2024, 6, 20, 20, 51, 0).unwrap();
        let (_, dec) = sun_equatorial(julian_day(t));
        assert!((dec - 23.44).abs() < 0.02, "declination {}", dec);
    }

    #[test]
    fn test_equinox_noon_at_equator_is_overhead() {
        // Solar noon on the prime meridian is ~12:07 UTC in late March
        let t = Utc.with_ymd_and_hms(2024, 3, 20, 12, 7, 0).unwrap();
        let p = position(CelestialObject::Sun, t, GeoCoordinate::new(0.0, 0.0));
        assert!(p.elevation > 89.0, "elevation {}", p.elevation);
    }

    #[test]
    fn test_sun_rises_in_the_east_at_equinox() {
        let t = Utc.with_ymd_and_hms(2024, 3, 20, 6, 30, 0).unwrap();
        let p = position(CelestialObject::Sun, t, GeoCoordinate::new(0.0, 0.0));
        assert!((p.azimuth - 90.0).abs() < 1.0, "azimuth {}", p.azimuth);
        assert!(p.elevation > 0.0 && p.elevation < 10.0);
    }

    #[test]
    fn test_sun_below_horizon_at_midnight() {
        let t = Utc.with_ymd_and_hms(2024, 6, 21, 8, 0, 0).unwrap();
        // 01:00 local in Oregon
        let p = position(CelestialObject::Sun, t, GeoCoordinate::new(45.3736, -121.6960));
        assert!(p.elevation < -10.0);
    }

    #[test]
    fn test_moon_reference_position() {
        // Meeus example 47.a: 1992-04-12 0h TD, RA 134.69°, Dec 13.77°, 368409.7 km
        let t = Utc.with_ymd_and_hms(1992, 4, 12, 0, 0, 0).unwrap();
        let (ra, dec, distance) = moon_equatorial(julian_day(t));
        assert!((ra - 134.69).abs() < 0.5, "ra {}", ra);
        assert!((dec - 13.77).abs() < 0.5, "dec {}", dec);
        assert!((distance - 368_409.7).abs() < 1_000.0, "distance {}", distance);
    }

    #[test]
    fn test_position_is_deterministic() {
        let t = Utc.with_ymd_and_hms(2024, 9, 1, 3, 4, 5).unwrap();
        let c = GeoCoordinate::new(-33.9, 18.4);
        assert_eq!(
            position(CelestialObject::Moon, t, c),
            position(CelestialObject::Moon, t, c)
        );
    }
}
