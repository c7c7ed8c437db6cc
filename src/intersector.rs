//! Ray / terrain intersection.
//!
//! Rays live in the local ENU tangent plane of their origin. They are marched
//! in coarse steps until the ray dips to or below the ground, then the
//! crossing is bisected down to the configured tolerance.

use nalgebra::Vector3;
use tracing::{debug, trace};

use crate::celestial::ObjectPosition;
use crate::config::IntersectorConfig;
use crate::elevation::ElevationSource;
use crate::geodesy::{
    az_alt_to_enu, bearing, destination, distance, enu_offset_to_coordinate, normalize_degrees,
    GeoCoordinate,
};
use crate::observer::Observer;

/// Where a ray met the ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub coordinate: GeoCoordinate,
    pub distance: f64,            // meters along the ray
    pub horizontal_distance: f64, // meters over the ground
    pub ray_elevation: f64,
    pub terrain_elevation: f64,
}

/// Highest terrain elevation angle along one azimuth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonPoint {
    pub angle: f64, // degrees, 0 when nothing rises above eye level
    pub coordinate: Option<GeoCoordinate>,
    pub distance: Option<f64>,
    pub terrain_elevation: Option<f64>,
}

impl HorizonPoint {
    fn open() -> Self {
        Self {
            angle: 0.0,
            coordinate: None,
            distance: None,
            terrain_elevation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotographerPosition {
    pub coordinate: GeoCoordinate,
    pub distance: f64, // meters from the POI
    pub ground_elevation: Option<f64>,
    pub clear_line_of_sight: bool,
}

/// Per-cast state. Never outlives one `cast_ray` call.
struct RayState {
    origin: GeoCoordinate,
    origin_elevation: f64,
    direction: Vector3<f64>, // unit length
    distance: f64,
    last_above: f64,
}

impl RayState {
    /// Ground position and ray elevation at `t` meters along the ray.
    fn at(&self, t: f64) -> (GeoCoordinate, f64) {
        let offset = self.direction * t;
        let coordinate = enu_offset_to_coordinate(&offset, self.origin);
        (coordinate, self.origin_elevation + self.direction.z * t)
    }

    fn horizontal_fraction(&self) -> f64 {
        self.direction.x.hypot(self.direction.y)
    }
}

pub struct TerrainIntersector<E> {
    source: E,
    config: IntersectorConfig,
}

impl<E: ElevationSource> TerrainIntersector<E> {
    pub fn new(source: E, config: IntersectorConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &E {
        &self.source
    }

    pub fn config(&self) -> &IntersectorConfig {
        &self.config
    }

    /// First ground coordinate hit by a ray from `poi`, if any.
    pub async fn intersect_ray(
        &self,
        poi: GeoCoordinate,
        poi_elevation: f64,
        direction: Vector3<f64>,
        max_distance: f64,
    ) -> Option<GeoCoordinate> {
        self.cast_ray(poi, poi_elevation, direction, max_distance)
            .await
            .map(|hit| hit.coordinate)
    }

    /// Like [`Self::intersect_ray`] but reports distances and elevations too.
    ///
    /// `None` covers both "no crossing within `max_distance`" and "ran out of
    /// elevation data".
    pub async fn cast_ray(
        &self,
        poi: GeoCoordinate,
        poi_elevation: f64,
        direction: Vector3<f64>,
        max_distance: f64,
    ) -> Option<RayHit> {
        let norm = direction.norm();
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        let direction = direction / norm;

        if direction.z < self.config.steep_down_limit {
            debug!(up = direction.z, "Ray points steeply underground, skipping march");
            return None;
        }

        // A first sample already under ground is reported at min_offset,
        // never closer to the POI
        let mut state = RayState {
            origin: poi,
            origin_elevation: poi_elevation,
            direction,
            distance: self.config.min_offset,
            last_above: self.config.min_offset,
        };
        let step = self.config.step.max(1.0);
        let mut failures = 0;

        while state.distance <= max_distance {
            let (coordinate, ray_elevation) = state.at(state.distance);

            match self.source.elevation(coordinate).await {
                None => {
                    failures += 1;
                    if failures >= self.config.max_consecutive_failures {
                        debug!(
                            distance = state.distance,
                            failures, "Left elevation coverage, giving up on ray"
                        );
                        return None;
                    }
                }
                Some(terrain) => {
                    failures = 0;
                    if ray_elevation <= terrain {
                        let hit = self
                            .refine(&state, state.last_above, state.distance, terrain)
                            .await;
                        trace!(distance = hit.distance, "Ray hit terrain");
                        return Some(hit);
                    }
                    state.last_above = state.distance;
                }
            }

            state.distance += step;
        }

        None
    }

    // Bisects [above, below] until it is no wider than the tolerance.
    async fn refine(
        &self,
        state: &RayState,
        mut above: f64,
        mut below: f64,
        mut below_terrain: f64,
    ) -> RayHit {
        let tolerance = self.config.tolerance.max(1e-3);

        while below - above > tolerance {
            let mid = (above + below) / 2.0;
            let (coordinate, ray_elevation) = state.at(mid);

            match self.source.elevation(coordinate).await {
                Some(terrain) if ray_elevation <= terrain => {
                    below = mid;
                    below_terrain = terrain;
                }
                // Missing data counts as clear air
                _ => above = mid,
            }
        }

        let (coordinate, ray_elevation) = state.at(above);
        RayHit {
            coordinate,
            distance: above,
            horizontal_distance: above * state.horizontal_fraction(),
            ray_elevation,
            terrain_elevation: below_terrain,
        }
    }

    /// Highest terrain elevation angle seen from `observer` along `azimuth`
    /// within `radius` meters.
    ///
    /// A level ray is cast first; if it reaches `radius` without touching
    /// ground, nothing rises above eye level and the angle is 0°. Otherwise
    /// the profile beyond the first contact is scanned for the steepest point.
    pub async fn horizon_angle(&self, observer: &Observer, azimuth: f64, radius: f64) -> HorizonPoint {
        let level = az_alt_to_enu(azimuth, 0.0);
        let Some(hit) = self
            .cast_ray(observer.coordinate, observer.elevation, level, radius)
            .await
        else {
            return HorizonPoint::open();
        };

        let angle_to = |terrain: f64, d: f64| (terrain - observer.elevation).atan2(d).to_degrees();

        let mut best = HorizonPoint {
            angle: angle_to(hit.terrain_elevation, hit.horizontal_distance),
            coordinate: Some(hit.coordinate),
            distance: Some(hit.horizontal_distance),
            terrain_elevation: Some(hit.terrain_elevation),
        };

        let step = self.config.step.max(1.0);
        let mut d = hit.horizontal_distance + step;
        let mut failures = 0;
        while d <= radius {
            let coordinate = destination(observer.coordinate, azimuth, d);
            match self.source.elevation(coordinate).await {
                Some(terrain) => {
                    failures = 0;
                    let angle = angle_to(terrain, d);
                    if angle > best.angle {
                        best = HorizonPoint {
                            angle,
                            coordinate: Some(coordinate),
                            distance: Some(d),
                            terrain_elevation: Some(terrain),
                        };
                    }
                }
                None => {
                    failures += 1;
                    if failures >= self.config.max_consecutive_failures {
                        break;
                    }
                }
            }
            d += step;
        }

        if best.angle <= 0.0 {
            return HorizonPoint::open();
        }
        self.sharpen_peak(observer, azimuth, radius, best, step).await
    }

    // Resamples ever finer grids around the steepest profile sample until the
    // spacing drops to the tolerance.
    async fn sharpen_peak(
        &self,
        observer: &Observer,
        azimuth: f64,
        radius: f64,
        mut best: HorizonPoint,
        step: f64,
    ) -> HorizonPoint {
        const DIVISIONS: i32 = 5;
        let tolerance = self.config.tolerance.max(1e-3);
        let mut span = step;

        while span > tolerance {
            let Some(center) = best.distance else {
                break;
            };
            let fine = span / DIVISIONS as f64;

            for k in -DIVISIONS..=DIVISIONS {
                let d = center + k as f64 * fine;
                if k == 0 || d <= 0.0 || d > radius {
                    continue;
                }
                let coordinate = destination(observer.coordinate, azimuth, d);
                if let Some(terrain) = self.source.elevation(coordinate).await {
                    let angle = (terrain - observer.elevation).atan2(d).to_degrees();
                    if angle > best.angle {
                        best = HorizonPoint {
                            angle,
                            coordinate: Some(coordinate),
                            distance: Some(d),
                            terrain_elevation: Some(terrain),
                        };
                    }
                }
            }

            span = fine;
        }

        best
    }

    /// Where to stand so the POI lines up against `object`.
    ///
    /// Walks away from the POI on the side opposite the object and returns
    /// the first spot with a clear view of it. Falls back to a fixed distance
    /// when nothing within the search limit has line of sight.
    pub async fn photographer_position(
        &self,
        poi: GeoCoordinate,
        poi_elevation: f64,
        object: &ObjectPosition,
    ) -> PhotographerPosition {
        let away = normalize_degrees(object.azimuth + 180.0);
        let step = self.config.photographer_step.max(1.0);

        let mut d = step;
        while d <= self.config.photographer_search_limit {
            let candidate = destination(poi, away, d);
            if let Some(ground) = self.source.elevation(candidate).await {
                if self
                    .has_line_of_sight(candidate, ground, poi, poi_elevation)
                    .await
                {
                    debug!(distance = d, "Found photographer position with clear sight");
                    return PhotographerPosition {
                        coordinate: candidate,
                        distance: d,
                        ground_elevation: Some(ground),
                        clear_line_of_sight: true,
                    };
                }
            }
            d += step;
        }

        let fallback = self.config.photographer_fallback_distance;
        let coordinate = destination(poi, away, fallback);
        debug!(distance = fallback, "No clear photographer position, projecting");
        PhotographerPosition {
            coordinate,
            distance: fallback,
            ground_elevation: self.source.elevation(coordinate).await,
            clear_line_of_sight: false,
        }
    }

    /// Samples the ground between two points; blocked when terrain pokes more
    /// than the buffer above the straight sight line. Unknown ground is ignored.
    pub async fn has_line_of_sight(
        &self,
        from: GeoCoordinate,
        from_elevation: f64,
        to: GeoCoordinate,
        to_elevation: f64,
    ) -> bool {
        let total = distance(from, to);
        let step = self.config.line_of_sight_step.max(1.0);
        let samples = (total / step).ceil() as usize;
        if samples < 2 {
            return true;
        }
        let heading = bearing(from, to);

        for i in 1..samples {
            let fraction = i as f64 / samples as f64;
            let point = destination(from, heading, total * fraction);
            let sight_line = from_elevation + (to_elevation - from_elevation) * fraction;

            if let Some(terrain) = self.source.elevation(point).await {
                if terrain > sight_line + self.config.line_of_sight_buffer {
                    return false;
                }
            }
        }

        true
    }
}
