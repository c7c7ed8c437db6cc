use crate::elevation::ElevationSource;
use crate::geodesy::GeoCoordinate;

#[derive(Debug, Clone, PartialEq)]
pub struct Observer {
    pub name: String,
    pub coordinate: GeoCoordinate,
    pub elevation: f64, // meters above sea level, eye height included
}

impl Observer {
    pub fn new(name: String, lat: f64, lon: f64, elevation: f64) -> Self {
        Self {
            name,
            coordinate: GeoCoordinate::new(lat, lon),
            elevation,
        }
    }

    /// Builds an observer, looking the ground up when `elevation` is unknown.
    ///
    /// `eye_height` is added to a looked-up ground elevation only. Missing
    /// terrain data falls back to sea level.
    pub async fn resolve<E: ElevationSource>(
        name: String,
        coordinate: GeoCoordinate,
        elevation: Option<f64>,
        eye_height: f64,
        source: &E,
    ) -> Self {
        let elevation = match elevation {
            Some(elevation) => elevation,
            None => source.elevation(coordinate).await.unwrap_or(0.0) + eye_height,
        };

        Self {
            name,
            coordinate,
            elevation,
        }
    }
}
