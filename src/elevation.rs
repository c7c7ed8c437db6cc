//! Point and batched elevation queries on top of the tile cache.

use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::geodesy::GeoCoordinate;
use crate::tile::TileId;
use crate::tile_cache::TileCache;

/// Anything that can answer "how high is the ground here".
///
/// `None` means the elevation is unavailable (no data or a failed tile load);
/// it is never an error for callers.
pub trait ElevationSource: Send + Sync {
    fn elevation(&self, coordinate: GeoCoordinate) -> impl Future<Output = Option<f64>> + Send;
}

impl<T: ElevationSource> ElevationSource for &T {
    fn elevation(&self, coordinate: GeoCoordinate) -> impl Future<Output = Option<f64>> + Send {
        (**self).elevation(coordinate)
    }
}

impl<T: ElevationSource> ElevationSource for Arc<T> {
    fn elevation(&self, coordinate: GeoCoordinate) -> impl Future<Output = Option<f64>> + Send {
        (**self).elevation(coordinate)
    }
}

/// Bilinear elevation lookups backed by a [`TileCache`].
#[derive(Clone)]
pub struct ElevationService {
    cache: TileCache,
}

impl ElevationService {
    pub fn new(cache: TileCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Elevation in meters at `coordinate`, or `None` when unavailable.
    pub async fn elevation(&self, coordinate: GeoCoordinate) -> Option<f64> {
        let id = self.cache.scheme().tile_for(coordinate);
        match self.cache.tile(id).await {
            Ok(tile) => tile.elevation_at(coordinate),
            Err(e) => {
                debug!(tile = %id, error = %e, "Elevation unavailable");
                None
            }
        }
    }

    /// Elevations for many coordinates, in input order.
    ///
    /// Each distinct tile is loaded once; a failed tile only blanks the
    /// coordinates that fall inside it.
    pub async fn elevations(&self, coordinates: &[GeoCoordinate]) -> Vec<Option<f64>> {
        let scheme = self.cache.scheme();

        let mut groups: HashMap<TileId, Vec<usize>> = HashMap::new();
        for (index, coordinate) in coordinates.iter().enumerate() {
            groups
                .entry(scheme.tile_for(*coordinate))
                .or_default()
                .push(index);
        }

        let loads = groups.iter().map(|(id, _)| self.cache.tile(*id));
        let tiles = join_all(loads).await;

        let mut results = vec![None; coordinates.len()];
        for ((id, indices), tile) in groups.iter().zip(tiles) {
            match tile {
                Ok(tile) => {
                    for &index in indices {
                        results[index] = tile.elevation_at(coordinates[index]);
                    }
                }
                Err(e) => {
                    debug!(
                        tile = %id,
                        points = indices.len(),
                        error = %e,
                        "Batch elevations unavailable for tile"
                    );
                }
            }
        }

        results
    }
}

impl ElevationSource for ElevationService {
    fn elevation(&self, coordinate: GeoCoordinate) -> impl Future<Output = Option<f64>> + Send {
        ElevationService::elevation(self, coordinate)
    }
}
