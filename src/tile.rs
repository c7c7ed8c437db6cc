//! Elevation tile addressing.
//!
//! Two grids are supported: a one-degree geographic grid (SRTM / Copernicus
//! style, one file per integer degree cell) and the Web Mercator slippy-map
//! grid used by most terrain tile servers.

use std::f64::consts::PI;
use std::fmt;

use crate::geodesy::{normalize_longitude, GeoCoordinate};

/// Web Mercator valid latitude range
pub const MERCATOR_MAX_LAT: f64 = 85.05112878;

/// Highest supported Web Mercator zoom
pub const MAX_ZOOM: u8 = 20;

/// Raster widths that only appear in one-degree products (1", 3" and 30m grids).
const ONE_DEGREE_WIDTHS: [u32; 4] = [1201, 3600, 3601, 1801];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub x: u32, // column, 0 at the west edge
    pub y: u32, // row, 0 at the north edge
    pub zoom: u8,
}

impl TileId {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileScheme {
    /// 360 x 180 grid of one-degree cells. Tiles carry zoom 0.
    OneDegree,
    /// Web Mercator at a fixed zoom level.
    WebMercator { zoom: u8 },
}

impl TileScheme {
    /// Tile containing `coordinate`.
    pub fn tile_for(&self, coordinate: GeoCoordinate) -> TileId {
        let lon = normalize_longitude(coordinate.longitude);

        match *self {
            TileScheme::OneDegree => {
                let x = ((lon + 180.0).floor() as i64).clamp(0, 359) as u32;
                let y = ((90.0 - coordinate.latitude).floor() as i64).clamp(0, 179) as u32;
                TileId::new(x, y, 0)
            }
            TileScheme::WebMercator { zoom } => {
                let zoom = zoom.min(MAX_ZOOM);
                let n = 2f64.powi(zoom as i32);
                let max_index = (n as i64) - 1;

                let lat = coordinate.latitude.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
                let lat_rad = lat.to_radians();

                let x = (((lon + 180.0) / 360.0 * n).floor() as i64).clamp(0, max_index);
                let y = (((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor() as i64)
                    .clamp(0, max_index);

                TileId::new(x as u32, y as u32, zoom)
            }
        }
    }

    /// North-west corner of a tile.
    ///
    /// Indices one past the last row/column are accepted so the east and
    /// south neighbours of edge tiles still resolve to the grid boundary.
    pub fn north_west_corner(&self, tile: TileId) -> GeoCoordinate {
        match *self {
            TileScheme::OneDegree => GeoCoordinate {
                latitude: 90.0 - tile.y as f64,
                longitude: tile.x as f64 - 180.0,
            },
            TileScheme::WebMercator { .. } => {
                let n = 2f64.powi(tile.zoom as i32);
                let lon = tile.x as f64 / n * 360.0 - 180.0;
                let lat_rad = (PI * (1.0 - 2.0 * tile.y as f64 / n)).sinh().atan();
                // Not normalized: the east edge of the last column is +180.
                GeoCoordinate {
                    latitude: lat_rad.to_degrees(),
                    longitude: lon,
                }
            }
        }
    }

    /// Angular size of one raster cell as `(latitude_span, longitude_span)`.
    ///
    /// One-degree rasters share their edge samples with the neighbours, so a
    /// 3601-wide raster has 3600 intervals. Web Mercator rasters span the
    /// distance to the adjacent east/south tile corners.
    pub fn cell_size(&self, tile: TileId, width: u32, height: u32) -> (f64, f64) {
        match *self {
            TileScheme::OneDegree => {
                let rows = height.saturating_sub(1).max(1) as f64;
                let cols = width.saturating_sub(1).max(1) as f64;
                (1.0 / rows, 1.0 / cols)
            }
            TileScheme::WebMercator { .. } => {
                let nw = self.north_west_corner(tile);
                let east = self.north_west_corner(TileId::new(tile.x + 1, tile.y, tile.zoom));
                let south = self.north_west_corner(TileId::new(tile.x, tile.y + 1, tile.zoom));
                (
                    (nw.latitude - south.latitude) / height.max(1) as f64,
                    (east.longitude - nw.longitude) / width.max(1) as f64,
                )
            }
        }
    }

    /// Disk cache file name for a tile.
    pub fn file_name(&self, tile: TileId) -> String {
        match self {
            TileScheme::OneDegree => format!("{}.tif", self.cell_name(tile)),
            TileScheme::WebMercator { .. } => format!("{}_{}_{}.tif", tile.zoom, tile.x, tile.y),
        }
    }

    /// Conventional cell name, e.g. `N45W122` for one-degree tiles.
    /// Web Mercator tiles use `z-x-y`.
    pub fn cell_name(&self, tile: TileId) -> String {
        match self {
            TileScheme::OneDegree => {
                // The cell's south-west corner names it
                let south = 89 - tile.y as i32;
                let west = tile.x as i32 - 180;
                format!(
                    "{}{:02}{}{:03}",
                    if south >= 0 { 'N' } else { 'S' },
                    south.abs(),
                    if west >= 0 { 'E' } else { 'W' },
                    west.abs()
                )
            }
            TileScheme::WebMercator { .. } => format!("{}-{}-{}", tile.zoom, tile.x, tile.y),
        }
    }

    /// Whether a raster of this width looks like it came from the other grid.
    pub fn width_mismatch(&self, width: u32) -> bool {
        let one_degree_width = ONE_DEGREE_WIDTHS.contains(&width);
        match self {
            TileScheme::OneDegree => !one_degree_width,
            TileScheme::WebMercator { .. } => one_degree_width,
        }
    }
}

impl Default for TileScheme {
    fn default() -> Self {
        TileScheme::WebMercator { zoom: 12 }
    }
}
