//! Elevation raster decoding.
//!
//! TIFF rasters are decoded directly and dispatched on their sample type
//! (32-bit float, 16-bit signed, 8-bit unsigned and every other integer or
//! float width). Anything that is not a TIFF goes through `image` and is
//! re-rastered to grayscale.

use image::DynamicImage;
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, warn};

use crate::error::ElevationError;
use crate::geodesy::{bilinear, GeoCoordinate};
use crate::tile::{TileId, TileScheme};

/// Samples below this are "no data" (deeper than any ocean trench).
const NO_DATA_FLOOR: f32 = -12_000.0;

/// A decoded elevation raster. Immutable once built.
#[derive(Debug, Clone)]
pub struct ElevationTile {
    pub id: TileId,
    pub width: u32,
    pub height: u32,
    pub origin: GeoCoordinate, // north-west corner
    pub cell_lat: f64,         // degrees per row
    pub cell_lon: f64,         // degrees per column
    samples: Vec<f32>,         // row-major, row 0 is north
}

impl ElevationTile {
    pub fn new(
        id: TileId,
        width: u32,
        height: u32,
        origin: GeoCoordinate,
        cell_lat: f64,
        cell_lon: f64,
        samples: Vec<f32>,
    ) -> Result<Self, ElevationError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected || expected == 0 {
            return Err(ElevationError::InvalidRasterData {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            id,
            width,
            height,
            origin,
            cell_lat,
            cell_lon,
            samples,
        })
    }

    /// Raw sample in meters, `None` for no-data or out-of-range indices.
    pub fn sample(&self, row: u32, col: u32) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let value = self.samples[row as usize * self.width as usize + col as usize];
        if !value.is_finite() || value < NO_DATA_FLOOR {
            return None;
        }
        Some(value as f64)
    }

    /// Bilinearly interpolated elevation. Positions past the last row or
    /// column clamp to the edge samples.
    pub fn elevation_at(&self, coordinate: GeoCoordinate) -> Option<f64> {
        let fx = (coordinate.longitude - self.origin.longitude) / self.cell_lon;
        let fy = (self.origin.latitude - coordinate.latitude) / self.cell_lat;
        if !fx.is_finite() || !fy.is_finite() {
            return None;
        }

        let (col0, col1, tx) = bracket(fx, self.width);
        let (row0, row1, ty) = bracket(fy, self.height);

        let v00 = self.sample(row0, col0)?;
        let v10 = self.sample(row0, col1)?;
        let v01 = self.sample(row1, col0)?;
        let v11 = self.sample(row1, col1)?;

        Some(bilinear(v00, v10, v01, v11, tx, ty))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// Lower index, upper index and fraction between them for a fractional position.
fn bracket(position: f64, len: u32) -> (u32, u32, f64) {
    let last = len.saturating_sub(1) as f64;
    let clamped = position.clamp(0.0, last);
    let lower = clamped.floor();
    let fraction = clamped - lower;
    // Exactly on a sample: don't let a zero-weight neighbour veto the result
    let upper = if fraction == 0.0 {
        lower
    } else {
        (lower + 1.0).min(last)
    };
    (lower as u32, upper as u32, fraction)
}

/// Decodes downloaded raster bytes into an [`ElevationTile`] for `id`.
pub fn decode_tile(
    bytes: &[u8],
    id: TileId,
    scheme: &TileScheme,
) -> Result<ElevationTile, ElevationError> {
    let (width, height, samples) = match decode_tiff(bytes) {
        Ok(decoded) => decoded,
        Err(tiff_error) => {
            debug!(tile = %id, error = %tiff_error, "Falling back to generic raster decode");
            decode_generic(bytes).map_err(|generic_error| {
                ElevationError::UnsupportedRaster(format!(
                    "tiff: {}; generic: {}",
                    tiff_error, generic_error
                ))
            })?
        }
    };

    if scheme.width_mismatch(width) {
        warn!(
            tile = %id,
            width,
            scheme = ?scheme,
            "Raster width is unusual for the configured tiling scheme"
        );
    }

    let origin = scheme.north_west_corner(id);
    let (cell_lat, cell_lon) = scheme.cell_size(id, width, height);

    ElevationTile::new(id, width, height, origin, cell_lat, cell_lon, samples)
}

fn decode_tiff(bytes: &[u8]) -> Result<(u32, u32, Vec<f32>), String> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let image = decoder.read_image().map_err(|e| e.to_string())?;

    // Sample values are meters as stored; no scale factor is applied
    let samples = match image {
        DecodingResult::F32(data) => data,
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
    };

    Ok((width, height, samples))
}

fn decode_generic(bytes: &[u8]) -> Result<(u32, u32, Vec<f32>), String> {
    let image = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let (width, height) = (image.width(), image.height());

    let samples = match image {
        DynamicImage::ImageLuma8(img) => img.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLuma16(img) => img.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageRgb32F(img) => img.pixels().map(|p| p.0[0]).collect(),
        DynamicImage::ImageRgba32F(img) => img.pixels().map(|p| p.0[0]).collect(),
        other => other.to_luma8().into_raw().into_iter().map(f32::from).collect(),
    };

    Ok((width, height, samples))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat};
    use tiff::encoder::{colortype, TiffEncoder};

    pub(crate) fn tiff_f32(width: u32, height: u32, data: &[f32]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::Gray32Float>(width, height, data)
            .unwrap();
        cursor.into_inner()
    }

    fn tiff_i16(width: u32, height: u32, data: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::GrayI16>(width, height, data)
            .unwrap();
        cursor.into_inner()
    }

    fn tiff_u8(width: u32, height: u32, data: &[u8]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::Gray8>(width, height, data)
            .unwrap();
        cursor.into_inner()
    }

    // N45W122: north-west corner at (46, -122), cells of half a degree
    fn hood_tile() -> TileId {
        TileScheme::OneDegree.tile_for(GeoCoordinate::new(45.5, -121.5))
    }

    #[test]
    fn test_decode_f32_and_interpolate() {
        let data = [
            100.0, 200.0, 300.0, //
            400.0, 500.0, 600.0, //
            700.0, 800.0, 900.0,
        ];
        let bytes = tiff_f32(3, 3, &data);
        let tile = decode_tile(&bytes, hood_tile(), &TileScheme::OneDegree).unwrap();

        assert_eq!((tile.width, tile.height), (3, 3));
        assert_eq!(tile.origin, GeoCoordinate::new(46.0, -122.0));
        assert!((tile.cell_lat - 0.5).abs() < 1e-12);

        // Corners and center
        let nw = tile.elevation_at(GeoCoordinate::new(46.0, -122.0)).unwrap();
        let se = tile.elevation_at(GeoCoordinate::new(45.0, -121.0)).unwrap();
        let center = tile.elevation_at(GeoCoordinate::new(45.5, -121.5)).unwrap();
        assert!((nw - 100.0).abs() < 1e-6);
        assert!((se - 900.0).abs() < 1e-6);
        assert!((center - 500.0).abs() < 1e-6);

        // Halfway between the two top-left samples
        let between = tile.elevation_at(GeoCoordinate::new(46.0, -121.75)).unwrap();
        assert!((between - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_i16_with_void() {
        let data = [10, 20, 30, 40, -32768, 60, 70, 80, 90];
        let bytes = tiff_i16(3, 3, &data);
        let tile = decode_tile(&bytes, hood_tile(), &TileScheme::OneDegree).unwrap();

        assert_eq!(tile.sample(0, 0), Some(10.0));
        assert_eq!(tile.sample(1, 1), None);
        // Every cell around the center touches the void sample
        assert_eq!(tile.elevation_at(GeoCoordinate::new(45.75, -121.75)), None);
        assert_eq!(tile.elevation_at(GeoCoordinate::new(46.0, -122.0)), Some(10.0));
    }

    #[test]
    fn test_decode_u8() {
        let bytes = tiff_u8(2, 2, &[0, 50, 100, 250]);
        let tile = decode_tile(&bytes, hood_tile(), &TileScheme::OneDegree).unwrap();
        assert_eq!(tile.sample(1, 1), Some(250.0));
        assert!((tile.cell_lon - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_wide_integer_samples() {
        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::Gray32>(2, 2, &[0u32, 1200, 2400, 4392])
            .unwrap();
        let tile = decode_tile(&cursor.into_inner(), hood_tile(), &TileScheme::OneDegree).unwrap();
        assert_eq!(tile.sample(1, 1), Some(4392.0));

        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::GrayI8>(2, 2, &[-5i8, 0, 5, 10])
            .unwrap();
        let tile = decode_tile(&cursor.into_inner(), hood_tile(), &TileScheme::OneDegree).unwrap();
        assert_eq!(tile.sample(0, 0), Some(-5.0));
        assert_eq!(tile.sample(1, 0), Some(5.0));
    }

    #[test]
    fn test_png_goes_through_generic_path() {
        let img = GrayImage::from_raw(2, 2, vec![5, 6, 7, 8]).unwrap();
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();

        let tile =
            decode_tile(&cursor.into_inner(), hood_tile(), &TileScheme::OneDegree).unwrap();
        assert_eq!(tile.sample(0, 1), Some(6.0));
        assert_eq!(tile.sample(1, 0), Some(7.0));
    }

    #[test]
    fn test_sample_count_mismatch_is_invalid() {
        let mut cursor = Cursor::new(Vec::new());
        TiffEncoder::new(&mut cursor)
            .unwrap()
            .write_image::<colortype::RGB8>(2, 2, &[0u8; 12])
            .unwrap();

        let err = decode_tile(&cursor.into_inner(), hood_tile(), &TileScheme::OneDegree)
            .unwrap_err();
        assert_eq!(
            err,
            ElevationError::InvalidRasterData {
                expected: 4,
                actual: 12
            }
        );
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let err = decode_tile(b"not a raster", hood_tile(), &TileScheme::OneDegree).unwrap_err();
        assert!(matches!(err, ElevationError::UnsupportedRaster(_)));
    }

    #[test]
    fn test_web_mercator_cell_size_from_neighbours() {
        let scheme = TileScheme::WebMercator { zoom: 10 };
        let id = scheme.tile_for(GeoCoordinate::new(45.3736, -121.6960));
        let bytes = tiff_f32(4, 4, &[1.0; 16]);
        let tile = decode_tile(&bytes, id, &scheme).unwrap();

        let east = scheme.north_west_corner(TileId::new(id.x + 1, id.y, id.zoom));
        assert!((tile.origin.longitude + 4.0 * tile.cell_lon - east.longitude).abs() < 1e-9);
        assert_eq!(
            tile.elevation_at(GeoCoordinate::new(45.3736, -121.6960)),
            Some(1.0)
        );
    }
}
