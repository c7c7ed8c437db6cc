use thiserror::Error;

use crate::tile::TileId;

/// Failures while loading or decoding elevation tiles.
///
/// `Clone` so one failed load can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ElevationError {
    #[error("tile {tile} unavailable: {reason}")]
    TileUnavailable { tile: TileId, reason: String },

    #[error("invalid raster data: expected {expected} samples, decoded {actual}")]
    InvalidRasterData { expected: usize, actual: usize },

    #[error("unsupported raster: {0}")]
    UnsupportedRaster(String),
}

impl ElevationError {
    pub fn unavailable(tile: TileId, reason: impl ToString) -> Self {
        ElevationError::TileUnavailable {
            tile,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HorizonError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
}
