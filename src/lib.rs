//! Terrain-aware alignment of landmarks with the Sun and Moon.
//!
//! Elevation tiles are fetched, cached and sampled to answer ray/terrain
//! intersection queries and to find when an object rises or sets behind
//! the local skyline.

pub mod celestial;
pub mod config;
pub mod elevation;
pub mod error;
pub mod fetch;
pub mod geodesy;
pub mod horizon;
pub mod intersector;
pub mod observer;
pub mod raster;
pub mod tile;
pub mod tile_cache;
