use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::tile::TileScheme;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub source: SourceConfig,
    pub intersector: IntersectorConfig,
    pub horizon: HorizonConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: Option<PathBuf>,
    pub memory_capacity: usize,
    pub persist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    OneDegree,
    WebMercator,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url_template: String,
    pub scheme: SchemeKind,
    pub zoom: u8,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntersectorConfig {
    pub min_offset: f64, // meters
    pub step: f64,       // meters
    pub tolerance: f64,  // meters
    pub max_consecutive_failures: u32,
    pub steep_down_limit: f64, // Up component of the unit direction
    pub photographer_step: f64,
    pub line_of_sight_step: f64,
    pub line_of_sight_buffer: f64,
    pub photographer_search_limit: f64,
    pub photographer_fallback_distance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub sample_interval_secs: i64,
    pub band_low: f64,  // degrees
    pub band_high: f64, // degrees
    pub search_radius: f64, // meters
    pub time_tolerance_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: dirs::cache_dir().map(|dir| dir.join("sightline").join("tiles")),
            memory_capacity: 20,
            persist: true,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url_template: "https://s3.amazonaws.com/elevation-tiles-prod/geotiff/{z}/{x}/{y}.tif"
                .to_string(),
            scheme: SchemeKind::WebMercator,
            zoom: 12,
            timeout_secs: 30,
            user_agent: concat!("sightline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SourceConfig {
    pub fn tile_scheme(&self) -> TileScheme {
        match self.scheme {
            SchemeKind::OneDegree => TileScheme::OneDegree,
            SchemeKind::WebMercator => TileScheme::WebMercator { zoom: self.zoom },
        }
    }
}

impl Default for IntersectorConfig {
    fn default() -> Self {
        Self {
            min_offset: 100.0,
            step: 500.0,
            tolerance: 1.0,
            max_consecutive_failures: 10,
            steep_down_limit: -0.2,
            photographer_step: 100.0,
            line_of_sight_step: 50.0,
            line_of_sight_buffer: 2.0,
            photographer_search_limit: 5_000.0,
            photographer_fallback_distance: 1_000.0,
        }
    }
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 300,
            band_low: -5.0,
            band_high: 10.0,
            search_radius: 30_000.0,
            time_tolerance_secs: 1,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.memory_capacity, 20);
        assert_eq!(config.intersector.step, 500.0);
        assert_eq!(config.intersector.max_consecutive_failures, 10);
        assert_eq!(config.horizon.sample_interval_secs, 300);
        assert_eq!(
            config.source.tile_scheme(),
            TileScheme::WebMercator { zoom: 12 }
        );
    }

    #[test]
    fn test_partial_sections_override() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            memory_capacity = 4
            persist = false

            [source]
            scheme = "one_degree"
            url_template = "https://dem.example.com/{name}.tif"

            [horizon]
            search_radius = 15000.0
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.memory_capacity, 4);
        assert!(!config.cache.persist);
        assert_eq!(config.source.tile_scheme(), TileScheme::OneDegree);
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.horizon.search_radius, 15_000.0);
        assert_eq!(config.horizon.band_high, 10.0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.toml");
        std::fs::write(&path, "[intersector]\nstep = 250.0\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.intersector.step, 250.0);
        assert_eq!(config.intersector.min_offset, 100.0);
    }
}
