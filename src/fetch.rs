//! Remote elevation tile source.

use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::ElevationError;
use crate::tile::{TileId, TileScheme};

/// Refuse bodies above this size; real terrain tiles are a few MB at most.
const MAX_TILE_BYTES: u64 = 64 * 1024 * 1024;

/// Blocking tile download. Called from a blocking worker thread by the cache.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, tile: TileId) -> Result<Vec<u8>, ElevationError>;
}

/// Fetches raster tiles over HTTP from a URL template.
///
/// The template may contain `{z}`, `{x}`, `{y}` and `{name}` (the one-degree
/// cell name such as `N45W122`).
pub struct HttpTileFetcher {
    agent: ureq::Agent,
    url_template: String,
    scheme: TileScheme,
}

impl HttpTileFetcher {
    pub fn new(config: &SourceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build();

        Self {
            agent,
            url_template: config.url_template.clone(),
            scheme: config.tile_scheme(),
        }
    }

    pub fn url_for(&self, tile: TileId) -> String {
        self.url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
            .replace("{name}", &self.scheme.cell_name(tile))
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&self, tile: TileId) -> Result<Vec<u8>, ElevationError> {
        let url = self.url_for(tile);
        debug!(tile = %tile, url = %url, "Fetching elevation tile");

        let response = self.agent.get(&url).call().map_err(|e| {
            warn!(tile = %tile, error = %e, "Elevation tile request failed");
            ElevationError::unavailable(tile, e)
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_TILE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| ElevationError::unavailable(tile, e))?;

        if bytes.is_empty() {
            return Err(ElevationError::unavailable(tile, "empty response body"));
        }

        debug!(tile = %tile, bytes = bytes.len(), "Fetched elevation tile");
        Ok(bytes)
    }
}
