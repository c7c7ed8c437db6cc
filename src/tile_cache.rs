//! Elevation tile cache.
//!
//! Lookup order is memory, then disk, then the remote source. Concurrent
//! requests for a tile that is already loading subscribe to the load in
//! progress instead of starting another one:
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──► TileCache ──► one load task ──► disk / fetch + decode
//! caller C ─┘        ▲                                   │
//!                    └──── same result broadcast ◄───────┘
//! ```
//!
//! The memory map and in-flight table sit behind one mutex that is never
//! held across an await. Loads run in their own task, so a load finishes
//! and populates the cache even if every caller stops waiting for it.

use futures::FutureExt;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ElevationError;
use crate::fetch::{HttpTileFetcher, TileFetcher};
use crate::raster::{decode_tile, ElevationTile};
use crate::tile::{TileId, TileScheme};

type LoadResult = Result<Arc<ElevationTile>, ElevationError>;

/// Counters for monitoring cache effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub fetches: u64,
    pub coalesced: u64,
    pub failures: u64,
    pub evictions: u64,
}

/// Shared handle to a bounded, deduplicating tile cache. Cheap to clone.
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<Inner>,
}

struct Inner {
    scheme: TileScheme,
    capacity: usize,
    disk: Option<DiskStore>,
    fetcher: Arc<dyn TileFetcher>,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    tiles: HashMap<TileId, Arc<ElevationTile>>,
    // Insertion order for FIFO eviction
    order: VecDeque<TileId>,
    in_flight: HashMap<TileId, broadcast::Sender<LoadResult>>,
    stats: CacheStats,
}

impl TileCache {
    /// `disk_dir` of `None` disables the disk layer.
    pub fn new(
        scheme: TileScheme,
        capacity: usize,
        disk_dir: Option<PathBuf>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Self {
        let disk = disk_dir.map(|directory| DiskStore { directory, scheme });

        Self {
            inner: Arc::new(Inner {
                scheme,
                capacity: capacity.max(1),
                disk,
                fetcher,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let disk_dir = if config.cache.persist {
            config.cache.directory.clone()
        } else {
            None
        };

        Self::new(
            config.source.tile_scheme(),
            config.cache.memory_capacity,
            disk_dir,
            Arc::new(HttpTileFetcher::new(&config.source)),
        )
    }

    pub fn scheme(&self) -> TileScheme {
        self.inner.scheme
    }

    /// Returns the tile, loading it if needed.
    pub async fn tile(&self, id: TileId) -> LoadResult {
        let mut receiver = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;

            if let Some(tile) = state.tiles.get(&id) {
                state.stats.memory_hits += 1;
                return Ok(Arc::clone(tile));
            }

            match state.in_flight.entry(id) {
                Entry::Occupied(entry) => {
                    state.stats.coalesced += 1;
                    debug!(tile = %id, "Coalescing request with in-flight load");
                    entry.get().subscribe()
                }
                Entry::Vacant(entry) => {
                    // A single message is ever sent per load
                    let (sender, receiver) = broadcast::channel(1);
                    entry.insert(sender);
                    debug!(tile = %id, in_flight = state.in_flight.len(), "Starting tile load");
                    self.spawn_load(id);
                    receiver
                }
            }
        };

        match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(ElevationError::unavailable(
                id,
                "load finished without a result",
            )),
        }
    }

    fn spawn_load(&self, id: TileId) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(inner.load(id)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ElevationError::unavailable(id, "tile load panicked")),
            };
            inner.finish(id, result);
        });
    }

    /// Number of tiles held in memory.
    pub fn resident_count(&self) -> usize {
        self.inner.lock_state().tiles.len()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.inner.lock_state().tiles.contains_key(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_state().in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock_state().stats
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            resident = self.resident_count(),
            memory_hits = stats.memory_hits,
            disk_hits = stats.disk_hits,
            fetches = stats.fetches,
            coalesced = stats.coalesced,
            failures = stats.failures,
            evictions = stats.evictions,
            "Tile cache statistics"
        );
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self, id: TileId) -> LoadResult {
        if let Some(disk) = &self.disk {
            match disk.read(id).await {
                Ok(Some(bytes)) => match self.decode(id, bytes).await {
                    Ok(tile) => {
                        self.lock_state().stats.disk_hits += 1;
                        debug!(tile = %id, "Loaded tile from disk cache");
                        return Ok(tile);
                    }
                    Err(e) => {
                        warn!(tile = %id, error = %e, "Discarding unreadable cached tile");
                        if let Err(e) = disk.remove(id).await {
                            warn!(tile = %id, error = %e, "Failed to remove cached tile");
                        }
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(tile = %id, error = %e, "Disk cache read failed"),
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let bytes = tokio::task::spawn_blocking(move || fetcher.fetch(id))
            .await
            .map_err(|e| ElevationError::unavailable(id, e))??;
        self.lock_state().stats.fetches += 1;

        // Decode before persisting so a bad download never reaches the disk
        let tile = self.decode(id, bytes.clone()).await?;

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.write(id, &bytes).await {
                warn!(tile = %id, error = %e, "Failed to persist tile to disk cache");
            }
        }

        Ok(tile)
    }

    async fn decode(&self, id: TileId, bytes: Vec<u8>) -> LoadResult {
        let scheme = self.scheme;
        let tile = tokio::task::spawn_blocking(move || decode_tile(&bytes, id, &scheme))
            .await
            .map_err(|e| ElevationError::unavailable(id, e))??;
        Ok(Arc::new(tile))
    }

    fn finish(&self, id: TileId, result: LoadResult) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        match &result {
            Ok(tile) => {
                if state.tiles.insert(id, Arc::clone(tile)).is_none() {
                    state.order.push_back(id);
                }
                while state.tiles.len() > self.capacity {
                    let Some(oldest) = state.order.pop_front() else {
                        break;
                    };
                    state.tiles.remove(&oldest);
                    state.stats.evictions += 1;
                    debug!(tile = %oldest, "Evicted tile from memory cache");
                }
            }
            Err(e) => {
                // Not remembered: the next request for this tile tries again
                state.stats.failures += 1;
                warn!(tile = %id, error = %e, "Tile load failed");
            }
        }

        if let Some(sender) = state.in_flight.remove(&id) {
            // Nobody listening is fine; the tile is cached either way
            let _ = sender.send(result);
        }
    }
}

/// One file per tile under a cache directory.
struct DiskStore {
    directory: PathBuf,
    scheme: TileScheme,
}

impl DiskStore {
    fn path(&self, id: TileId) -> PathBuf {
        self.directory.join(self.scheme.file_name(id))
    }

    async fn read(&self, id: TileId) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, id: TileId, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path(id);
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, &path).await
    }

    async fn remove(&self, id: TileId) -> io::Result<()> {
        tokio::fs::remove_file(self.path(id)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::raster::tests::tiff_f32;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a flat raster and counts every fetch.
    pub(crate) struct CountingFetcher {
        pub calls: AtomicUsize,
        delay: Duration,
        fail_first: usize,
        elevation: f32,
    }

    impl CountingFetcher {
        pub(crate) fn new(elevation: f32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_first: 0,
                elevation,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing_first(mut self, count: usize) -> Self {
            self.fail_first = count;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileFetcher for CountingFetcher {
        fn fetch(&self, tile: TileId) -> Result<Vec<u8>, ElevationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if call < self.fail_first {
                return Err(ElevationError::unavailable(tile, "connection reset"));
            }
            Ok(tiff_f32(3, 3, &[self.elevation; 9]))
        }
    }

    fn cache_with(fetcher: Arc<CountingFetcher>, capacity: usize) -> TileCache {
        TileCache::new(TileScheme::OneDegree, capacity, None, fetcher)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher::new(120.0).with_delay(Duration::from_millis(50)));
        let cache = cache_with(Arc::clone(&fetcher), 20);
        let id = TileId::new(58, 44, 0);

        let results = join_all((0..8).map(|_| cache.tile(id))).await;

        assert_eq!(fetcher.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(cache.stats().coalesced, 7);
    }

    #[tokio::test]
    async fn test_memory_hit_skips_fetch() {
        let fetcher = Arc::new(CountingFetcher::new(10.0));
        let cache = cache_with(Arc::clone(&fetcher), 20);
        let id = TileId::new(1, 2, 0);

        cache.tile(id).await.unwrap();
        cache.tile(id).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_eviction_never_exceeds_capacity() {
        let fetcher = Arc::new(CountingFetcher::new(10.0));
        let cache = cache_with(Arc::clone(&fetcher), 2);

        for x in 0..3 {
            cache.tile(TileId::new(x, 10, 0)).await.unwrap();
            assert!(cache.resident_count() <= 2);
        }

        assert_eq!(cache.resident_count(), 2);
        // Oldest insertion goes first
        assert!(!cache.contains(TileId::new(0, 10, 0)));
        assert!(cache.contains(TileId::new(1, 10, 0)));
        assert!(cache.contains(TileId::new(2, 10, 0)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_memoized() {
        let fetcher = Arc::new(CountingFetcher::new(10.0).failing_first(1));
        let cache = cache_with(Arc::clone(&fetcher), 20);
        let id = TileId::new(3, 3, 0);

        let err = cache.tile(id).await.unwrap_err();
        assert!(matches!(err, ElevationError::TileUnavailable { .. }));
        assert!(!cache.contains(id));

        assert!(cache.tile(id).await.is_ok());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let fetcher = Arc::new(
            CountingFetcher::new(10.0)
                .failing_first(usize::MAX)
                .with_delay(Duration::from_millis(30)),
        );
        let cache = cache_with(Arc::clone(&fetcher), 20);
        let id = TileId::new(4, 4, 0);

        let results = join_all((0..3).map(|_| cache.tile(id))).await;

        assert_eq!(fetcher.calls(), 1);
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_disk_cache_serves_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let id = TileId::new(58, 44, 0);

        let first_fetcher = Arc::new(CountingFetcher::new(42.0));
        let first = TileCache::new(
            TileScheme::OneDegree,
            20,
            Some(dir.path().to_path_buf()),
            first_fetcher.clone(),
        );
        first.tile(id).await.unwrap();
        assert!(dir.path().join("N45W122.tif").exists());

        let second_fetcher = Arc::new(CountingFetcher::new(0.0).failing_first(usize::MAX));
        let second = TileCache::new(
            TileScheme::OneDegree,
            20,
            Some(dir.path().to_path_buf()),
            second_fetcher.clone(),
        );
        let tile = second.tile(id).await.unwrap();

        assert_eq!(tile.sample(1, 1), Some(42.0));
        assert_eq!(second_fetcher.calls(), 0);
        assert_eq!(second.stats().disk_hits, 1);
    }

    #[tokio::test]
    async fn test_corrupt_disk_file_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let id = TileId::new(58, 44, 0);
        std::fs::write(dir.path().join("N45W122.tif"), b"garbage").unwrap();

        let fetcher = Arc::new(CountingFetcher::new(7.0));
        let cache = TileCache::new(
            TileScheme::OneDegree,
            20,
            Some(dir.path().to_path_buf()),
            fetcher.clone(),
        );
        let tile = cache.tile(id).await.unwrap();

        assert_eq!(tile.sample(0, 0), Some(7.0));
        assert_eq!(fetcher.calls(), 1);
        let on_disk = std::fs::read(dir.path().join("N45W122.tif")).unwrap();
        assert_ne!(on_disk, b"garbage");
    }
}
