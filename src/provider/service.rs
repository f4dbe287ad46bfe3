use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{TerrainError, TerrainResult};
use crate::heightmap::upsample::UpsampleJob;
use crate::heightmap::HeightmapTile;
use crate::provider::cache::CacheStats;
use crate::provider::packet::PackedTileDecoder;
use crate::provider::{FetchError, PacketDecoder, ProviderConfig, TerrainCache, TileFetcher};
use crate::quadtree::{QuadPath, Resolution, TileDirectory, TileOrigin, TileOriginResolver};

/// One settled-or-pending fetch outcome, shared by every waiter.
type SharedOutcome = Shared<BoxFuture<'static, Result<(), TerrainError>>>;

struct InFlightFetch {
    id: u64,
    outcome: SharedOutcome,
}

/// Removes the in-flight entry however its fetch settles, including when
/// the fetch future is dropped mid-flight.
struct InFlightCleanup {
    map: Weak<DashMap<QuadPath, InFlightFetch>>,
    key: QuadPath,
    id: u64,
}

impl Drop for InFlightCleanup {
    fn drop(&mut self) {
        if let Some(map) = self.map.upgrade() {
            map.remove_if(&self.key, |_, fetch| fetch.id == self.id);
        }
    }
}

/// The terrain request coordinator.
///
/// Owns the decoded-buffer cache, the origin state machine, and the
/// in-flight map; everything is torn down with the service. For one stored
/// node at most one fetch+decode is ever in flight: concurrent requesters
/// attach to the same shared outcome, so siblings whose data arrives in one
/// packed response never trigger duplicate fetches. Unrelated nodes proceed
/// independently and may complete in any order.
pub struct TerrainService {
    config: ProviderConfig,
    resolver: Arc<TileOriginResolver>,
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn PacketDecoder>,
    cache: Arc<TerrainCache>,
    in_flight: Arc<DashMap<QuadPath, InFlightFetch>>,
    next_fetch_id: AtomicU64,
}

impl TerrainService {
    pub fn new(
        config: ProviderConfig,
        directory: Arc<dyn TileDirectory>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> TerrainResult<Self> {
        Self::with_decoder(config, directory, fetcher, Arc::new(PackedTileDecoder))
    }

    pub fn with_decoder(
        config: ProviderConfig,
        directory: Arc<dyn TileDirectory>,
        fetcher: Arc<dyn TileFetcher>,
        decoder: Arc<dyn PacketDecoder>,
    ) -> TerrainResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: Arc::new(TerrainCache::with_ttl(config.cache_ttl())),
            resolver: Arc::new(TileOriginResolver::new(directory)),
            fetcher,
            decoder,
            in_flight: Arc::new(DashMap::new()),
            next_fetch_id: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current origin state of a tile.
    pub fn tile_origin(&self, x: u32, y: u32, level: u32) -> TileOrigin {
        self.resolver.origin(&QuadPath::from_tile(x, y, level))
    }

    /// Fetches, decodes, and materializes terrain for one tile.
    pub async fn request_tile(
        &self,
        x: u32,
        y: u32,
        level: u32,
    ) -> TerrainResult<HeightmapTile> {
        self.request_path(QuadPath::from_tile(x, y, level)).await
    }

    async fn request_path(&self, path: QuadPath) -> TerrainResult<HeightmapTile> {
        let (target, version) = match self.resolver.resolve(&path) {
            Resolution::NotAvailable => {
                log::debug!("terrain for tile {path} is not available");
                return Err(TerrainError::NotAvailable {
                    path: path.to_string(),
                });
            }
            Resolution::SyntheticFlat => {
                log::debug!("no stored terrain above tile {path}, serving flat tile");
                return self.flat_tile();
            }
            Resolution::Fetch {
                target, version, ..
            } => (target, version),
        };

        // A previously fetched packet may already hold this tile's buffer.
        if let Some(buffer) = self.cache.get(&path) {
            if self.resolver.origin(&path) == TileOrigin::Unknown {
                self.resolver.mark(&path, TileOrigin::Inherited);
            }
            return self.materialize(&path, buffer);
        }
        self.cache.tidy();

        let outcome = self.attach_fetch(&target, version)?;
        match outcome.await {
            Ok(()) => {}
            Err(TerrainError::Cancelled { .. }) => {
                // No state mutation: a retry may still succeed
                return Err(TerrainError::Cancelled {
                    path: path.to_string(),
                });
            }
            Err(error) => {
                if self.config.demote_on_failure {
                    self.resolver.mark(&path, TileOrigin::Missing);
                }
                return Err(error);
            }
        }

        match self.cache.get(&path) {
            Some(buffer) => self.materialize(&path, buffer),
            None => {
                // The packet settled without carrying this node
                self.resolver.mark(&path, TileOrigin::Missing);
                Err(TerrainError::NotAvailable {
                    path: path.to_string(),
                })
            }
        }
    }

    /// Resamples a child grid from a materialized parent, off the
    /// scheduler thread.
    pub async fn upsample_tile(
        &self,
        parent: &HeightmapTile,
        x: u32,
        y: u32,
        level: u32,
        child_x: u32,
        child_y: u32,
        child_level: u32,
    ) -> TerrainResult<HeightmapTile> {
        let job = UpsampleJob::prepare(
            parent,
            &self.config.tiling,
            x,
            y,
            level,
            child_x,
            child_y,
            child_level,
        )?;
        tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|_| {
                log::warn!("upsample worker for ({child_x}, {child_y}) did not finish");
                TerrainError::TransientBusy
            })
    }

    /// Attaches to the in-flight fetch for `target`, starting one if none
    /// exists.
    fn attach_fetch(&self, target: &QuadPath, version: i32) -> TerrainResult<SharedOutcome> {
        match self.in_flight.entry(target.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().outcome.clone()),
            Entry::Vacant(slot) => {
                let Some(transfer) = self.fetcher.fetch(target, version) else {
                    // Throttled: nothing was registered, caller retries
                    return Err(TerrainError::TransientBusy);
                };
                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let outcome = self.drive_fetch(target.clone(), id, transfer);
                slot.insert(InFlightFetch {
                    id,
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
        }
    }

    /// The shared fetch+decode sequence for one stored node: await the
    /// transport, unpack on the blocking pool, then populate the cache and
    /// the origin states for the node and its decoded children.
    fn drive_fetch(
        &self,
        target: QuadPath,
        id: u64,
        transfer: BoxFuture<'static, Result<Vec<u8>, FetchError>>,
    ) -> SharedOutcome {
        let cache = Arc::clone(&self.cache);
        let resolver = Arc::clone(&self.resolver);
        let decoder = Arc::clone(&self.decoder);
        let in_flight = Arc::downgrade(&self.in_flight);
        let kind = self.config.element_kind;

        async move {
            let _cleanup = InFlightCleanup {
                map: in_flight,
                key: target.clone(),
                id,
            };

            let bytes = transfer.await.map_err(|error| match error {
                FetchError::Cancelled => {
                    log::debug!("terrain fetch for {target} cancelled");
                    TerrainError::Cancelled {
                        path: target.to_string(),
                    }
                }
                FetchError::Transport(reason) => {
                    log::warn!("terrain fetch for {target} failed: {reason}");
                    TerrainError::FetchFailed {
                        path: target.to_string(),
                        reason,
                    }
                }
            })?;

            let decode_path = target.clone();
            let packet = tokio::task::spawn_blocking(move || decoder.decode(&bytes, kind))
                .await
                .map_err(|_| TerrainError::DecodeFailed {
                    reason: "decode worker did not finish".into(),
                })?
                .map_err(|error| {
                    log::warn!("terrain packet for {decode_path} is malformed: {error}");
                    TerrainError::DecodeFailed {
                        reason: error.to_string(),
                    }
                })?;

            let mut buffers = packet.buffers.into_iter();
            let own = buffers.next().ok_or_else(|| TerrainError::DecodeFailed {
                reason: "packet carried no buffers".into(),
            })?;
            cache.add(target.clone(), own);
            resolver.mark(&target, TileOrigin::Local);

            let child_mask = resolver.child_mask(&target, TileOrigin::Local);
            let mut stored = 1usize;
            for (digit, buffer) in buffers.enumerate() {
                let digit = digit as u8;
                if child_mask & (1 << digit) != 0 {
                    let child = target.child(digit);
                    resolver.mark(&child, TileOrigin::Inherited);
                    cache.add(child, buffer);
                    stored += 1;
                }
            }
            log::debug!("terrain packet for {target} stored {stored} tile buffers");
            Ok(())
        }
        .boxed()
        .shared()
    }

    fn materialize(&self, path: &QuadPath, buffer: Vec<f64>) -> TerrainResult<HeightmapTile> {
        let origin = self.resolver.origin(path);
        let child_mask = self.resolver.child_mask(path, origin);
        HeightmapTile::from_samples(
            buffer,
            self.config.tile_width,
            self.config.tile_height,
            self.config.structure,
            child_mask,
        )
    }

    fn flat_tile(&self) -> TerrainResult<HeightmapTile> {
        HeightmapTile::constant(
            self.config.flat_tile_samples,
            self.config.flat_tile_samples,
            0.0,
            self.config.structure,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::ElementKind;
    use crate::provider::packet::testing::pack;
    use crate::quadtree::TileInfo;
    use futures::future::join_all;
    use parking_lot::Mutex;
    use rustc_hash::FxHashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct MapDirectory {
        entries: FxHashMap<QuadPath, TileInfo>,
    }

    impl TileDirectory for MapDirectory {
        fn tile_info(&self, path: &QuadPath) -> Option<TileInfo> {
            self.entries.get(path).copied()
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum FetchBehavior {
        Succeed,
        FailTransport,
        Cancel,
        Throttle,
    }

    struct MockFetcher {
        calls: AtomicUsize,
        behavior: Mutex<FetchBehavior>,
        packet: Vec<u8>,
    }

    impl MockFetcher {
        fn new(behavior: FetchBehavior, packet: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior: Mutex::new(behavior),
                packet,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_behavior(&self, behavior: FetchBehavior) {
            *self.behavior.lock() = behavior;
        }
    }

    impl TileFetcher for MockFetcher {
        fn fetch(
            &self,
            _node: &QuadPath,
            _version: i32,
        ) -> Option<BoxFuture<'static, Result<Vec<u8>, FetchError>>> {
            let behavior = *self.behavior.lock();
            if behavior == FetchBehavior::Throttle {
                return None;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let packet = self.packet.clone();
            Some(
                async move {
                    // Keep the transfer pending long enough for every
                    // concurrent requester to attach
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    match behavior {
                        FetchBehavior::Succeed => Ok(packet),
                        FetchBehavior::FailTransport => {
                            Err(FetchError::Transport("connection reset".into()))
                        }
                        FetchBehavior::Cancel => Err(FetchError::Cancelled),
                        FetchBehavior::Throttle => unreachable!(),
                    }
                }
                .boxed(),
            )
        }
    }

    fn small_config() -> ProviderConfig {
        ProviderConfig {
            tile_width: 2,
            tile_height: 2,
            ..Default::default()
        }
    }

    fn info(has_own: bool, ancestor: bool, version: i32, mask: u8) -> TileInfo {
        TileInfo {
            has_own_terrain: has_own,
            ancestor_has_terrain: ancestor,
            terrain_version: version,
            child_mask: mask,
        }
    }

    /// A stored node at (0, 0, 1) whose packet also carries all four
    /// children, none of which store their own payload.
    fn stored_node_setup() -> (Arc<MapDirectory>, Vec<u8>, QuadPath) {
        let target = QuadPath::from_tile(0, 0, 1);
        let mut entries = FxHashMap::default();
        entries.insert(target.clone(), info(true, false, 1, 0b1111));
        for digit in 0..4u8 {
            entries.insert(target.child(digit), info(false, true, -1, 0));
        }

        let buffers: Vec<Vec<f64>> = (0..5)
            .map(|tile| (0..4).map(|s| (tile * 10 + s) as f64).collect())
            .collect();
        let packet = pack(&buffers, ElementKind::Uint8);
        (Arc::new(MapDirectory { entries }), packet, target)
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let (directory, packet, target) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        // The stored node itself plus its four children all resolve to the
        // same fetch target
        let requests = vec![
            service.request_tile(0, 0, 1),
            service.request_tile(0, 0, 2),
            service.request_tile(1, 0, 2),
            service.request_tile(0, 1, 2),
            service.request_tile(1, 1, 2),
        ];
        let results = join_all(requests).await;

        assert_eq!(fetcher.calls(), 1, "one transport fetch for five waiters");
        for result in &results {
            assert!(result.is_ok(), "unexpected failure: {result:?}");
        }

        assert_eq!(service.tile_origin(0, 0, 1), TileOrigin::Local);
        assert_eq!(service.tile_origin(1, 1, 2), TileOrigin::Inherited);
        let (tx, ty, tl) = target.to_tile();
        assert_eq!((tx, ty, tl), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_consumed_buffer_triggers_refetch() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        service.request_tile(0, 0, 2).await.expect("first request");
        // The child's buffer was consumed; a second consumer re-fetches
        service.request_tile(0, 0, 2).await.expect("second request");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_node_without_ancestor_terrain_gets_flat_tile() {
        let path = QuadPath::from_tile(0, 0, 3);
        let mut entries = FxHashMap::default();
        entries.insert(path, info(false, false, -1, 0));
        let directory = Arc::new(MapDirectory { entries });
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, Vec::new());
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        let tile = service.request_tile(0, 0, 3).await.expect("flat tile");
        assert_eq!(fetcher.calls(), 0, "flat tiles never touch the network");
        assert_eq!(tile.child_mask(), 0);
        assert!(!tile.was_created_by_upsampling());
        let rect = service.config().tiling.tile_rectangle(0, 0, 3);
        let lon = (rect.west + rect.east) / 2.0;
        let lat = (rect.south + rect.north) / 2.0;
        assert_eq!(tile.interpolate_height(&rect, lon, lat), 0.0);
    }

    #[tokio::test]
    async fn test_unlisted_tile_is_not_available() {
        let directory = Arc::new(MapDirectory {
            entries: FxHashMap::default(),
        });
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, Vec::new());
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        let err = service.request_tile(2, 2, 3).await.expect_err("no entry");
        assert!(matches!(err, TerrainError::NotAvailable { .. }));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_demotes_the_node() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::FailTransport, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        let err = service.request_tile(0, 0, 1).await.expect_err("fetch fails");
        assert!(matches!(err, TerrainError::FetchFailed { .. }));
        assert_eq!(service.tile_origin(0, 0, 1), TileOrigin::Missing);

        // Demoted: the next request fails fast without another fetch
        let err = service.request_tile(0, 0, 1).await.expect_err("fail fast");
        assert!(matches!(err, TerrainError::NotAvailable { .. }));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_demotion_can_be_disabled() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::FailTransport, packet);
        let config = ProviderConfig {
            demote_on_failure: false,
            ..small_config()
        };
        let service =
            TerrainService::new(config, directory, fetcher.clone()).expect("service");

        service.request_tile(0, 0, 1).await.expect_err("fetch fails");
        assert_eq!(service.tile_origin(0, 0, 1), TileOrigin::Unknown);

        fetcher.set_behavior(FetchBehavior::Succeed);
        service.request_tile(0, 0, 1).await.expect("retry succeeds");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_state_untouched() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Cancel, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        let err = service.request_tile(0, 0, 1).await.expect_err("cancelled");
        assert!(matches!(err, TerrainError::Cancelled { .. }));
        assert_eq!(service.tile_origin(0, 0, 1), TileOrigin::Unknown);

        fetcher.set_behavior(FetchBehavior::Succeed);
        let tile = service.request_tile(0, 0, 1).await.expect("retry succeeds");
        assert_eq!(tile.child_mask(), 0b1111);
    }

    #[tokio::test]
    async fn test_throttled_transport_reports_busy() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Throttle, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        let err = service.request_tile(0, 0, 1).await.expect_err("throttled");
        assert!(err.is_transient());
        assert_eq!(fetcher.calls(), 0);

        fetcher.set_behavior(FetchBehavior::Succeed);
        service.request_tile(0, 0, 1).await.expect("after throttle");
    }

    #[tokio::test]
    async fn test_in_flight_entry_is_removed_after_settling() {
        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher.clone()).expect("service");

        service.request_tile(0, 0, 1).await.expect("request");
        assert!(service.in_flight.is_empty());

        service.request_tile(0, 0, 2).await.expect("second request");
        assert!(service.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_upsample_through_service() {
        use crate::heightmap::mesh::testing::GridTessellator;

        let (directory, packet, _) = stored_node_setup();
        let fetcher = MockFetcher::new(FetchBehavior::Succeed, packet);
        let service =
            TerrainService::new(small_config(), directory, fetcher).expect("service");

        let mut parent = service.request_tile(0, 0, 1).await.expect("parent");
        let rect = service.config().tiling.tile_rectangle(0, 0, 1);
        parent
            .build_mesh(&GridTessellator::default(), rect, 1.0, 0.0)
            .expect("tessellation");

        let child = service
            .upsample_tile(&parent, 0, 0, 1, 1, 1, 2)
            .await
            .expect("upsample");
        assert!(child.was_created_by_upsampling());
        assert_eq!(child.child_mask(), 0);
    }
}
