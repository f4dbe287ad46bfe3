use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::constants::cache::TERRAIN_CACHE_TTL_MS;
use crate::quadtree::QuadPath;

struct CacheEntry {
    buffer: Vec<f64>,
    added: Instant,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Time-bounded store of decoded per-tile sample buffers.
///
/// A buffer is handed off exactly once: `get` removes the entry it returns.
/// Anything not consumed within the staleness window is swept out by
/// `tidy`, which runs at most once per window and is called from the
/// request path on cache miss rather than from a timer, so its cost is
/// amortized into requests.
pub struct TerrainCache {
    entries: Mutex<FxHashMap<QuadPath, CacheEntry>>,
    last_tidy: Mutex<Instant>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TerrainCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_millis(TERRAIN_CACHE_TTL_MS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            last_tidy: Mutex::new(Instant::now()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Stores a decoded buffer, replacing any unconsumed entry for the
    /// same path.
    pub fn add(&self, path: QuadPath, buffer: Vec<f64>) {
        let mut entries = self.entries.lock();
        entries.insert(
            path,
            CacheEntry {
                buffer,
                added: Instant::now(),
            },
        );
    }

    /// Removes and returns the buffer for `path`, if present.
    pub fn get(&self, path: &QuadPath) -> Option<Vec<f64>> {
        let removed = self.entries.lock().remove(path);
        match removed {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.buffer)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Sweeps out entries older than the staleness window. Runs at most
    /// once per window; extra calls return immediately.
    pub fn tidy(&self) {
        let mut last_tidy = self.last_tidy.lock();
        if last_tidy.elapsed() < self.ttl {
            return;
        }
        *last_tidy = Instant::now();

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.added.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            log::trace!("terrain cache evicted {evicted} stale entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for TerrainCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn path(x: u32, y: u32, level: u32) -> QuadPath {
        QuadPath::from_tile(x, y, level)
    }

    #[test]
    fn test_get_consumes_the_entry() {
        let cache = TerrainCache::new();
        cache.add(path(0, 0, 1), vec![1.0, 2.0]);

        assert_eq!(cache.get(&path(0, 0, 1)), Some(vec![1.0, 2.0]));
        assert_eq!(cache.get(&path(0, 0, 1)), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_add_overwrites() {
        let cache = TerrainCache::new();
        cache.add(path(1, 0, 1), vec![1.0]);
        cache.add(path(1, 0, 1), vec![2.0]);
        assert_eq!(cache.get(&path(1, 0, 1)), Some(vec![2.0]));
    }

    #[test]
    fn test_tidy_evicts_after_window() {
        let cache = TerrainCache::with_ttl(Duration::from_millis(30));
        cache.add(path(0, 0, 2), vec![1.0]);

        // Before the window the entry survives tidy
        cache.tidy();
        assert_eq!(cache.len(), 1);

        thread::sleep(Duration::from_millis(40));
        cache.tidy();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.get(&path(0, 0, 2)), None);
    }

    #[test]
    fn test_tidy_is_rate_limited() {
        let cache = TerrainCache::with_ttl(Duration::from_millis(200));
        cache.add(path(0, 0, 1), vec![1.0]);
        // Plenty of calls inside one window, nothing evicted
        for _ in 0..10 {
            cache.tidy();
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fresh_entry_survives_sweep() {
        let cache = TerrainCache::with_ttl(Duration::from_millis(60));
        cache.add(path(0, 1, 1), vec![1.0]);
        thread::sleep(Duration::from_millis(70));
        // Stale entry evicted, fresh one kept
        cache.add(path(1, 1, 1), vec![2.0]);
        cache.tidy();
        assert_eq!(cache.get(&path(0, 1, 1)), None);
        assert_eq!(cache.get(&path(1, 1, 1)), Some(vec![2.0]));
    }
}
