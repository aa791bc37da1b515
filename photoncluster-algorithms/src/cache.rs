//! Memoized pairwise distances.
//!
//! Distances are pure functions of the two points, so the cache only has to
//! be fast, never exact: entries may be evicted (least recently used first,
//! per shard) and computed again later, and two workers racing on the same
//! pair may both compute it. The first value stored wins.

use std::collections::hash_map::RandomState;
use std::collections::{HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use photoncluster_core::{Ellipse, Error, Point2D, PointPair, Result, SectorSweep};

const SHARD_COUNT: usize = 16;

/// Hit / miss / eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to compute the value.
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct Slot {
    value: f64,
    stamp: u64,
}

/// One lock stripe. Recency is tracked with a lazily pruned queue of
/// `(key, stamp)`; a queue entry is live only while its stamp matches the
/// slot's.
struct LruShard<K> {
    entries: HashMap<K, Slot>,
    order: VecDeque<(K, u64)>,
    capacity: usize,
    tick: u64,
}

impl<K: Hash + Eq + Copy> LruShard<K> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            tick: 0,
        }
    }

    fn get(&mut self, key: &K) -> Option<f64> {
        self.tick += 1;
        let tick = self.tick;
        let value = match self.entries.get_mut(key) {
            Some(slot) => {
                slot.stamp = tick;
                slot.value
            }
            None => return None,
        };
        self.order.push_back((*key, tick));
        self.compact();
        Some(value)
    }

    /// Stores `value` unless another writer got there first. Returns the
    /// stored value and the number of evicted entries.
    fn insert(&mut self, key: K, value: f64) -> (f64, u64) {
        if let Some(existing) = self.get(&key) {
            return (existing, 0);
        }
        self.tick += 1;
        let tick = self.tick;
        self.entries.insert(key, Slot { value, stamp: tick });
        self.order.push_back((key, tick));

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            let Some((old, stamp)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&old).is_some_and(|slot| slot.stamp == stamp) {
                self.entries.remove(&old);
                evicted += 1;
            }
        }
        self.compact();
        (value, evicted)
    }

    fn compact(&mut self) {
        if self.order.len() > self.capacity.saturating_mul(4).max(64) {
            let entries = &self.entries;
            self.order
                .retain(|(key, stamp)| entries.get(key).is_some_and(|slot| slot.stamp == *stamp));
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct ShardedLru<K> {
    shards: Vec<Mutex<LruShard<K>>>,
    hasher: RandomState,
}

impl<K: Hash + Eq + Copy> ShardedLru<K> {
    fn new(capacity: usize) -> Self {
        let shard_count = SHARD_COUNT.min(capacity);
        let per_shard = capacity.div_ceil(shard_count);
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
            hasher: RandomState::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, key: &K) -> &Mutex<LruShard<K>> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    fn get_or_compute(&self, key: K, counters: &Counters, compute: impl FnOnce() -> f64) -> f64 {
        let shard = self.shard(&key);
        if let Some(value) = shard.lock().get(&key) {
            counters.hits.fetch_add(1, Ordering::Relaxed);
            return value;
        }
        counters.misses.fetch_add(1, Ordering::Relaxed);
        // Computed outside the lock; a concurrent duplicate is harmless.
        let value = compute();
        let (stored, evicted) = shard.lock().insert(key, value);
        if evicted > 0 {
            counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        stored
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

struct EllipseRadii {
    ellipse: Ellipse,
    sweep: SectorSweep,
    radii: ShardedLru<(PointPair, usize)>,
}

/// Concurrent, bounded memo of Euclidean and ellipse-projected distances,
/// keyed by unordered point pair.
pub struct DistanceCache {
    distances: ShardedLru<PointPair>,
    ellipse: Option<EllipseRadii>,
    counters: Counters,
}

impl DistanceCache {
    /// Creates a cache for Euclidean distances only.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_config("cache_capacity", "must be > 0"));
        }
        Ok(Self {
            distances: ShardedLru::new(capacity),
            ellipse: None,
            counters: Counters::default(),
        })
    }

    /// Creates a cache that also memoizes ellipse-projected radii for every
    /// sector of `sweep`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `capacity` is zero.
    pub fn with_ellipse(capacity: usize, ellipse: Ellipse, sweep: SectorSweep) -> Result<Self> {
        let mut cache = Self::new(capacity)?;
        cache.ellipse = Some(EllipseRadii {
            ellipse,
            sweep,
            radii: ShardedLru::new(capacity),
        });
        Ok(cache)
    }

    /// Euclidean distance between `p1` and `p2`.
    ///
    /// Always evaluated on the normalized pair, so the result is bitwise
    /// identical for `(p1, p2)` and `(p2, p1)`.
    pub fn distance(&self, p1: &Point2D, p2: &Point2D) -> f64 {
        let pair = PointPair::new(*p1, *p2);
        self.distances.get_or_compute(pair, &self.counters, || {
            let (a, b) = pair.points();
            a.distance(&b)
        })
    }

    /// Cut-off distance of the unrotated ellipse along the line `p1 → p2`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the cache was built without an ellipse.
    pub fn ellipse_distance(&self, p1: &Point2D, p2: &Point2D) -> Result<f64> {
        self.sector_ellipse_distance(p1, p2, 0)
    }

    /// Cut-off distance along `p1 → p2` of the ellipse rotated into `sector`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the cache was built without an
    /// ellipse or `sector` is out of range.
    pub fn sector_ellipse_distance(&self, p1: &Point2D, p2: &Point2D, sector: usize) -> Result<f64> {
        let radii = self
            .ellipse
            .as_ref()
            .ok_or_else(|| Error::invalid_config("ellipse", "cache has no ellipse axes"))?;
        if sector >= radii.sweep.len() {
            return Err(Error::invalid_config(
                "sector",
                format!("{sector} out of range for {} sectors", radii.sweep.len()),
            ));
        }
        let pair = PointPair::new(*p1, *p2);
        Ok(radii
            .radii
            .get_or_compute((pair, sector), &self.counters, || {
                let (a, b) = pair.points();
                radii
                    .ellipse
                    .projected_radius(&a, &b, radii.sweep.rotation(sector))
            }))
    }

    /// Ellipse and sweep the cache was built with.
    #[must_use]
    pub fn ellipse(&self) -> Option<(Ellipse, SectorSweep)> {
        self.ellipse.as_ref().map(|radii| (radii.ellipse, radii.sweep))
    }

    /// Number of memoized values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.distances.len() + self.ellipse.as_ref().map_or(0, |radii| radii.radii.len())
    }

    /// Returns true if nothing is memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_symmetric_and_memoized() {
        let cache = DistanceCache::new(128).unwrap();
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);

        let d1 = cache.distance(&p1, &p2);
        let d2 = cache.distance(&p2, &p1);
        assert_eq!(d1.to_bits(), d2.to_bits());
        assert!((d1 - 5.0).abs() < 1e-12);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(DistanceCache::new(0).is_err());
    }

    #[test]
    fn test_eviction_keeps_capacity_and_values() {
        let cache = DistanceCache::new(4).unwrap();
        let origin = Point2D::new(0.0, 0.0);
        for i in 1..=20 {
            let p = Point2D::new(f64::from(i), 0.0);
            assert!((cache.distance(&origin, &p) - f64::from(i)).abs() < 1e-12);
        }
        assert!(cache.len() <= 4);
        assert!(cache.stats().evictions >= 16);

        // Evicted pairs are recomputed to the same value.
        let p = Point2D::new(1.0, 0.0);
        assert!((cache.distance(&p, &origin) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lru_keeps_recently_used() {
        let mut shard: LruShard<u32> = LruShard::new(2);
        shard.insert(1, 1.0);
        shard.insert(2, 2.0);
        assert_eq!(shard.get(&1), Some(1.0));
        shard.insert(3, 3.0);
        assert_eq!(shard.get(&1), Some(1.0));
        assert_eq!(shard.get(&2), None);
        assert_eq!(shard.get(&3), Some(3.0));
    }

    #[test]
    fn test_first_writer_wins() {
        let mut shard: LruShard<u32> = LruShard::new(8);
        assert_eq!(shard.insert(7, 1.5).0, 1.5);
        assert_eq!(shard.insert(7, 9.0).0, 1.5);
    }

    #[test]
    fn test_ellipse_distance_requires_axes() {
        let cache = DistanceCache::new(16).unwrap();
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(1.0, 0.0);
        assert!(cache.ellipse_distance(&p1, &p2).is_err());
    }

    #[test]
    fn test_sector_ellipse_distance() {
        let ellipse = Ellipse::new(5.0, 0.5).unwrap();
        let sweep = SectorSweep::new(2).unwrap();
        let cache = DistanceCache::with_ellipse(64, ellipse, sweep).unwrap();
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(1.0, 0.0);

        // Along the major axis, then rotated by 90 degrees.
        assert!((cache.ellipse_distance(&p1, &p2).unwrap() - 5.0).abs() < 1e-9);
        assert!((cache.sector_ellipse_distance(&p2, &p1, 1).unwrap() - 0.5).abs() < 1e-9);
        assert!(cache.sector_ellipse_distance(&p1, &p2, 2).is_err());
    }

    #[test]
    fn test_concurrent_population() {
        let cache = DistanceCache::new(1024).unwrap();
        let points: Vec<Point2D> = (0..20)
            .map(|i| Point2D::new(f64::from(i), f64::from(i % 3)))
            .collect();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for a in &points {
                        for b in &points {
                            let d = cache.distance(a, b);
                            assert_eq!(d.to_bits(), a.distance(b).to_bits());
                        }
                    }
                });
            }
        });
        assert!(cache.len() <= 210);
    }
}
