//! k-distance estimation for choosing `eps`.
//!
//! Every sample's distance to its k-th nearest other sample is computed by a
//! fixed set of workers, each owning a static round-robin share of the input
//! (worker `w` handles indices `w, w + W, w + 2W, ...`). The sorted curve of
//! those distances is the usual "elbow" plot for picking a DBSCAN radius.
#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use photoncluster_core::{Error, KDistancePoint, Point2D, Result, RunStatus};
use rayon::prelude::*;

use crate::cache::DistanceCache;

/// Configuration for [`KDistanceEstimator`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KDistanceConfig {
    /// Rank of the neighbor whose distance is reported.
    pub k: usize,
    /// Number of worker threads.
    pub parallelism: usize,
}

impl Default for KDistanceConfig {
    fn default() -> Self {
        Self {
            k: 4,
            parallelism: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
        }
    }
}

impl KDistanceConfig {
    /// Checks the parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `k` or `parallelism` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::invalid_config("k", "must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(Error::invalid_config("parallelism", "must be > 0"));
        }
        Ok(())
    }
}

/// Heap entry ordered by `f64::total_cmp`.
#[derive(Debug, Clone, Copy)]
struct Candidate(f64);

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

/// k-distance of every sample, sorted ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KDistanceCurve {
    k: usize,
    points: Vec<KDistancePoint>,
}

impl KDistanceCurve {
    /// Rank the curve was computed for.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Records in ascending k-distance order.
    #[must_use]
    pub fn points(&self) -> &[KDistancePoint] {
        &self.points
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the curve is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `(rank, k_distance)` pairs, rank starting at 0.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.points
            .iter()
            .enumerate()
            .map(|(rank, record)| (rank, record.k_distance))
    }

    /// Suggests an `eps` at the knee of the curve.
    ///
    /// Both axes are normalized to `[0, 1]` and the record furthest below the
    /// chord from the first to the last record is picked.
    #[must_use]
    pub fn suggest_radius(&self) -> Option<f64> {
        let first = self.points.first()?.k_distance;
        let last = self.points.last()?.k_distance;
        let span = last - first;
        if self.points.len() < 3 || span <= 0.0 {
            return Some(last);
        }

        let steps = (self.points.len() - 1) as f64;
        self.points
            .iter()
            .enumerate()
            .map(|(rank, record)| {
                let x = rank as f64 / steps;
                let y = (record.k_distance - first) / span;
                (x - y, record.k_distance)
            })
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, k_distance)| k_distance)
    }
}

/// Computes k-distances in parallel, memoizing through a [`DistanceCache`].
pub struct KDistanceEstimator<'a> {
    config: KDistanceConfig,
    cache: &'a DistanceCache,
}

impl<'a> KDistanceEstimator<'a> {
    /// Creates a new estimator.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an invalid configuration.
    pub fn new(config: KDistanceConfig, cache: &'a DistanceCache) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cache })
    }

    /// Computes the curve to completion.
    ///
    /// # Errors
    /// See [`KDistanceEstimator::estimate_with_cancel`].
    pub fn estimate(&self, points: &[Point2D]) -> Result<KDistanceCurve> {
        let never = AtomicBool::new(false);
        self.estimate_with_cancel(points, &never)?
            .completed()
            .ok_or(Error::Cancelled)
    }

    /// Computes the curve, checking `cancel` before every sample.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientPoints`] unless there are more than `k`
    /// samples, [`Error::NonFiniteDistance`] if a distance is not finite, or
    /// [`Error::WorkerPanicked`].
    pub fn estimate_with_cancel(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<KDistanceCurve>> {
        let k = self.config.k;
        if points.len() <= k {
            return Err(Error::InsufficientPoints {
                required: k + 1,
                actual: points.len(),
            });
        }

        let workers = self.config.parallelism.min(points.len());
        log::debug!(
            "k-distance: {} samples, k = {k}, {workers} workers",
            points.len()
        );

        // The scope is the barrier: every share is finished (or abandoned)
        // before the merge below starts.
        let shares: Vec<thread::Result<Result<Option<Vec<KDistancePoint>>>>> =
            thread::scope(|scope| {
                let handles: Vec<_> = (0..workers)
                    .map(|worker| {
                        scope.spawn(move || self.run_share(worker, workers, points, cancel))
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join()).collect()
            });

        let mut records = Vec::with_capacity(points.len());
        let mut cancelled = false;
        for share in shares {
            match share {
                Ok(Ok(Some(part))) => records.extend(part),
                Ok(Ok(None)) => cancelled = true,
                Ok(Err(e)) => return Err(e),
                Err(payload) => return Err(Error::WorkerPanicked(panic_message(&*payload))),
            }
        }
        if cancelled || cancel.load(Ordering::Relaxed) {
            log::info!("k-distance run cancelled");
            return Ok(RunStatus::Cancelled);
        }

        records.par_sort_unstable_by(|a, b| {
            a.k_distance
                .total_cmp(&b.k_distance)
                .then_with(|| a.point.cmp(&b.point))
        });
        let stats = self.cache.stats();
        log::debug!(
            "k-distance done: cache hits {}, misses {}, evictions {}",
            stats.hits,
            stats.misses,
            stats.evictions
        );
        Ok(RunStatus::Completed(KDistanceCurve { k, points: records }))
    }

    /// Processes indices `worker, worker + stride, ...`. Returns `None` if
    /// cancelled.
    fn run_share(
        &self,
        worker: usize,
        stride: usize,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<Option<Vec<KDistancePoint>>> {
        let mut out = Vec::with_capacity(points.len() / stride + 1);
        let mut heap = BinaryHeap::with_capacity(self.config.k + 1);
        for center in points.iter().skip(worker).step_by(stride) {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            heap.clear();
            for other in points {
                if other == center {
                    continue;
                }
                let distance = self.cache.distance(center, other);
                if !distance.is_finite() {
                    return Err(Error::NonFiniteDistance {
                        p1: *center,
                        p2: *other,
                    });
                }
                if heap.len() < self.config.k {
                    heap.push(Candidate(distance));
                } else if heap.peek().is_some_and(|top| distance < top.0) {
                    heap.pop();
                    heap.push(Candidate(distance));
                }
            }
            // Fewer than k others only happens with duplicated input.
            let Some(kth) = heap.peek().filter(|_| heap.len() == self.config.k) else {
                return Err(Error::InsufficientPoints {
                    required: self.config.k + 1,
                    actual: heap.len() + 1,
                });
            };
            out.push(KDistancePoint::new(*center, kth.0));
        }
        log::trace!("k-distance worker {worker} finished {} samples", out.len());
        Ok(Some(out))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn brute_force(points: &[Point2D], k: usize) -> Vec<f64> {
        let mut out: Vec<f64> = points
            .iter()
            .map(|p| {
                let mut d: Vec<f64> = points
                    .iter()
                    .filter(|q| *q != p)
                    .map(|q| p.distance(q))
                    .collect();
                d.sort_by(f64::total_cmp);
                d[k - 1]
            })
            .collect();
        out.sort_by(f64::total_cmp);
        out
    }

    fn grid(n: i32) -> Vec<Point2D> {
        (0..n)
            .flat_map(|i| (0..n).map(move |j| Point2D::new(f64::from(i) * 1.3, f64::from(j) * 0.7)))
            .collect()
    }

    #[test]
    fn test_matches_brute_force() {
        let points = grid(6);
        let cache = DistanceCache::new(4096).unwrap();
        for parallelism in [1, 3, 8] {
            let estimator =
                KDistanceEstimator::new(KDistanceConfig { k: 4, parallelism }, &cache).unwrap();
            let curve = estimator.estimate(&points).unwrap();
            assert_eq!(curve.len(), points.len());
            assert_eq!(curve.k(), 4);
            let expected = brute_force(&points, 4);
            for ((rank, got), want) in curve.ranked().zip(expected) {
                assert!(rank < points.len());
                assert_relative_eq!(got, want, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_ties_count_individually() {
        // Four samples at distance 1 from the center: k = 3 still gives 1.
        let points = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(-1.0, 0.0),
            Point2D::new(0.0, 1.0),
            Point2D::new(0.0, -1.0),
        ];
        let cache = DistanceCache::new(64).unwrap();
        let estimator =
            KDistanceEstimator::new(KDistanceConfig { k: 3, parallelism: 2 }, &cache).unwrap();
        let curve = estimator.estimate(&points).unwrap();
        let center = curve
            .points()
            .iter()
            .find(|r| r.point == points[0])
            .unwrap();
        assert_relative_eq!(center.k_distance, 1.0);
    }

    #[test]
    fn test_too_few_points() {
        let cache = DistanceCache::new(16).unwrap();
        let estimator =
            KDistanceEstimator::new(KDistanceConfig { k: 3, parallelism: 2 }, &cache).unwrap();
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0), Point2D::new(2.0, 2.0)];
        assert!(matches!(
            estimator.estimate(&points),
            Err(Error::InsufficientPoints { required: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cache = DistanceCache::new(64).unwrap();
        let estimator =
            KDistanceEstimator::new(KDistanceConfig { k: 1, parallelism: 2 }, &cache).unwrap();
        let cancel = AtomicBool::new(true);
        let status = estimator.estimate_with_cancel(&grid(3), &cancel).unwrap();
        assert!(status.is_cancelled());
    }

    #[test]
    fn test_invalid_config() {
        let cache = DistanceCache::new(16).unwrap();
        assert!(KDistanceEstimator::new(KDistanceConfig { k: 0, parallelism: 1 }, &cache).is_err());
        assert!(KDistanceEstimator::new(KDistanceConfig { k: 1, parallelism: 0 }, &cache).is_err());
    }

    #[test]
    fn test_suggest_radius_finds_knee() {
        let mut records: Vec<KDistancePoint> = (0..90)
            .map(|i| KDistancePoint::new(Point2D::new(f64::from(i), 0.0), 1.0 + f64::from(i) * 0.001))
            .collect();
        records.extend(
            (0..10).map(|i| KDistancePoint::new(Point2D::new(f64::from(i), 9.0), 2.0 + f64::from(i) * 2.0)),
        );
        let curve = KDistanceCurve { k: 4, points: records };
        let eps = curve.suggest_radius().unwrap();
        assert!((1.0..1.1).contains(&eps), "knee at {eps}");
        assert_eq!(KDistanceCurve::default().suggest_radius(), None);
    }
}
