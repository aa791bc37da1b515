//! Classification and assembly pipeline shared by the DBSCAN and the
//! anisotropic density filter front ends.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use photoncluster_core::{
    Clustering, ClusteringConfig, Error, Neighborhood, Point2D, Result, RunStatus,
};

use crate::assembler::ClusterAssembler;
use crate::cache::DistanceCache;
use crate::classifier::{Classification, CorePointClassifier};
use crate::kdistance::{KDistanceConfig, KDistanceCurve, KDistanceEstimator};
use crate::neighbors::NeighborSearch;

/// Drops repeated samples, keeping the first occurrence.
#[must_use]
pub fn dedup_points(points: &[Point2D]) -> Vec<Point2D> {
    let mut seen = HashSet::with_capacity(points.len());
    points.iter().copied().filter(|p| seen.insert(*p)).collect()
}

/// Owns the configuration and the distance cache for a sequence of runs.
pub(crate) struct ClusteringEngine {
    config: ClusteringConfig,
    cache: DistanceCache,
}

impl ClusteringEngine {
    pub(crate) fn new(config: ClusteringConfig) -> Result<Self> {
        config.validate()?;
        let cache = match config.neighborhood {
            Neighborhood::Radius(_) => DistanceCache::new(config.cache_capacity)?,
            Neighborhood::Ellipse { ellipse, sweep } => {
                DistanceCache::with_ellipse(config.cache_capacity, ellipse, sweep)?
            }
        };
        Ok(Self { config, cache })
    }

    pub(crate) fn cache(&self) -> &DistanceCache {
        &self.cache
    }

    fn search(&self) -> Result<NeighborSearch<'_>> {
        NeighborSearch::new(self.config.neighborhood, &self.cache)
    }

    pub(crate) fn classify(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Classification>> {
        let unique = dedup_points(points);
        CorePointClassifier::new(
            self.search()?,
            self.config.min_pts,
            self.config.parallelism,
            self.config.queue_capacity,
        )?
        .classify(&unique, cancel)
    }

    pub(crate) fn run(&self, points: &[Point2D], cancel: &AtomicBool) -> Result<RunStatus<Clustering>> {
        let start = Instant::now();
        let classification = match self.classify(points, cancel)? {
            RunStatus::Completed(classification) => classification,
            RunStatus::Cancelled => return Ok(RunStatus::Cancelled),
        };
        let clustering = ClusterAssembler::new(self.search()?).assemble(classification)?;

        let stats = self.cache.stats();
        log::info!(
            "{} clusters, {} outliers from {} samples in {:.3}s",
            clustering.cluster_count(),
            clustering.outliers().len(),
            clustering.len(),
            start.elapsed().as_secs_f64()
        );
        log::debug!(
            "distance cache: {} entries, {} hits, {} misses, {} evictions",
            self.cache.len(),
            stats.hits,
            stats.misses,
            stats.evictions
        );
        Ok(RunStatus::Completed(clustering))
    }

    pub(crate) fn k_distances(
        &self,
        points: &[Point2D],
        k: usize,
        cancel: &AtomicBool,
    ) -> Result<RunStatus<KDistanceCurve>> {
        let unique = dedup_points(points);
        let config = KDistanceConfig {
            k,
            parallelism: self.config.parallelism,
        };
        KDistanceEstimator::new(config, &self.cache)?.estimate_with_cancel(&unique, cancel)
    }
}

/// Neighbor rank whose distance matches `eps` for a core threshold that
/// counts the sample itself.
pub(crate) fn default_k(min_pts: usize) -> usize {
    min_pts.saturating_sub(1).max(1)
}

/// Error returned by front ends when a completed result was required.
pub(crate) fn require_completed<T>(status: RunStatus<T>) -> Result<T> {
    status.completed().ok_or(Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let points = vec![
            Point2D::new(1.0, 1.0),
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(-0.0, 0.0),
        ];
        assert_eq!(
            dedup_points(&points),
            vec![Point2D::new(1.0, 1.0), Point2D::new(0.0, 0.0)]
        );
    }

    #[test]
    fn test_default_k_excludes_self() {
        assert_eq!(default_k(1), 1);
        assert_eq!(default_k(2), 1);
        assert_eq!(default_k(4), 3);
    }

    #[test]
    fn test_engine_builds_matching_cache() {
        let config = ClusteringConfig::new()
            .with_neighborhood(Neighborhood::ellipse(5.0, 0.5, 6).unwrap())
            .with_cache_capacity(64);
        let engine = ClusteringEngine::new(config).unwrap();
        assert!(engine.cache().ellipse().is_some());
        assert!(engine.config.neighborhood.is_anisotropic());
    }
}
