//! Isotropic DBSCAN over photon samples.
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

use std::sync::atomic::AtomicBool;

use photoncluster_core::{
    Clustering, ClusteringAlgorithm, ClusteringConfig, Neighborhood, Point2D, Result, RunStatus,
};

use crate::cache::DistanceCache;
use crate::classifier::Classification;
use crate::engine::{default_k, require_completed, ClusteringEngine};
use crate::kdistance::KDistanceCurve;

/// Parameters of [`DbscanClustering`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DbscanConfig {
    /// Neighborhood radius.
    pub eps: f64,
    /// Core threshold, the sample itself included.
    pub min_pts: usize,
    /// Worker threads.
    pub parallelism: usize,
    /// Memoized distances kept at most.
    pub cache_capacity: usize,
    /// Task queue bound.
    pub queue_capacity: usize,
}

impl Default for DbscanConfig {
    fn default() -> Self {
        let base = ClusteringConfig::default();
        Self {
            eps: 1.0,
            min_pts: base.min_pts,
            parallelism: base.parallelism,
            cache_capacity: base.cache_capacity,
            queue_capacity: base.queue_capacity,
        }
    }
}

impl DbscanConfig {
    /// Default configuration with the given radius and threshold.
    pub fn new(eps: f64, min_pts: usize) -> Self {
        Self {
            eps,
            min_pts,
            ..Self::default()
        }
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the distance cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the task queue bound.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Checks every parameter.
    pub fn validate(&self) -> Result<()> {
        self.to_clustering_config().map(|_| ())
    }

    fn to_clustering_config(&self) -> Result<ClusteringConfig> {
        let config = ClusteringConfig::new()
            .with_neighborhood(Neighborhood::radius(self.eps)?)
            .with_min_pts(self.min_pts)
            .with_parallelism(self.parallelism)
            .with_cache_capacity(self.cache_capacity)
            .with_queue_capacity(self.queue_capacity);
        config.validate()?;
        Ok(config)
    }
}

/// DBSCAN with a circular neighborhood of radius `eps`.
///
/// The distance cache lives as long as the clusterer, so a k-distance run
/// followed by clustering of the same samples reuses every distance.
pub struct DbscanClustering {
    config: DbscanConfig,
    engine: ClusteringEngine,
}

impl DbscanClustering {
    /// Validates `config` and allocates the distance cache.
    pub fn new(config: DbscanConfig) -> Result<Self> {
        let engine = ClusteringEngine::new(config.to_clustering_config()?)?;
        log::info!(
            "dbscan: eps = {}, min_pts = {}, parallelism = {}",
            config.eps,
            config.min_pts,
            config.parallelism
        );
        Ok(Self { config, engine })
    }

    /// The configuration.
    pub fn config(&self) -> &DbscanConfig {
        &self.config
    }

    /// Distance cache shared by every run of this clusterer.
    pub fn cache(&self) -> &DistanceCache {
        self.engine.cache()
    }

    /// k-distance curve with `k = min_pts - 1` (at least 1): a sample whose
    /// k-distance is within `eps` has `min_pts` samples around it counting
    /// itself, so it is core.
    pub fn k_distances(&self, points: &[Point2D]) -> Result<KDistanceCurve> {
        self.k_distances_for(points, default_k(self.config.min_pts))
    }

    /// k-distance curve for an explicit `k`.
    pub fn k_distances_for(&self, points: &[Point2D], k: usize) -> Result<KDistanceCurve> {
        let never = AtomicBool::new(false);
        require_completed(self.engine.k_distances(points, k, &never)?)
    }

    /// Cancellable k-distance curve.
    pub fn k_distances_with_cancel(
        &self,
        points: &[Point2D],
        k: usize,
        cancel: &AtomicBool,
    ) -> Result<RunStatus<KDistanceCurve>> {
        self.engine.k_distances(points, k, cancel)
    }

    /// Core-point classification alone, without assembling clusters.
    pub fn classify(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Classification>> {
        self.engine.classify(points, cancel)
    }
}

impl ClusteringAlgorithm for DbscanClustering {
    fn cluster_with_cancel(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Clustering>> {
        self.engine.run(points, cancel)
    }

    fn name(&self) -> &'static str {
        "DBSCAN"
    }
}
