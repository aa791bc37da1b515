//! Anisotropic density filter.
//!
//! Along-track photon returns are far denser than across-track ones, so a
//! circular neighborhood either merges signal with background or splits the
//! signal. Here the neighborhood is an ellipse (semi-axes `eps_a`, `eps_b`)
//! tried at `sectors` orientations over a half turn; each sample keeps the
//! orientation holding the most neighbors.
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use photoncluster_core::{
    Clustering, ClusteringAlgorithm, ClusteringConfig, Neighborhood, Point2D, Result, RunStatus,
    SectorSweep,
};

use crate::cache::DistanceCache;
use crate::classifier::Classification;
use crate::engine::{default_k, require_completed, ClusteringEngine};
use crate::kdistance::KDistanceCurve;

/// Parameters of [`DensityFilter`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DensityFilterConfig {
    /// Semi-axis along the unrotated x direction.
    pub eps_a: f64,
    /// Semi-axis along the unrotated y direction.
    pub eps_b: f64,
    /// Number of orientations over 180 degrees.
    pub sectors: usize,
    /// Core threshold, the sample itself included.
    pub min_pts: usize,
    /// Worker threads.
    pub parallelism: usize,
    /// Memoized values kept at most, per distance kind.
    pub cache_capacity: usize,
    /// Task queue bound.
    pub queue_capacity: usize,
}

impl Default for DensityFilterConfig {
    fn default() -> Self {
        let base = ClusteringConfig::default();
        Self {
            eps_a: 5.0,
            eps_b: 0.5,
            sectors: 6,
            min_pts: base.min_pts,
            parallelism: base.parallelism,
            cache_capacity: base.cache_capacity,
            queue_capacity: base.queue_capacity,
        }
    }
}

impl DensityFilterConfig {
    /// Default configuration with the given ellipse, sweep and threshold.
    pub fn new(eps_a: f64, eps_b: f64, sectors: usize, min_pts: usize) -> Self {
        Self {
            eps_a,
            eps_b,
            sectors,
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
            .with_neighborhood(Neighborhood::ellipse(self.eps_a, self.eps_b, self.sectors)?)
            .with_min_pts(self.min_pts)
            .with_parallelism(self.parallelism)
            .with_cache_capacity(self.cache_capacity)
            .with_queue_capacity(self.queue_capacity);
        config.validate()?;
        Ok(config)
    }
}

/// Density clustering with a best-fit elliptical neighborhood.
pub struct DensityFilter {
    config: DensityFilterConfig,
    sweep: SectorSweep,
    engine: ClusteringEngine,
}

impl DensityFilter {
    /// Validates `config` and allocates the distance cache.
    pub fn new(config: DensityFilterConfig) -> Result<Self> {
        let clustering_config = config.to_clustering_config()?;
        let sweep = SectorSweep::new(config.sectors)?;
        let engine = ClusteringEngine::new(clustering_config)?;
        log::info!(
            "density filter: eps_a = {}, eps_b = {}, {} sectors of {:.1} deg, min_pts = {}",
            config.eps_a,
            config.eps_b,
            config.sectors,
            sweep.width_degrees(),
            config.min_pts
        );
        Ok(Self {
            config,
            sweep,
            engine,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &DensityFilterConfig {
        &self.config
    }

    /// Orientations tried per sample.
    pub fn sweep(&self) -> SectorSweep {
        self.sweep
    }

    /// Distance cache shared by every run of this filter.
    pub fn cache(&self) -> &DistanceCache {
        self.engine.cache()
    }

    /// Euclidean k-distance curve with `k = min_pts - 1` (at least 1).
    pub fn k_distances(&self, points: &[Point2D]) -> Result<KDistanceCurve> {
        let never = AtomicBool::new(false);
        let k = default_k(self.config.min_pts);
        require_completed(self.engine.k_distances(points, k, &never)?)
    }

    /// Core-point classification, each core point carrying its best sector.
    pub fn classify(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Classification>> {
        self.engine.classify(points, cancel)
    }

    /// Best-fit orientation (degrees) of every core point.
    pub fn orientations(&self, points: &[Point2D]) -> Result<HashMap<Point2D, f64>> {
        let never = AtomicBool::new(false);
        let classification = require_completed(self.classify(points, &never)?)?;
        Ok(classification
            .core()
            .iter()
            .filter_map(|(point, record)| {
                record
                    .sector
                    .map(|sector| (*point, self.sweep.rotation_degrees(sector)))
            })
            .collect())
    }
}

impl ClusteringAlgorithm for DensityFilter {
    fn cluster_with_cancel(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Clustering>> {
        self.engine.run(points, cancel)
    }

    fn name(&self) -> &'static str {
        "AnisotropicDensityFilter"
    }
}
