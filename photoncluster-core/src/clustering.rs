//! Clustering traits and types.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicBool;

use crate::geometry::{Ellipse, SectorSweep};
use crate::{Error, Point2D, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cluster id assigned to noise / outlier samples.
pub const NOISE: i32 = -1;

/// Reserved id used by downstream chart tooling for centroid / overlay
/// markers. Never assigned by the clustering engine.
pub const OVERLAY_MARKER: i32 = 9999;

/// A sample together with the cluster it was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterPoint {
    /// The sample.
    pub point: Point2D,
    /// Dense cluster id, or [`NOISE`].
    pub cluster_id: i32,
}

impl ClusterPoint {
    /// Creates a new labelled sample.
    #[must_use]
    pub fn new(point: Point2D, cluster_id: i32) -> Self {
        Self { point, cluster_id }
    }

    /// Returns true if the sample is labelled as noise.
    #[must_use]
    pub fn is_noise(&self) -> bool {
        self.cluster_id == NOISE
    }
}

/// Shape of the neighborhood searched around each sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Neighborhood {
    /// Circle of radius `eps`.
    Radius(f64),
    /// Ellipse swept through `sweep` orientations; the orientation holding
    /// the most samples wins.
    Ellipse {
        /// Unrotated ellipse (epsA, epsB).
        ellipse: Ellipse,
        /// Orientations tried per sample.
        sweep: SectorSweep,
    },
}

impl Neighborhood {
    /// Isotropic neighborhood of radius `eps`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] unless `eps` is finite and positive.
    pub fn radius(eps: f64) -> Result<Self> {
        let neighborhood = Self::Radius(eps);
        neighborhood.validate()?;
        Ok(neighborhood)
    }

    /// Anisotropic neighborhood with semi-axes `eps_a`, `eps_b` swept through
    /// `sectors` orientations.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for non-positive axes or zero sectors.
    pub fn ellipse(eps_a: f64, eps_b: f64, sectors: usize) -> Result<Self> {
        Ok(Self::Ellipse {
            ellipse: Ellipse::new(eps_a, eps_b)?,
            sweep: SectorSweep::new(sectors)?,
        })
    }

    /// Checks the neighborhood parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first bad parameter.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Radius(eps) if !(eps.is_finite() && *eps > 0.0) => {
                Err(Error::invalid_config("eps", "must be finite and > 0"))
            }
            Self::Radius(_) => Ok(()),
            Self::Ellipse { ellipse, sweep } => {
                Ellipse::new(ellipse.semi_major(), ellipse.semi_minor())?;
                SectorSweep::new(sweep.len())?;
                Ok(())
            }
        }
    }

    /// Returns true for the elliptical variant.
    #[must_use]
    pub fn is_anisotropic(&self) -> bool {
        matches!(self, Self::Ellipse { .. })
    }
}

/// Configuration shared by the density-based clustering engines.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusteringConfig {
    /// Neighborhood searched around every sample.
    pub neighborhood: Neighborhood,
    /// Minimum samples (the sample itself included) for a core point.
    pub min_pts: usize,
    /// Number of worker threads.
    pub parallelism: usize,
    /// Maximum number of memoized distances per distance kind.
    pub cache_capacity: usize,
    /// Bound of the task queue feeding the workers.
    pub queue_capacity: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            neighborhood: Neighborhood::Radius(1.0),
            min_pts: 4,
            parallelism: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
            cache_capacity: 1 << 22,
            queue_capacity: 256,
        }
    }
}

impl ClusteringConfig {
    /// Creates a new clustering configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the neighborhood.
    #[must_use]
    pub fn with_neighborhood(mut self, neighborhood: Neighborhood) -> Self {
        self.neighborhood = neighborhood;
        self
    }

    /// Sets the core-point threshold.
    #[must_use]
    pub fn with_min_pts(mut self, min_pts: usize) -> Self {
        self.min_pts = min_pts;
        self
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
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first bad parameter.
    pub fn validate(&self) -> Result<()> {
        self.neighborhood.validate()?;
        if self.min_pts == 0 {
            return Err(Error::invalid_config("min_pts", "must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(Error::invalid_config("parallelism", "must be > 0"));
        }
        if self.cache_capacity == 0 {
            return Err(Error::invalid_config("cache_capacity", "must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity", "must be > 0"));
        }
        Ok(())
    }
}

/// Outcome of a run that can be cancelled cooperatively.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus<T> {
    /// The run finished.
    Completed(T),
    /// The cancellation flag was raised; no result was produced.
    Cancelled,
}

impl<T> RunStatus<T> {
    /// Returns the result if the run completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Maps a completed result.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunStatus<U> {
        match self {
            Self::Completed(value) => RunStatus::Completed(f(value)),
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Final partition of the samples into clusters and outliers.
///
/// Every sample of the input appears exactly once: either in one cluster or
/// among the outliers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    clusters: BTreeMap<i32, Vec<Point2D>>,
    outliers: Vec<Point2D>,
    core_count: usize,
}

impl Clustering {
    /// Creates a result from its parts. Point lists are sorted for stable
    /// output.
    #[must_use]
    pub fn new(
        clusters: BTreeMap<i32, Vec<Point2D>>,
        mut outliers: Vec<Point2D>,
        core_count: usize,
    ) -> Self {
        let clusters = clusters
            .into_iter()
            .map(|(id, mut points)| {
                points.sort_unstable();
                (id, points)
            })
            .collect();
        outliers.sort_unstable();
        Self {
            clusters,
            outliers,
            core_count,
        }
    }

    /// Number of clusters.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Number of samples classified as core points.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Points of cluster `id`.
    #[must_use]
    pub fn cluster(&self, id: i32) -> Option<&[Point2D]> {
        self.clusters.get(&id).map(Vec::as_slice)
    }

    /// Iterates over `(id, points)` in id order.
    pub fn clusters(&self) -> impl Iterator<Item = (i32, &[Point2D])> {
        self.clusters.iter().map(|(id, points)| (*id, points.as_slice()))
    }

    /// Samples that are neither core nor border points.
    #[must_use]
    pub fn outliers(&self) -> &[Point2D] {
        &self.outliers
    }

    /// Total number of samples covered by the result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.values().map(Vec::len).sum::<usize>() + self.outliers.len()
    }

    /// Returns true if the result covers no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Label of every sample, clusters first then outliers as [`NOISE`].
    #[must_use]
    pub fn cluster_points(&self) -> Vec<ClusterPoint> {
        self.clusters
            .iter()
            .flat_map(|(id, points)| points.iter().map(|p| ClusterPoint::new(*p, *id)))
            .chain(self.outliers.iter().map(|p| ClusterPoint::new(*p, NOISE)))
            .collect()
    }

    /// Map from sample to its label.
    #[must_use]
    pub fn labels(&self) -> HashMap<Point2D, i32> {
        self.cluster_points()
            .into_iter()
            .map(|cp| (cp.point, cp.cluster_id))
            .collect()
    }

    /// Label of a single sample.
    #[must_use]
    pub fn label_of(&self, point: &Point2D) -> Option<i32> {
        if self.outliers.binary_search(point).is_ok() {
            return Some(NOISE);
        }
        self.clusters
            .iter()
            .find(|(_, points)| points.binary_search(point).is_ok())
            .map(|(id, _)| *id)
    }

    /// Clusters as sets of points, ignoring ids. Two runs that differ only
    /// by relabeling compare equal through this view.
    #[must_use]
    pub fn partition(&self) -> HashSet<Vec<Point2D>> {
        self.clusters.values().cloned().collect()
    }

    /// Checks that `points` is covered exactly once by clusters and outliers.
    #[must_use]
    pub fn is_partition_of(&self, points: &[Point2D]) -> bool {
        let input: HashSet<Point2D> = points.iter().copied().collect();
        let mut seen = HashSet::with_capacity(input.len());
        for cp in self.cluster_points() {
            if !input.contains(&cp.point) || !seen.insert(cp.point) {
                return false;
            }
        }
        seen.len() == input.len()
    }
}

/// Trait for clustering algorithms.
///
/// Implementations partition a flat list of samples into density-connected
/// clusters and outliers.
pub trait ClusteringAlgorithm: Send + Sync {
    /// Clusters the samples, checking `cancel` between units of work.
    ///
    /// # Errors
    /// Returns an error if a worker fails; partial results are never returned.
    fn cluster_with_cancel(
        &self,
        points: &[Point2D],
        cancel: &AtomicBool,
    ) -> Result<RunStatus<Clustering>>;

    /// Clusters the samples to completion.
    ///
    /// # Errors
    /// Returns an error if a worker fails.
    fn cluster(&self, points: &[Point2D]) -> Result<Clustering> {
        let never = AtomicBool::new(false);
        self.cluster_with_cancel(points, &never)?
            .completed()
            .ok_or(Error::Cancelled)
    }

    /// Returns the name of the algorithm.
    fn name(&self) -> &'static str;
}
