//! photoncluster-algorithms: density-based clustering of photon samples.
//!
//! This crate provides:
//! - **DBSCAN** - circular neighborhood, parallel core-point classification
//! - **Anisotropic density filter** - best-fit elliptical neighborhood per sample
//! - **k-distance** - sorted k-th neighbor distances for choosing `eps`
//! - **Directional filter** - orientation-scored signal / noise labelling
//!
//! All pairwise distances go through a bounded, lock-striped [`DistanceCache`].
#![warn(missing_docs)]

mod assembler;
mod cache;
mod classifier;
mod dbscan;
mod density;
mod directional;
mod engine;
mod kdistance;
mod neighbors;

pub use assembler::ClusterAssembler;
pub use cache::{CacheStats, DistanceCache};
pub use classifier::{Classification, CorePointClassifier, CoreRecord};
pub use dbscan::{DbscanClustering, DbscanConfig};
pub use density::{DensityFilter, DensityFilterConfig};
pub use directional::{DirectionalConfig, DirectionalFilter, DirectionalScore, SIGNAL};
pub use engine::dedup_points;
pub use kdistance::{KDistanceConfig, KDistanceCurve, KDistanceEstimator};
pub use neighbors::{NeighborSearch, NeighborSet};

// Re-export core clustering traits
pub use photoncluster_core::{ClusteringAlgorithm, ClusteringConfig, RunStatus};
