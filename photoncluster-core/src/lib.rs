//! photoncluster-core: Core types for photon-counting point clustering.
//!
//! This crate provides the foundational abstractions shared by the
//! clustering engines: the value-typed sample point, neighborhood geometry,
//! engine configuration and the cluster/outlier partition they produce.
//!

pub mod clustering;
pub mod error;
pub mod geometry;
pub mod point;

pub use clustering::{
    ClusterPoint, Clustering, ClusteringAlgorithm, ClusteringConfig, Neighborhood, RunStatus,
    NOISE, OVERLAY_MARKER,
};
pub use error::{Error, Result};
pub use geometry::{euclidean_distance, line_angle, Ellipse, SectorSweep};
pub use point::{KDistancePoint, Point2D, PointPair};
