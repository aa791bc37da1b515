//! Directional weighted noise filter.
//!
//! Each sample is scored against the samples within an along-track window by
//! an elliptical kernel rotated through a fixed set of orientations; the
//! highest-scoring orientation is kept. Samples scoring at most `threshold`
//! are labelled signal (`0`), the rest noise.
#![allow(clippy::cast_precision_loss)]

use photoncluster_core::{ClusterPoint, Error, Point2D, Result, NOISE};
use rayon::prelude::*;

/// Label given to samples that pass the filter.
pub const SIGNAL: i32 = 0;

/// Parameters of [`DirectionalFilter`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirectionalConfig {
    /// Kernel extent along the orientation.
    pub semi_major: f64,
    /// Kernel extent across the orientation.
    pub semi_minor: f64,
    /// Half-width of the along-track (x) candidate window.
    pub window: f64,
    /// Orientations tried over 180 degrees.
    pub orientation_steps: usize,
    /// Highest score still labelled signal.
    pub threshold: f64,
}

impl Default for DirectionalConfig {
    fn default() -> Self {
        Self {
            semi_major: 5.0,
            semi_minor: 2.0,
            window: 2.0,
            orientation_steps: 12,
            threshold: 60.0,
        }
    }
}

impl DirectionalConfig {
    /// Checks every parameter.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first bad parameter.
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.semi_major) {
            return Err(Error::invalid_config("semi_major", "must be finite and > 0"));
        }
        if !positive(self.semi_minor) {
            return Err(Error::invalid_config("semi_minor", "must be finite and > 0"));
        }
        if !positive(self.window) {
            return Err(Error::invalid_config("window", "must be finite and > 0"));
        }
        if self.orientation_steps == 0 {
            return Err(Error::invalid_config("orientation_steps", "must be > 0"));
        }
        if !self.threshold.is_finite() {
            return Err(Error::invalid_config("threshold", "must be finite"));
        }
        Ok(())
    }
}

/// Best orientation and score of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirectionalScore {
    /// The sample.
    pub point: Point2D,
    /// Best orientation in degrees, in `[0, 180)`.
    pub theta_degrees: f64,
    /// Kernel sum at that orientation.
    pub score: f64,
}

/// Orientation-scored noise filter.
pub struct DirectionalFilter {
    config: DirectionalConfig,
    orientations: Vec<(f64, f64, f64)>,
}

impl DirectionalFilter {
    /// Creates a filter.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an invalid configuration.
    pub fn new(config: DirectionalConfig) -> Result<Self> {
        config.validate()?;
        let step = 180.0 / config.orientation_steps as f64;
        let orientations = (0..config.orientation_steps)
            .map(|i| {
                let degrees = i as f64 * step;
                let (sin, cos) = degrees.to_radians().sin_cos();
                (degrees, sin, cos)
            })
            .collect();
        Ok(Self {
            config,
            orientations,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &DirectionalConfig {
        &self.config
    }

    /// Kernel value of a neighbor offset `(dx, dy)` at one orientation, or
    /// `None` when it falls outside the kernel.
    fn kernel(&self, dx: f64, dy: f64, sin: f64, cos: f64) -> Option<f64> {
        let a = self.config.semi_major;
        let b = self.config.semi_minor;
        let along = cos * dx + sin * dy;
        let across = sin * dx - cos * dy;
        let w_along = 1.0 - along.abs() / a;
        let w_across = (-(across * across) / b).exp();
        let d = (w_along * w_along) / (a * a) + (w_across * w_across) / (b * b);
        (d <= 1.0).then_some(d)
    }

    fn score_one(&self, center: &Point2D, candidates: &[Point2D]) -> DirectionalScore {
        let mut best = (0.0, 0.0);
        for (index, &(degrees, sin, cos)) in self.orientations.iter().enumerate() {
            let score: f64 = candidates
                .iter()
                .filter(|other| *other != center)
                .filter_map(|other| {
                    self.kernel(center.x() - other.x(), center.y() - other.y(), sin, cos)
                })
                .sum();
            // Strictly greater keeps the smallest angle on ties.
            if index == 0 || score > best.1 {
                best = (degrees, score);
            }
        }
        DirectionalScore {
            point: *center,
            theta_degrees: best.0,
            score: best.1,
        }
    }

    /// Scores every sample, in input order.
    #[must_use]
    pub fn score(&self, points: &[Point2D]) -> Vec<DirectionalScore> {
        let mut by_x = points.to_vec();
        by_x.par_sort_unstable_by(|a, b| a.x().total_cmp(&b.x()));
        let window = self.config.window;

        let scores: Vec<DirectionalScore> = points
            .par_iter()
            .map(|center| {
                let lo = by_x.partition_point(|p| p.x() < center.x() - window);
                let hi = by_x.partition_point(|p| p.x() <= center.x() + window);
                self.score_one(center, &by_x[lo..hi])
            })
            .collect();
        log::debug!(
            "directional filter scored {} samples over {} orientations",
            scores.len(),
            self.orientations.len()
        );
        scores
    }

    /// Labels every sample [`SIGNAL`] or [`NOISE`].
    #[must_use]
    pub fn filter(&self, points: &[Point2D]) -> Vec<ClusterPoint> {
        self.label(&self.score(points))
    }

    /// Labels already scored samples against the threshold, in order.
    #[must_use]
    pub fn label(&self, scores: &[DirectionalScore]) -> Vec<ClusterPoint> {
        let labels: Vec<ClusterPoint> = scores
            .iter()
            .map(|score| {
                let label = if score.score <= self.config.threshold {
                    SIGNAL
                } else {
                    NOISE
                };
                ClusterPoint::new(score.point, label)
            })
            .collect();
        let noise = labels.iter().filter(|cp| cp.is_noise()).count();
        log::info!(
            "directional filter: {} signal, {noise} noise",
            labels.len() - noise
        );
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_isolated_sample_scores_zero() {
        let filter = DirectionalFilter::new(DirectionalConfig::default()).unwrap();
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(100.0, 0.0)];
        let scores = filter.score(&points);
        assert_relative_eq!(scores[0].score, 0.0);
        assert_relative_eq!(scores[0].theta_degrees, 0.0);
        assert_eq!(filter.filter(&points)[0].cluster_id, SIGNAL);
    }

    #[test]
    fn test_pair_kernel_value() {
        let filter = DirectionalFilter::new(DirectionalConfig::default()).unwrap();
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)];
        let score = filter.score(&points)[0];
        // Aligned with the pair: wT = 0.8, wH = 1.
        let expected = 0.8 * 0.8 / 25.0 + 1.0 / 4.0;
        assert_relative_eq!(score.theta_degrees, 0.0);
        assert_relative_eq!(score.score, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_prefers_track_orientation() {
        let filter = DirectionalFilter::new(DirectionalConfig::default()).unwrap();
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0)];
        let score = filter.score(&points)[0];
        assert_relative_eq!(score.theta_degrees, 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_threshold_labels() {
        let config = DirectionalConfig {
            threshold: 0.5,
            ..DirectionalConfig::default()
        };
        let filter = DirectionalFilter::new(config).unwrap();
        let dense: Vec<Point2D> = (0..6).map(|i| Point2D::new(f64::from(i) * 0.1, 0.0)).collect();
        let labels = filter.filter(&dense);
        assert!(labels.iter().all(ClusterPoint::is_noise));
    }

    #[test]
    fn test_label_uses_given_scores() {
        let filter = DirectionalFilter::new(DirectionalConfig::default()).unwrap();
        let scores = vec![
            DirectionalScore {
                point: Point2D::new(0.0, 0.0),
                theta_degrees: 0.0,
                score: 60.0,
            },
            DirectionalScore {
                point: Point2D::new(1.0, 0.0),
                theta_degrees: 15.0,
                score: 60.5,
            },
        ];
        let labels = filter.label(&scores);
        assert_eq!(labels[0], ClusterPoint::new(Point2D::new(0.0, 0.0), SIGNAL));
        assert_eq!(labels[1], ClusterPoint::new(Point2D::new(1.0, 0.0), NOISE));

        let points: Vec<Point2D> = (0..8).map(|i| Point2D::new(f64::from(i) * 0.2, 0.1)).collect();
        assert_eq!(filter.label(&filter.score(&points)), filter.filter(&points));
    }

    #[test]
    fn test_window_limits_candidates() {
        let config = DirectionalConfig {
            window: 0.5,
            ..DirectionalConfig::default()
        };
        let filter = DirectionalFilter::new(config).unwrap();
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)];
        assert_relative_eq!(filter.score(&points)[0].score, 0.0);
    }

    #[test]
    fn test_invalid_config() {
        let bad = DirectionalConfig {
            orientation_steps: 0,
            ..DirectionalConfig::default()
        };
        assert!(DirectionalFilter::new(bad).is_err());
        let bad = DirectionalConfig {
            semi_minor: 0.0,
            ..DirectionalConfig::default()
        };
        assert!(DirectionalFilter::new(bad).is_err());
    }
}
