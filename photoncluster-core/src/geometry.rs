//! Planar geometry for isotropic and elliptical neighborhoods.
#![allow(clippy::cast_precision_loss)]

use std::f64::consts::PI;

use crate::{Error, Point2D, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Euclidean distance between two points.
#[inline]
#[must_use]
pub fn euclidean_distance(p1: &Point2D, p2: &Point2D) -> f64 {
    p1.distance(p2)
}

/// Angle (radians) of the line joining `from` to `to`, in `(-PI, PI]`.
///
/// Both ellipse axes are symmetric, so only the line matters, not its
/// direction: `line_angle(a, b)` and `line_angle(b, a)` differ by `PI` and
/// give the same projected radius.
#[inline]
#[must_use]
pub fn line_angle(from: &Point2D, to: &Point2D) -> f64 {
    (to.y() - from.y()).atan2(to.x() - from.x())
}

/// Neighborhood ellipse centered on a sample.
///
/// `semi_major` lies along the x axis before rotation (epsA),
/// `semi_minor` along the y axis (epsB).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ellipse {
    semi_major: f64,
    semi_minor: f64,
}

impl Ellipse {
    /// Creates an ellipse from its two semi-axes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] unless both axes are finite and positive.
    pub fn new(semi_major: f64, semi_minor: f64) -> Result<Self> {
        if !(semi_major.is_finite() && semi_major > 0.0) {
            return Err(Error::invalid_config("eps_a", "must be finite and > 0"));
        }
        if !(semi_minor.is_finite() && semi_minor > 0.0) {
            return Err(Error::invalid_config("eps_b", "must be finite and > 0"));
        }
        Ok(Self {
            semi_major,
            semi_minor,
        })
    }

    /// Semi-axis along the (unrotated) x direction.
    #[must_use]
    pub fn semi_major(&self) -> f64 {
        self.semi_major
    }

    /// Semi-axis along the (unrotated) y direction.
    #[must_use]
    pub fn semi_minor(&self) -> f64 {
        self.semi_minor
    }

    /// Radius of the ellipse boundary in direction `theta` (radians).
    ///
    /// Polar form `r² = a²b²(1 + tan²θ) / (b² + a²tan²θ)`, evaluated as
    /// `a²b² / (b²cos²θ + a²sin²θ)` so that `θ = ±90°` stays finite.
    #[inline]
    #[must_use]
    pub fn radius_at(&self, theta: f64) -> f64 {
        let (sin, cos) = theta.sin_cos();
        let a = self.semi_major;
        let b = self.semi_minor;
        let denom = (b * cos).powi(2) + (a * sin).powi(2);
        a * b / denom.sqrt()
    }

    /// Projected radius along the line `p1 → p2` for an ellipse rotated by
    /// `rotation` radians.
    #[inline]
    #[must_use]
    pub fn projected_radius(&self, p1: &Point2D, p2: &Point2D, rotation: f64) -> f64 {
        self.radius_at(line_angle(p1, p2) - rotation)
    }

    /// Returns true if `p2` lies inside (or on) the ellipse centered on `p1`.
    #[must_use]
    pub fn contains(&self, p1: &Point2D, p2: &Point2D, rotation: f64) -> bool {
        p1.distance(p2) <= self.projected_radius(p1, p2, rotation)
    }
}

/// Evenly spaced ellipse orientations over a half turn.
///
/// Sector `i` rotates the ellipse by `i · 180° / S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SectorSweep {
    sectors: usize,
}

impl SectorSweep {
    /// Creates a sweep with `sectors` orientations.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `sectors` is zero.
    pub fn new(sectors: usize) -> Result<Self> {
        if sectors == 0 {
            return Err(Error::invalid_config("sectors", "must be > 0"));
        }
        Ok(Self { sectors })
    }

    /// Number of sectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors
    }

    /// Always false, a sweep has at least one sector.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Angular width of one sector in degrees.
    #[must_use]
    pub fn width_degrees(&self) -> f64 {
        180.0 / self.sectors as f64
    }

    /// Rotation of sector `index` in radians.
    #[inline]
    #[must_use]
    pub fn rotation(&self, index: usize) -> f64 {
        index as f64 * PI / self.sectors as f64
    }

    /// Rotation of sector `index` in degrees.
    #[must_use]
    pub fn rotation_degrees(&self, index: usize) -> f64 {
        index as f64 * self.width_degrees()
    }

    /// Sector whose rotation is closest to `degrees` (modulo 180°).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn nearest(&self, degrees: f64) -> usize {
        let wrapped = degrees.rem_euclid(180.0);
        let index = (wrapped / self.width_degrees()).round() as usize;
        index % self.sectors
    }

    /// Iterates over `(index, rotation_radians)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.sectors).map(move |i| (i, self.rotation(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_radius_on_axes() {
        let ellipse = Ellipse::new(5.0, 0.5).unwrap();
        assert_relative_eq!(ellipse.radius_at(0.0), 5.0, epsilon = 1e-12);
        assert_relative_eq!(ellipse.radius_at(PI / 2.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ellipse.radius_at(PI), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_radius_matches_tangent_form() {
        let a: f64 = 7.5;
        let b: f64 = 0.1;
        let ellipse = Ellipse::new(a, b).unwrap();
        for deg in [5.0_f64, 20.0, 45.0, 60.0, 85.0] {
            let theta = deg.to_radians();
            let t2 = theta.tan().powi(2);
            let r2 = (a * a * b * b) / (b * b + a * a * t2)
                + (a * a * b * b * t2) / (b * b + a * a * t2);
            assert_relative_eq!(ellipse.radius_at(theta), r2.sqrt(), max_relative = 1e-9);
        }
    }

    #[test]
    fn test_projected_radius_is_symmetric() {
        let ellipse = Ellipse::new(3.0, 1.0).unwrap();
        let p1 = Point2D::new(1.0, 1.0);
        let p2 = Point2D::new(2.5, 3.0);
        let rotation = 0.4;
        assert_relative_eq!(
            ellipse.projected_radius(&p1, &p2, rotation),
            ellipse.projected_radius(&p2, &p1, rotation),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_vertical_line_is_finite() {
        let ellipse = Ellipse::new(5.0, 0.5).unwrap();
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(0.0, 0.4);
        assert!(ellipse.contains(&p1, &p2, 0.0));
        assert!(!ellipse.contains(&p1, &Point2D::new(0.0, 0.6), 0.0));
    }

    #[test]
    fn test_invalid_axes() {
        assert!(Ellipse::new(0.0, 1.0).is_err());
        assert!(Ellipse::new(1.0, -1.0).is_err());
        assert!(Ellipse::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_sector_sweep() {
        let sweep = SectorSweep::new(6).unwrap();
        assert_eq!(sweep.len(), 6);
        assert_relative_eq!(sweep.width_degrees(), 30.0);
        assert_relative_eq!(sweep.rotation_degrees(1), 30.0);
        assert_relative_eq!(sweep.rotation(3), PI / 2.0);
        assert_eq!(sweep.nearest(31.0), 1);
        assert_eq!(sweep.nearest(-30.0), 5);
        assert_eq!(sweep.nearest(179.0), 0);
        assert!(SectorSweep::new(0).is_err());
    }
}
