//! Point types for photon-counting samples.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 2-D photon sample (along-track distance, elevation).
///
/// Points are immutable values: equality, hashing and ordering are all
/// defined on the coordinates, so two points parsed from different lines
/// with the same coordinates are the same key in every map and set.
/// `-0.0` is normalized to `0.0` on construction.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2D {
    x: f64,
    y: f64,
}

impl Point2D {
    /// Creates a new point.
    ///
    /// Coordinates must be finite; use [`Point2D::try_new`] for untrusted input.
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        debug_assert!(x.is_finite() && y.is_finite(), "non-finite point ({x}, {y})");
        Self {
            x: x + 0.0,
            y: y + 0.0,
        }
    }

    /// Creates a new point, rejecting NaN and infinite coordinates.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCoordinate`] if either coordinate is not finite.
    pub fn try_new(x: f64, y: f64) -> Result<Self> {
        if x.is_finite() && y.is_finite() {
            Ok(Self::new(x, y))
        } else {
            Err(Error::InvalidCoordinate { x, y })
        }
    }

    /// Returns the x coordinate.
    #[inline]
    #[must_use]
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Returns the y coordinate.
    #[inline]
    #[must_use]
    pub fn y(&self) -> f64 {
        self.y
    }

    /// Computes the squared Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Computes the Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl PartialEq for Point2D {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits()
    }
}

impl Eq for Point2D {}

impl Hash for Point2D {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
    }
}

impl Ord for Point2D {
    fn cmp(&self, other: &Self) -> Ordering {
        self.x
            .total_cmp(&other.x)
            .then_with(|| self.y.total_cmp(&other.y))
    }
}

impl PartialOrd for Point2D {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Unordered pair of points, `{a, b} == {b, a}`.
///
/// The smaller point (by [`Ord`]) is always stored first, so the derived
/// equality and hash are symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointPair {
    first: Point2D,
    second: Point2D,
}

impl PointPair {
    /// Creates the unordered pair `{a, b}`.
    #[inline]
    #[must_use]
    pub fn new(a: Point2D, b: Point2D) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    /// Returns the two points in normalized order.
    #[inline]
    #[must_use]
    pub fn points(&self) -> (Point2D, Point2D) {
        (self.first, self.second)
    }
}

/// A point augmented with the distance to its k-th nearest neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KDistancePoint {
    /// The sample.
    pub point: Point2D,
    /// Distance to the k-th nearest other sample.
    pub k_distance: f64,
}

impl KDistancePoint {
    /// Creates a new k-distance record.
    #[must_use]
    pub fn new(point: Point2D, k_distance: f64) -> Self {
        Self { point, k_distance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_point_value_equality() {
        let a = Point2D::new(1.5, -2.0);
        let b = Point2D::new(1.5, -2.0);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.insert(b));
    }

    #[test]
    fn test_negative_zero_normalized() {
        let a = Point2D::new(-0.0, 3.0);
        let b = Point2D::new(0.0, 3.0);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_try_new_rejects_non_finite() {
        assert!(Point2D::try_new(f64::NAN, 0.0).is_err());
        assert!(Point2D::try_new(0.0, f64::INFINITY).is_err());
        assert!(Point2D::try_new(1.0, 2.0).is_ok());
    }

    #[test]
    fn test_point_distance() {
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);
        assert!((p1.distance(&p2) - 5.0).abs() < f64::EPSILON);
        assert!((p1.distance_squared(&p2) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_point_ordering() {
        let mut points = vec![
            Point2D::new(2.0, 1.0),
            Point2D::new(1.0, 5.0),
            Point2D::new(1.0, -1.0),
        ];
        points.sort();
        assert_eq!(points[0], Point2D::new(1.0, -1.0));
        assert_eq!(points[1], Point2D::new(1.0, 5.0));
        assert_eq!(points[2], Point2D::new(2.0, 1.0));
    }

    #[test]
    fn test_pair_is_unordered() {
        let a = Point2D::new(0.0, 1.0);
        let b = Point2D::new(4.0, -1.0);
        assert_eq!(PointPair::new(a, b), PointPair::new(b, a));
        assert_eq!(PointPair::new(b, a).points(), (a, b));
    }
}
