//! Per-sample neighborhood search through the distance cache.

use photoncluster_core::{Error, Neighborhood, Point2D, Result};

use crate::cache::DistanceCache;

/// Neighbors of one sample and, for elliptical neighborhoods, the sector
/// whose orientation captured them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborSet {
    /// Other samples inside the neighborhood (the sample itself excluded).
    pub points: Vec<Point2D>,
    /// Best-fit sector; `None` for circular neighborhoods.
    pub sector: Option<usize>,
}

impl NeighborSet {
    /// Neighborhood size counting the sample itself.
    #[must_use]
    pub fn inclusive_len(&self) -> usize {
        self.points.len() + 1
    }
}

/// Neighborhood test bound to a cache.
#[derive(Clone, Copy)]
pub struct NeighborSearch<'a> {
    neighborhood: Neighborhood,
    cache: &'a DistanceCache,
}

impl<'a> NeighborSearch<'a> {
    /// Creates a search for `neighborhood`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the neighborhood is elliptical and
    /// `cache` was built without matching ellipse axes.
    pub fn new(neighborhood: Neighborhood, cache: &'a DistanceCache) -> Result<Self> {
        neighborhood.validate()?;
        if let Neighborhood::Ellipse { ellipse, sweep } = neighborhood {
            if cache.ellipse() != Some((ellipse, sweep)) {
                return Err(Error::invalid_config(
                    "ellipse",
                    "distance cache axes do not match the neighborhood",
                ));
            }
        }
        Ok(Self {
            neighborhood,
            cache,
        })
    }

    /// The neighborhood being searched.
    #[must_use]
    pub fn neighborhood(&self) -> Neighborhood {
        self.neighborhood
    }

    fn checked_distance(&self, p1: &Point2D, p2: &Point2D) -> Result<f64> {
        let distance = self.cache.distance(p1, p2);
        if distance.is_finite() {
            Ok(distance)
        } else {
            Err(Error::NonFiniteDistance { p1: *p1, p2: *p2 })
        }
    }

    fn checked_radius(&self, p1: &Point2D, p2: &Point2D, sector: usize) -> Result<f64> {
        let radius = self.cache.sector_ellipse_distance(p1, p2, sector)?;
        if radius.is_nan() {
            Err(Error::NonFiniteDistance { p1: *p1, p2: *p2 })
        } else {
            Ok(radius)
        }
    }

    /// Collects the neighbors of `center` among `points`.
    ///
    /// For an elliptical neighborhood every sector is tried and the one with
    /// the most neighbors is kept; ties go to the lowest sector index.
    ///
    /// # Errors
    /// Returns [`Error::NonFiniteDistance`] if a distance is NaN or infinite.
    pub fn neighbors(&self, center: &Point2D, points: &[Point2D]) -> Result<NeighborSet> {
        match self.neighborhood {
            Neighborhood::Radius(eps) => {
                let mut found = Vec::new();
                for other in points {
                    if other == center {
                        continue;
                    }
                    if self.checked_distance(center, other)? <= eps {
                        found.push(*other);
                    }
                }
                Ok(NeighborSet {
                    points: found,
                    sector: None,
                })
            }
            Neighborhood::Ellipse { ellipse, sweep } => {
                let reach = ellipse.semi_major().max(ellipse.semi_minor());
                let mut buckets: Vec<Vec<Point2D>> = vec![Vec::new(); sweep.len()];
                for other in points {
                    if other == center {
                        continue;
                    }
                    let distance = self.checked_distance(center, other)?;
                    // No orientation reaches further than the longer axis.
                    if distance > reach {
                        continue;
                    }
                    for (sector, bucket) in buckets.iter_mut().enumerate() {
                        if distance <= self.checked_radius(center, other, sector)? {
                            bucket.push(*other);
                        }
                    }
                }

                let mut best = 0;
                for (sector, bucket) in buckets.iter().enumerate().skip(1) {
                    if bucket.len() > buckets[best].len() {
                        best = sector;
                    }
                }
                Ok(NeighborSet {
                    points: buckets.swap_remove(best),
                    sector: Some(best),
                })
            }
        }
    }

    /// Returns true if `other` lies in the neighborhood of `center`, using
    /// `sector` for elliptical neighborhoods.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if an elliptical neighborhood is
    /// queried without a sector, or [`Error::NonFiniteDistance`].
    pub fn contains(&self, center: &Point2D, other: &Point2D, sector: Option<usize>) -> Result<bool> {
        if center == other {
            return Ok(false);
        }
        let distance = self.checked_distance(center, other)?;
        match self.neighborhood {
            Neighborhood::Radius(eps) => Ok(distance <= eps),
            Neighborhood::Ellipse { .. } => {
                let sector = sector
                    .ok_or_else(|| Error::invalid_config("sector", "elliptical test needs a sector"))?;
                Ok(distance <= self.checked_radius(center, other, sector)?)
            }
        }
    }
}
