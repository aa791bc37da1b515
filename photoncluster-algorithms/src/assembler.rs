//! Builds clusters from classified core points.
//!
//! Core points are joined when either lies in the other's neighborhood;
//! each connected component becomes a cluster together with the neighbors
//! (border points) of its members. Seeds are taken in point order, so ids
//! are dense and stable across runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use photoncluster_core::{Clustering, Point2D, Result};

use crate::classifier::{Classification, CoreRecord};
use crate::neighbors::NeighborSearch;

/// Groups core points into clusters and settles the outliers.
pub struct ClusterAssembler<'a> {
    search: NeighborSearch<'a>,
}

impl<'a> ClusterAssembler<'a> {
    /// Creates an assembler using the same neighborhood test as the
    /// classification.
    #[must_use]
    pub fn new(search: NeighborSearch<'a>) -> Self {
        Self { search }
    }

    fn connected(
        &self,
        p: &Point2D,
        p_record: &CoreRecord,
        q: &Point2D,
        q_record: &CoreRecord,
    ) -> Result<bool> {
        Ok(self.search.contains(p, q, p_record.sector)?
            || self.search.contains(q, p, q_record.sector)?)
    }

    /// Assembles the final clustering.
    ///
    /// A border point reachable from several clusters stays with the first
    /// one that claimed it. Provisional outliers claimed as border points
    /// are removed from the outlier set.
    ///
    /// # Errors
    /// Returns an error if a distance cannot be evaluated.
    pub fn assemble(&self, classification: Classification) -> Result<Clustering> {
        let (core, outliers) = classification.into_parts();
        let core_count = core.len();
        let mut pool: BTreeSet<Point2D> = core.keys().copied().collect();
        let mut claimed: HashSet<Point2D> = HashSet::with_capacity(core_count);
        let mut clusters: BTreeMap<i32, Vec<Point2D>> = BTreeMap::new();
        let mut next_id = 0i32;

        while let Some(seed) = pool.pop_first() {
            let component = self.expand(seed, &mut pool, &core)?;

            let mut members = Vec::with_capacity(component.len());
            for point in &component {
                if claimed.insert(*point) {
                    members.push(*point);
                }
                for neighbor in core.get(point).map(|r| r.neighbors.as_slice()).unwrap_or_default() {
                    if claimed.insert(*neighbor) {
                        members.push(*neighbor);
                    }
                }
            }
            log::trace!(
                "cluster {next_id}: {} core, {} total",
                component.len(),
                members.len()
            );
            clusters.insert(next_id, members);
            next_id += 1;
        }

        let remaining: Vec<Point2D> = outliers
            .into_iter()
            .filter(|point| !claimed.contains(point))
            .collect();
        log::debug!(
            "assembled {} clusters from {core_count} core points, {} outliers",
            clusters.len(),
            remaining.len()
        );
        Ok(Clustering::new(clusters, remaining, core_count))
    }

    /// Breadth-first transitive closure of `seed` over the unvisited core
    /// points left in `pool`.
    fn expand(
        &self,
        seed: Point2D,
        pool: &mut BTreeSet<Point2D>,
        core: &HashMap<Point2D, CoreRecord>,
    ) -> Result<Vec<Point2D>> {
        let empty = CoreRecord::default();
        let record = |point: &Point2D| core.get(point).unwrap_or(&empty);

        let mut component = vec![seed];
        let mut frontier = vec![seed];
        while !frontier.is_empty() {
            let mut reached = Vec::new();
            for p in &frontier {
                let p_record = record(p);
                let mut hits = Vec::new();
                for q in pool.iter() {
                    if self.connected(p, p_record, q, record(q))? {
                        hits.push(*q);
                    }
                }
                for q in hits {
                    pool.remove(&q);
                    reached.push(q);
                }
            }
            component.extend_from_slice(&reached);
            frontier = reached;
        }
        Ok(component)
    }
}
