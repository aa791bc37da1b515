use photoncluster_algorithms::{
    dedup_points, ClusteringAlgorithm, DbscanClustering, DbscanConfig, DensityFilter,
    DensityFilterConfig, DistanceCache, KDistanceConfig, KDistanceEstimator,
};
use photoncluster_core::Point2D;
use proptest::prelude::*;

fn points_strategy(max: usize) -> impl Strategy<Value = Vec<Point2D>> {
    prop::collection::vec((-40i32..40, -40i32..40), 1..max).prop_map(|cells| {
        cells
            .into_iter()
            .map(|(x, y)| Point2D::new(f64::from(x) * 0.25, f64::from(y) * 0.25))
            .collect()
    })
}

fn dbscan(eps: f64, min_pts: usize, parallelism: usize) -> DbscanClustering {
    DbscanClustering::new(
        DbscanConfig::new(eps, min_pts)
            .with_parallelism(parallelism)
            .with_cache_capacity(1 << 12)
            .with_queue_capacity(4),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_partition_invariant(
        points in points_strategy(60),
        eps in 0.2f64..3.0,
        min_pts in 1usize..6,
    ) {
        let result = dbscan(eps, min_pts, 3).cluster(&points).unwrap();
        prop_assert!(result.is_partition_of(&points));
        prop_assert_eq!(result.len(), dedup_points(&points).len());
        let ids: Vec<i32> = result.clusters().map(|(id, _)| id).collect();
        let dense: Vec<i32> = (0..ids.len()).map(|i| i32::try_from(i).unwrap()).collect();
        prop_assert_eq!(ids, dense);
    }

    #[test]
    fn prop_anisotropic_partition_invariant(
        points in points_strategy(40),
        eps_a in 0.5f64..4.0,
        ratio in 0.05f64..1.0,
        sectors in 1usize..8,
        min_pts in 1usize..5,
    ) {
        let filter = DensityFilter::new(
            DensityFilterConfig::new(eps_a, eps_a * ratio, sectors, min_pts)
                .with_parallelism(2)
                .with_cache_capacity(1 << 12),
        )
        .unwrap();
        let result = filter.cluster(&points).unwrap();
        prop_assert!(result.is_partition_of(&points));
    }

    #[test]
    fn prop_idempotent_across_parallelism(
        points in points_strategy(50),
        eps in 0.2f64..2.0,
        min_pts in 1usize..5,
    ) {
        let first = dbscan(eps, min_pts, 1).cluster(&points).unwrap();
        let second = dbscan(eps, min_pts, 4).cluster(&points).unwrap();
        prop_assert_eq!(first.partition(), second.partition());
        prop_assert_eq!(first.outliers(), second.outliers());
    }

    #[test]
    fn prop_core_count_monotone_in_min_pts(
        points in points_strategy(50),
        eps in 0.2f64..2.0,
        min_pts in 1usize..6,
    ) {
        let lower = dbscan(eps, min_pts, 2).cluster(&points).unwrap();
        let higher = dbscan(eps, min_pts + 1, 2).cluster(&points).unwrap();
        prop_assert!(higher.core_count() <= lower.core_count());
    }

    #[test]
    fn prop_cache_symmetric_and_repeatable(
        points in points_strategy(20),
        capacity in 1usize..64,
    ) {
        let cache = DistanceCache::new(capacity).unwrap();
        for a in &points {
            for b in &points {
                let forward = cache.distance(a, b);
                let backward = cache.distance(b, a);
                prop_assert_eq!(forward.to_bits(), backward.to_bits());
                prop_assert_eq!(cache.distance(a, b).to_bits(), forward.to_bits());
            }
        }
    }

    #[test]
    fn prop_k_distance_matches_brute_force(
        points in points_strategy(40),
        k in 1usize..5,
    ) {
        let points = dedup_points(&points);
        prop_assume!(points.len() > k);
        let cache = DistanceCache::new(1 << 12).unwrap();
        let curve = KDistanceEstimator::new(KDistanceConfig { k, parallelism: 3 }, &cache)
            .unwrap()
            .estimate(&points)
            .unwrap();

        for record in curve.points() {
            let mut distances: Vec<f64> = points
                .iter()
                .filter(|q| **q != record.point)
                .map(|q| record.point.distance(q))
                .collect();
            distances.sort_by(f64::total_cmp);
            prop_assert!((distances[k - 1] - record.k_distance).abs() < 1e-12);
        }
        prop_assert!(curve.points().windows(2).all(|w| w[0].k_distance <= w[1].k_distance));
    }
}
