//! Spatial clusterer.
//!
//! DBSCAN with `min_pts = 1`: every point is a core point, so clusters are
//! the connected components of the "within `eps`" graph and there is no
//! noise class. An isolated fruit is a singleton cluster.

use visifruit::consts::MIN_CLUSTER_AREA_M2;
use visifruit::geometry::{BeltPoint, BeltPosition, Cluster, Extent};
use visifruit::kinematics::BeltKinematicsConfig;

/// Group one frame's points into clusters.
///
/// Output is ordered by leading edge, most downstream first, and cluster
/// ids follow that order.
pub fn cluster_points(points: Vec<BeltPoint>, config: &BeltKinematicsConfig) -> Vec<Cluster> {
    if points.is_empty() {
        return Vec::new();
    }

    let labels = connected_components(&points, config.cluster_eps_m);
    let count = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut groups: Vec<Vec<BeltPoint>> = (0..count).map(|_| Vec::new()).collect();
    for (point, label) in points.into_iter().zip(labels) {
        groups[label].push(point);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .filter_map(|members| build_cluster(members, config.band_tolerance))
        .collect();

    clusters.sort_by(|a, b| b.leading_edge_m().total_cmp(&a.leading_edge_m()));
    for (id, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = id;
    }
    clusters
}

/// Component label per point. Labels are dense, starting at 0.
fn connected_components(points: &[BeltPoint], eps: f64) -> Vec<usize> {
    const UNVISITED: usize = usize::MAX;
    let mut labels = vec![UNVISITED; points.len()];
    let mut next = 0;
    let mut stack = Vec::new();

    for seed in 0..points.len() {
        if labels[seed] != UNVISITED {
            continue;
        }
        labels[seed] = next;
        stack.push(seed);
        while let Some(i) = stack.pop() {
            for j in 0..points.len() {
                if labels[j] == UNVISITED && points[i].distance_to(&points[j]) <= eps {
                    labels[j] = next;
                    stack.push(j);
                }
            }
        }
        next += 1;
    }
    labels
}

fn build_cluster(mut members: Vec<BeltPoint>, band_tolerance: f64) -> Option<Cluster> {
    members.sort_by(|a, b| {
        a.longitudinal_m()
            .total_cmp(&b.longitudinal_m())
            .then(a.lateral_m().total_cmp(&b.lateral_m()))
    });
    let extent = Extent::of(&members)?;
    let n = members.len() as f64;

    let centroid = BeltPosition {
        lateral_m: members.iter().map(BeltPoint::lateral_m).sum::<f64>() / n,
        longitudinal_m: members.iter().map(BeltPoint::longitudinal_m).sum::<f64>() / n,
    };

    let mean_length = members.iter().map(|m| m.length_m).sum::<f64>() / n;
    let mean_width = members.iter().map(|m| m.width_m).sum::<f64>() / n;
    let rows = count_bands(
        members.iter().map(BeltPoint::longitudinal_m).collect(),
        mean_length * band_tolerance,
    );
    let columns = count_bands(
        members.iter().map(BeltPoint::lateral_m).collect(),
        mean_width * band_tolerance,
    );

    let density_per_m2 = n / extent.area_m2().max(MIN_CLUSTER_AREA_M2);

    Some(Cluster {
        id: 0,
        members,
        extent,
        centroid,
        rows,
        columns,
        density_per_m2,
    })
}

/// Number of bands along one axis.
///
/// Positions are sorted; a gap wider than `gap_m` between neighbours
/// starts a new band. At least one band for a non-empty input.
pub fn count_bands(mut positions: Vec<f64>, gap_m: f64) -> usize {
    if positions.is_empty() {
        return 0;
    }
    positions.sort_by(f64::total_cmp);
    1 + positions.windows(2).filter(|w| w[1] - w[0] > gap_m).count()
}
