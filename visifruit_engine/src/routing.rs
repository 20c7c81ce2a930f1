//! Actuator routing.

use tracing::debug;
use visifruit::activation::ActuatorTarget;
use visifruit::geometry::Cluster;
use visifruit::kinematics::BeltKinematicsConfig;

/// Where a cluster is labeled and how far that is from the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub target: ActuatorTarget,
    /// Camera reference line to the labeling point [m].
    pub distance_m: f64,
}

/// Pick the actuator for a cluster.
///
/// First active zone that covers the centroid and accepts the majority
/// class wins. No zones, or no match, yields `Unassigned` at the default
/// actuator position.
pub fn route(cluster: &Cluster, config: &BeltKinematicsConfig) -> Route {
    let class = cluster.majority_class().map(|c| c.name()).unwrap_or_default();
    let lateral = cluster.centroid.lateral_m;

    let zone = config
        .actuators
        .iter()
        .filter(|z| z.active)
        .find(|z| z.covers(lateral) && z.accepts(class));

    match zone {
        Some(z) => Route {
            target: ActuatorTarget::Zone(z.id.clone()),
            distance_m: config.camera_to_zone_m(z),
        },
        None => {
            if !config.actuators.is_empty() {
                debug!(
                    "Cluster {} ({} at {:.3} m) matches no actuator zone",
                    cluster.id, class, lateral
                );
            }
            Route {
                target: ActuatorTarget::Unassigned,
                distance_m: config.camera_to_actuator_m(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster_points;
    use visifruit::detection::{BoundingBox, Detection, FruitClass};
    use visifruit::geometry::{BeltPoint, BeltPosition};
    use visifruit::kinematics::ActuatorZone;

    fn cluster_at(lat: f64, class: FruitClass, config: &BeltKinematicsConfig) -> Cluster {
        let p = BeltPoint {
            position: BeltPosition {
                lateral_m: lat,
                longitudinal_m: 0.0,
            },
            width_m: 0.05,
            length_m: 0.05,
            size_m: 0.07,
            truncated: false,
            detection: Detection {
                class,
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                frame_timestamp_us: 0,
                frame_width: 640,
                frame_height: 480,
            },
        };
        cluster_points(vec![p], config).remove(0)
    }

    fn zone(id: &str, min: f64, max: f64, classes: &[&str]) -> ActuatorZone {
        ActuatorZone {
            id: id.to_string(),
            lateral_min_m: min,
            lateral_max_m: max,
            classes: classes.iter().map(|c| c.to_string()).collect(),
            position_m: None,
            active: true,
        }
    }

    #[test]
    fn no_zones_is_unassigned() {
        let cfg = BeltKinematicsConfig::new(0.6, 0.5, 0.0, 1.0);
        let r = route(&cluster_at(0.3, FruitClass::Apple, &cfg), &cfg);
        assert_eq!(r.target, ActuatorTarget::Unassigned);
        assert!((r.distance_m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn first_matching_zone_wins() {
        let mut cfg = BeltKinematicsConfig::new(0.6, 0.5, 0.0, 1.0);
        cfg.actuators = vec![
            zone("left", 0.0, 0.3, &["lemon"]),
            zone("left-any", 0.0, 0.3, &[]),
            zone("right", 0.3, 0.6, &[]),
        ];
        cfg.actuators[2].position_m = Some(1.2);

        let r = route(&cluster_at(0.1, FruitClass::Apple, &cfg), &cfg);
        assert_eq!(r.target, ActuatorTarget::Zone("left-any".into()));

        let r = route(&cluster_at(0.1, FruitClass::Lemon, &cfg), &cfg);
        assert_eq!(r.target, ActuatorTarget::Zone("left".into()));

        let r = route(&cluster_at(0.5, FruitClass::Pear, &cfg), &cfg);
        assert_eq!(r.target, ActuatorTarget::Zone("right".into()));
        assert!((r.distance_m - 1.2).abs() < 1e-12);
    }

    #[test]
    fn inactive_zone_skipped() {
        let mut cfg = BeltKinematicsConfig::new(0.6, 0.5, 0.0, 1.0);
        cfg.actuators = vec![zone("only", 0.0, 0.6, &[])];
        cfg.actuators[0].active = false;
        let r = route(&cluster_at(0.3, FruitClass::Apple, &cfg), &cfg);
        assert_eq!(r.target, ActuatorTarget::Unassigned);
    }
}
