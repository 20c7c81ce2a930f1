//! Property tests for mapping, clustering and scheduling.

use proptest::prelude::*;
use visifruit::detection::{BoundingBox, Detection, FruitClass};
use visifruit::geometry::{BeltPoint, BeltPosition};
use visifruit::kinematics::BeltKinematicsConfig;
use visifruit_engine::cluster::cluster_points;
use visifruit_engine::mapper::map;
use visifruit_engine::scheduler::{activation_duration_ms, schedule};
use visifruit_engine::{FrameTiming, SchedulingError};

fn config() -> BeltKinematicsConfig {
    BeltKinematicsConfig::new(0.6, 0.4, 0.0, 1.2)
}

/// Point tagged with its input index in `frame_timestamp_us`.
fn tagged_point(index: usize, lateral_m: f64, longitudinal_m: f64) -> BeltPoint {
    BeltPoint {
        position: BeltPosition {
            lateral_m,
            longitudinal_m,
        },
        width_m: 0.05,
        length_m: 0.05,
        size_m: 0.07,
        truncated: false,
        detection: Detection {
            class: FruitClass::Apple,
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            frame_timestamp_us: index as u64,
            frame_width: 640,
            frame_height: 480,
        },
    }
}

fn bbox_strategy() -> impl Strategy<Value = BoundingBox> {
    (0.0f64..600.0, 0.0f64..440.0, 1.0f64..40.0, 1.0f64..40.0)
        .prop_map(|(x, y, w, h)| BoundingBox::new(x, y, x + w, y + h))
}

proptest! {
    #[test]
    fn mapping_is_pure(bbox in bbox_strategy()) {
        let cfg = config();
        let det = Detection {
            class: FruitClass::Lemon,
            confidence: 0.7,
            bbox,
            frame_timestamp_us: 5,
            frame_width: 640,
            frame_height: 480,
        };
        let a = map(&det, 640, 480, &cfg).unwrap();
        let b = map(&det, 640, 480, &cfg).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn clusters_are_eps_connected_components(
        coords in prop::collection::vec((0.0f64..0.6, -0.3f64..0.3), 1..40)
    ) {
        let cfg = config();
        let eps = cfg.cluster_eps_m;
        let points: Vec<BeltPoint> = coords
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon))| tagged_point(i, lat, lon))
            .collect();
        let clusters = cluster_points(points.clone(), &cfg);

        let mut owner = vec![usize::MAX; points.len()];
        for c in &clusters {
            for m in &c.members {
                owner[m.detection.frame_timestamp_us as usize] = c.id;
            }
        }
        // Every point lands in exactly one cluster.
        prop_assert!(owner.iter().all(|&o| o != usize::MAX));
        prop_assert_eq!(
            clusters.iter().map(|c| c.member_count()).sum::<usize>(),
            points.len()
        );

        for i in 0..points.len() {
            let mut has_neighbour = false;
            for j in 0..points.len() {
                if i != j && points[i].distance_to(&points[j]) <= eps {
                    has_neighbour = true;
                    prop_assert_eq!(owner[i], owner[j]);
                }
            }
            let size = clusters.iter().find(|c| c.id == owner[i]).map(|c| c.member_count());
            if !has_neighbour {
                prop_assert_eq!(size, Some(1));
            } else {
                prop_assert!(size.unwrap_or(0) > 1);
            }
        }
    }

    #[test]
    fn duration_non_decreasing_in_member_count(
        lat in 0.1f64..0.5,
        lon in -0.2f64..0.2,
        extra in 1usize..20,
    ) {
        let cfg = config();
        let base = cluster_points(vec![tagged_point(0, lat, lon)], &cfg).remove(0);
        let mut previous = activation_duration_ms(&base, &cfg);
        prop_assert!(previous >= cfg.base_activation_time_ms);

        // Same layout, more fruit stacked on it.
        let mut grown = base.clone();
        for i in 0..extra {
            grown.members.push(tagged_point(i + 1, lat, lon));
            let d = activation_duration_ms(&grown, &cfg);
            prop_assert!(d >= previous);
            previous = d;
        }
    }

    #[test]
    fn valid_geometry_gives_positive_delay(
        speed in 0.05f64..2.0,
        distance in 0.3f64..5.0,
        lon in -0.2f64..0.2,
    ) {
        let cfg = BeltKinematicsConfig::new(0.6, speed, 0.0, distance);
        let clusters = cluster_points(vec![tagged_point(0, 0.3, lon)], &cfg);
        let timing = FrameTiming { frame_sequence: 0, captured_at_us: 1_000, created_at_us: 1_000 };
        let outcome = schedule(&clusters, timing, &cfg).unwrap();
        prop_assert_eq!(outcome.activations.len(), 1);
        prop_assert!(outcome.activations[0].delay_ms > 0.0);
        prop_assert!(outcome.activations[0].fire_at_us > 1_000);
    }

    #[test]
    fn non_positive_speed_or_distance_is_configuration_error(
        speed in -1.0f64..=0.0,
        distance in -1.0f64..=0.0,
        which in 0u8..2,
    ) {
        let cfg = if which == 0 {
            BeltKinematicsConfig::new(0.6, speed, 0.0, 1.0)
        } else {
            BeltKinematicsConfig::new(0.6, 0.5, 0.0, distance)
        };
        let clusters = cluster_points(vec![tagged_point(0, 0.3, 0.0)], &cfg);
        let timing = FrameTiming { frame_sequence: 0, captured_at_us: 0, created_at_us: 0 };
        prop_assert!(matches!(
            schedule(&clusters, timing, &cfg),
            Err(SchedulingError::Configuration(_))
        ));
    }
}
