//! End-to-end scheduling scenarios on a calibrated test belt.
//!
//! Geometry: 0.64 m belt seen by a 640×480 frame (1 mm per pixel), camera
//! line at 0 m, labeler at 1.0 m, belt at 0.5 m/s. Every fruit box is
//! 50 px (0.05 m) square.

use std::sync::Arc;

use visifruit::activation::ActuatorTarget;
use visifruit::detection::{BackendKind, BoundingBox, Detection, DetectionResult, FruitClass};
use visifruit::kinematics::{ActuatorZone, BeltKinematicsConfig, SharedKinematics};
use visifruit_engine::scheduler::activation_duration_ms;
use visifruit_engine::{
    ChannelDispatcher, Engine, FrameTiming, SchedulingError, Telemetry, plan_cycle,
};

// ─── Helpers ────────────────────────────────────────────────────────

const FRUIT_PX: f64 = 50.0;
const CAPTURED_AT: u64 = 10_000_000;
const CREATED_AT: u64 = 10_020_000;

fn belt() -> BeltKinematicsConfig {
    BeltKinematicsConfig::new(0.64, 0.5, 0.0, 1.0)
}

/// Fruit centred at belt coordinates (lateral, longitudinal) in meters.
fn fruit(class: FruitClass, lateral_m: f64, longitudinal_m: f64) -> Detection {
    let cx = lateral_m * 1_000.0;
    let cy = 240.0 + longitudinal_m * 1_000.0;
    let half = FRUIT_PX / 2.0;
    Detection {
        class,
        confidence: 0.9,
        bbox: BoundingBox::new(cx - half, cy - half, cx + half, cy + half),
        frame_timestamp_us: CAPTURED_AT,
        frame_width: 640,
        frame_height: 480,
    }
}

fn frame_result(detections: Vec<Detection>) -> DetectionResult {
    let mut r = DetectionResult::empty(BackendKind::Remote, CAPTURED_AT, 640, 480);
    r.detections = detections;
    r
}

fn timing() -> FrameTiming {
    FrameTiming {
        frame_sequence: 1,
        captured_at_us: CAPTURED_AT,
        created_at_us: CREATED_AT,
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// ─── Scenario A: diagonal line of three ────────────────────────────

#[test]
fn scenario_a_three_in_a_line() {
    let cfg = belt();
    let dets = vec![
        fruit(FruitClass::Apple, 0.10, 0.00),
        fruit(FruitClass::Apple, 0.12, 0.02),
        fruit(FruitClass::Apple, 0.14, 0.04),
    ];
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();

    assert_eq!(plan.clusters.len(), 1);
    let c = &plan.clusters[0];
    assert_eq!(c.member_count(), 3);
    assert_eq!((c.rows, c.columns), (1, 1));

    let a = &plan.activations[0];
    assert!(approx(a.spatial_factor, 1.0));
    let expected = cfg.base_activation_time_ms + 2.0 * cfg.time_per_additional_fruit_ms;
    assert!(approx(a.duration_ms, expected + cfg.safety_margin_ms));
    assert_eq!(a.cluster_member_count, 3);
}

// ─── Scenario B: 2×3 grid ───────────────────────────────────────────

#[test]
fn scenario_b_two_by_three_grid() {
    let cfg = belt();
    let mut dets = Vec::new();
    for lon in [0.0, 0.05] {
        for lat in [0.05, 0.10, 0.15] {
            dets.push(fruit(FruitClass::Pear, lat, lon));
        }
    }
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();

    assert_eq!(plan.clusters.len(), 1);
    let c = &plan.clusters[0];
    assert_eq!(c.member_count(), 6);
    assert_eq!(c.rows, 2);
    assert_eq!(c.columns, 3);
    assert!(approx(c.extent.width_m(), 0.15));
    assert!(approx(c.extent.length_m(), 0.10));

    // One extra row and two extra columns: row once, column twice. Six fruit
    // would compound five times if the factors were applied per fruit.
    let factor = cfg.row_factor * cfg.column_factor * cfg.column_factor;
    let a = &plan.activations[0];
    assert!(approx(a.spatial_factor, factor));
    let base = cfg.base_activation_time_ms + 5.0 * cfg.time_per_additional_fruit_ms;
    assert!(approx(a.duration_ms, base * factor + cfg.safety_margin_ms));
    assert_eq!(a.majority_class, Some(FruitClass::Pear));
}

// ─── Scenario C: two isolated fruit ─────────────────────────────────

#[test]
fn scenario_c_two_singletons() {
    let cfg = belt();
    let dets = vec![
        fruit(FruitClass::Lemon, 0.15, 0.0),
        fruit(FruitClass::Lemon, 0.45, 0.0),
    ];
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();

    assert_eq!(plan.clusters.len(), 2);
    assert_eq!(plan.activations.len(), 2);
    let single = cfg.base_activation_time_ms + cfg.safety_margin_ms;
    for a in &plan.activations {
        assert_eq!(a.cluster_member_count, 1);
        assert!(approx(a.duration_ms, single));
        // Leading edge 0.025 m past the camera line: 0.975 m at 0.5 m/s.
        assert!(approx(a.delay_ms, 1_950.0));
        assert_eq!(a.fire_at_us, CAPTURED_AT + 1_950_000);
    }
}

// ─── Timing and failure semantics ───────────────────────────────────

#[test]
fn upstream_fruit_fires_later() {
    let cfg = belt();
    let dets = vec![
        fruit(FruitClass::Apple, 0.10, -0.20),
        fruit(FruitClass::Apple, 0.40, 0.10),
    ];
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();
    assert_eq!(plan.activations.len(), 2);
    let (first, second) = (&plan.activations[0], &plan.activations[1]);
    assert!(first.fire_at_us < second.fire_at_us);
    // 0.30 m apart at 0.5 m/s.
    assert_eq!(second.fire_at_us - first.fire_at_us, 600_000);
}

#[test]
fn missing_speed_fails_closed() {
    let mut cfg = belt();
    cfg.belt_speed_mps = 0.0;
    let dets = vec![fruit(FruitClass::Apple, 0.3, 0.0)];
    assert!(matches!(
        plan_cycle(&frame_result(dets), timing(), &cfg),
        Err(SchedulingError::Configuration(_))
    ));
}

#[test]
fn degenerate_and_empty_inputs_are_not_errors() {
    let cfg = belt();
    let plan = plan_cycle(&frame_result(Vec::new()), timing(), &cfg).unwrap();
    assert!(plan.activations.is_empty());

    let mut flat = fruit(FruitClass::Apple, 0.3, 0.0);
    flat.bbox.y_max = flat.bbox.y_min;
    let plan = plan_cycle(&frame_result(vec![flat]), timing(), &cfg).unwrap();
    assert!(plan.activations.is_empty());
    assert_eq!(plan.dropped.len(), 1);
}

#[test]
fn zones_route_by_lateral_position_and_class() {
    let mut cfg = belt();
    cfg.actuators = vec![
        ActuatorZone {
            id: "left".into(),
            lateral_min_m: 0.0,
            lateral_max_m: 0.32,
            classes: vec![],
            position_m: None,
            active: true,
        },
        ActuatorZone {
            id: "right-lemons".into(),
            lateral_min_m: 0.32,
            lateral_max_m: 0.64,
            classes: vec!["lemon".into()],
            position_m: Some(1.5),
            active: true,
        },
    ];
    let dets = vec![
        fruit(FruitClass::Apple, 0.10, 0.0),
        fruit(FruitClass::Lemon, 0.50, 0.0),
        fruit(FruitClass::Apple, 0.50, -0.2),
    ];
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();
    let targets: Vec<&ActuatorTarget> = plan.activations.iter().map(|a| &a.actuator).collect();
    assert_eq!(
        targets,
        vec![
            &ActuatorTarget::Zone("left".into()),
            &ActuatorTarget::Unassigned,
            &ActuatorTarget::Zone("right-lemons".into()),
        ]
    );
    // The lemon zone sits 0.5 m further downstream.
    let lemon = &plan.activations[2];
    assert!(approx(lemon.delay_ms, (1.5 - 0.025) / 0.5 * 1_000.0));
}

#[test]
fn duration_floor_is_base_time() {
    let cfg = belt();
    let dets: Vec<Detection> = (0..8)
        .map(|i| fruit(FruitClass::Apple, 0.05 + 0.06 * f64::from(i), 0.0))
        .collect();
    let plan = plan_cycle(&frame_result(dets), timing(), &cfg).unwrap();
    for c in &plan.clusters {
        assert!(activation_duration_ms(c, &cfg) >= cfg.base_activation_time_ms);
    }
}

// ─── Engine with reload ─────────────────────────────────────────────

#[test]
fn reload_applies_from_next_frame() {
    let kinematics = Arc::new(SharedKinematics::new(belt()).unwrap());
    let (dispatcher, mut rx) = ChannelDispatcher::channel(16);
    let mut engine = Engine::new(
        Arc::clone(&kinematics),
        dispatcher,
        Arc::new(Telemetry::new(16)),
    );

    let first = frame_result(vec![fruit(FruitClass::Apple, 0.3, 0.0)]);
    engine.process_detections(1, &first, CREATED_AT).unwrap();
    assert!(approx(rx.try_recv().unwrap().delay_ms, 1_950.0));

    let mut faster = belt();
    faster.belt_speed_mps = 1.0;
    kinematics.replace(faster).unwrap();

    let mut second = frame_result(vec![fruit(FruitClass::Apple, 0.3, 0.0)]);
    second.frame_timestamp_us = CAPTURED_AT + 100_000;
    engine
        .process_detections(2, &second, CREATED_AT + 100_000)
        .unwrap();
    assert!(approx(rx.try_recv().unwrap().delay_ms, 975.0));

    // An invalid candidate is rejected and the running calibration stays.
    let mut broken = belt();
    broken.belt_speed_mps = -1.0;
    assert!(kinematics.replace(broken).is_err());
    assert!(approx(kinematics.snapshot().belt_speed_mps, 1.0));
}
