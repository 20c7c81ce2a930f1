//! Engine configuration loading tests.
//!
//! Full-file parsing through `ConfigLoader`, required kinematics fields,
//! nested inference tables, actuator zones and validation bounds.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use visifruit_common::config::{ConfigError, ConfigLoader, EngineConfig, LogLevel};
use visifruit_common::inference::FallbackPolicy;
use visifruit_common::kinematics::{SharedKinematics, TravelDirection};

const FULL: &str = r#"
[shared]
service_name = "visifruit-line-1"
log_level = "debug"

[kinematics]
belt_width_m = 0.25
belt_speed_mps = 0.15
camera_position_m = 0.20
actuator_position_m = 0.80
travel_direction = "up"
cluster_eps_m = 0.08
base_activation_time_ms = 200.0
time_per_additional_fruit_ms = 150.0
safety_margin_ms = 50.0
row_factor = 1.3
column_factor = 1.2
density_factor = 1.4
intensity_pct = 80.0

[[kinematics.actuators]]
id = "L1"
lateral_min_m = 0.0
lateral_max_m = 0.125
classes = ["apple"]

[[kinematics.actuators]]
id = "L2"
lateral_min_m = 0.125
lateral_max_m = 0.25
position_m = 0.9

[inference]
server_url = "http://gpu-box:9000"
auth_token = "secret"
fallback = "skip"
class_names = ["apple", "pear", "lemon"]

[inference.timeouts]
connect_ms = 300
read_ms = 800
write_ms = 800

[inference.circuit_breaker]
failure_threshold = 5
cooldown_ms = 30000

[inference.cache]
enabled = false

[pipeline]
history_size = 64
capture_fps = 15.0
"#;

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn full_config_loads_every_section() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "visifruit.toml", FULL);

    let cfg = EngineConfig::load_validated(&path).unwrap();
    assert_eq!(cfg.shared.log_level, LogLevel::Debug);
    assert_eq!(cfg.kinematics.travel_direction, TravelDirection::Up);
    assert_eq!(cfg.kinematics.actuators.len(), 2);
    assert_eq!(cfg.kinematics.actuators[1].position_m, Some(0.9));
    assert!(cfg.kinematics.actuators[1].active);
    assert_eq!(cfg.inference.fallback, FallbackPolicy::Skip);
    assert_eq!(cfg.inference.auth_token.as_deref(), Some("secret"));
    assert_eq!(cfg.inference.timeouts.connect_ms, 300);
    assert_eq!(cfg.inference.circuit_breaker.failure_threshold, 5);
    assert!(!cfg.inference.cache.enabled);
    assert_eq!(cfg.pipeline.history_size, 64);
}

#[test]
fn missing_belt_speed_is_parse_error() {
    let content = FULL.replace("belt_speed_mps = 0.15\n", "");
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "visifruit.toml", &content);

    match EngineConfig::load(&path) {
        Err(ConfigError::ParseError(msg)) => assert!(msg.contains("belt_speed_mps")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn zero_belt_speed_is_validation_error() {
    let content = FULL.replace("belt_speed_mps = 0.15", "belt_speed_mps = 0.0");
    assert!(matches!(
        EngineConfig::from_toml_str(&content),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn zone_outside_belt_rejected() {
    let content = FULL.replace("lateral_max_m = 0.25", "lateral_max_m = 0.40");
    assert!(matches!(
        EngineConfig::from_toml_str(&content),
        Err(ConfigError::ValidationError(m)) if m.contains("L2")
    ));
}

#[test]
fn unknown_kinematics_field_rejected() {
    let content = FULL.replace("cluster_eps_m = 0.08", "cluster_eps = 0.08");
    assert!(matches!(
        EngineConfig::from_toml_str(&content),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn reload_swaps_kinematics_snapshot() {
    let cfg = EngineConfig::from_toml_str(FULL).unwrap();
    let shared = SharedKinematics::new(cfg.kinematics.clone()).unwrap();

    let faster = FULL.replace("belt_speed_mps = 0.15", "belt_speed_mps = 0.30");
    let reloaded = EngineConfig::from_toml_str(&faster).unwrap();
    assert_eq!(shared.replace(reloaded.kinematics).unwrap(), 1);
    assert_eq!(shared.snapshot().belt_speed_mps, 0.30);
}

#[test]
fn shipped_sample_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/visifruit.toml");
    let cfg = EngineConfig::load_validated(&path).unwrap();
    assert_eq!(cfg.shared.service_name, "visifruit-line-1");
    assert_eq!(cfg.kinematics.actuators.len(), 2);
    assert_eq!(cfg.inference.local_model.as_deref(), Some("onnx"));
    assert!(cfg.inference.local_model_path.is_some());
}
