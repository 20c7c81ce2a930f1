//! System-wide constants for the VisiFruit workspace.
//!
//! Single source of truth for numeric defaults and limits. Installation
//! specific values (belt geometry, timing constants) live in configuration;
//! the defaults here mirror the reference conveyor.

// ─── Clustering / timing defaults ───────────────────────────────────

/// Default clustering neighbourhood radius [m].
pub const CLUSTER_EPS_M_DEFAULT: f64 = 0.08;

/// Default activation time for a single fruit [ms].
pub const BASE_ACTIVATION_MS_DEFAULT: f64 = 200.0;

/// Default extra activation time per additional fruit in a cluster [ms].
pub const PER_FRUIT_MS_DEFAULT: f64 = 150.0;

/// Default safety margin appended to every activation [ms].
pub const SAFETY_MARGIN_MS_DEFAULT: f64 = 50.0;

/// Default duration multiplier per additional estimated row.
pub const ROW_FACTOR_DEFAULT: f64 = 1.3;

/// Default duration multiplier per additional estimated column.
pub const COLUMN_FACTOR_DEFAULT: f64 = 1.2;

/// Default duration multiplier for dense clusters.
pub const DENSITY_FACTOR_DEFAULT: f64 = 1.4;

/// Default density above which the density multiplier applies [fruits/m²].
pub const DENSITY_THRESHOLD_DEFAULT: f64 = 500.0;

/// Default band tolerance, as a fraction of the mean fruit extent.
pub const BAND_TOLERANCE_DEFAULT: f64 = 0.5;

/// Smallest cluster footprint used for density computation [m²] (5 cm × 5 cm).
pub const MIN_CLUSTER_AREA_M2: f64 = 0.0025;

/// Longest camera-to-actuator transit accepted by validation [s].
pub const MAX_TRANSIT_S: f64 = 600.0;

/// Default activation power [%].
pub const INTENSITY_PCT_DEFAULT: f64 = 100.0;

// ─── Inference defaults ─────────────────────────────────────────────

/// Default remote inference endpoint.
pub const SERVER_URL_DEFAULT: &str = "http://localhost:9000";

/// Default inference path on the remote server.
pub const INFER_PATH_DEFAULT: &str = "/infer";

/// Default health path on the remote server.
pub const HEALTH_PATH_DEFAULT: &str = "/health";

/// Default connect timeout [ms]. Kept short so a dead server fails fast.
pub const CONNECT_TIMEOUT_MS_DEFAULT: u64 = 500;

/// Default read timeout [ms].
pub const READ_TIMEOUT_MS_DEFAULT: u64 = 1000;

/// Default write timeout [ms].
pub const WRITE_TIMEOUT_MS_DEFAULT: u64 = 1000;

/// Default JPEG quality for uploads.
pub const JPEG_QUALITY_DEFAULT: u8 = 85;

/// Default maximum upload dimension [px].
pub const MAX_DIMENSION_DEFAULT: u32 = 640;

/// Default consecutive failures before the breaker opens.
pub const FAILURE_THRESHOLD_DEFAULT: u32 = 3;

/// Default breaker cool-down [ms].
pub const COOLDOWN_MS_DEFAULT: u64 = 20_000;

/// Default result cache TTL [ms].
pub const CACHE_TTL_MS_DEFAULT: u64 = 60_000;

/// Default result cache capacity [entries].
pub const CACHE_CAPACITY_DEFAULT: usize = 100;

/// Default health result cache TTL [ms].
pub const HEALTH_CACHE_TTL_MS_DEFAULT: u64 = 5_000;

/// Default background health probe interval [ms].
pub const HEALTH_INTERVAL_MS_DEFAULT: u64 = 10_000;

/// Default confidence threshold.
pub const CONFIDENCE_THRESHOLD_DEFAULT: f32 = 0.5;

/// Default IoU threshold forwarded to the detector.
pub const IOU_THRESHOLD_DEFAULT: f32 = 0.45;

/// Default detector input size [px].
pub const INPUT_SIZE_DEFAULT: u32 = 640;

/// Default maximum detections per frame.
pub const MAX_DETECTIONS_DEFAULT: u32 = 100;

/// Default budget for one local (CPU) inference [ms].
pub const LOCAL_TIMEOUT_MS_DEFAULT: u64 = 2_000;

// ─── Pipeline defaults ──────────────────────────────────────────────

/// Default number of recent activations kept in telemetry.
pub const HISTORY_SIZE_DEFAULT: usize = 256;

/// Default frame rate of the simulated capture source [fps].
pub const CAPTURE_FPS_DEFAULT: f64 = 10.0;

/// Default class list of the reference detector.
pub const CLASS_NAMES_DEFAULT: [&str; 3] = ["apple", "pear", "lemon"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_defaults_are_consistent() {
        assert!(BASE_ACTIVATION_MS_DEFAULT > 0.0);
        assert!(PER_FRUIT_MS_DEFAULT >= 0.0);
        assert!(SAFETY_MARGIN_MS_DEFAULT >= 0.0);
        assert!(ROW_FACTOR_DEFAULT >= 1.0);
        assert!(COLUMN_FACTOR_DEFAULT >= 1.0);
        assert!(DENSITY_FACTOR_DEFAULT >= 1.0);
    }

    #[test]
    fn connect_timeout_is_shorter_than_read() {
        assert!(CONNECT_TIMEOUT_MS_DEFAULT < READ_TIMEOUT_MS_DEFAULT);
    }
}
