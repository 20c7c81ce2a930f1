//! Inference transport configuration.
//!
//! Loaded from the `[inference]` section of the engine configuration.
//! Every sub-table is optional; omitted values take the defaults from
//! [`crate::consts`].
//!
//! # TOML Example
//!
//! ```toml
//! [inference]
//! server_url = "http://gpu-box:9000"
//! auth_token = "line-1-token"
//! fallback = "local"
//! local_model = "replay"
//!
//! [inference.timeouts]
//! connect_ms = 300
//!
//! [inference.circuit_breaker]
//! failure_threshold = 5
//! cooldown_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::consts::{
    CACHE_CAPACITY_DEFAULT, CACHE_TTL_MS_DEFAULT, CLASS_NAMES_DEFAULT,
    CONFIDENCE_THRESHOLD_DEFAULT, CONNECT_TIMEOUT_MS_DEFAULT, COOLDOWN_MS_DEFAULT,
    FAILURE_THRESHOLD_DEFAULT, HEALTH_CACHE_TTL_MS_DEFAULT, HEALTH_INTERVAL_MS_DEFAULT,
    HEALTH_PATH_DEFAULT, INFER_PATH_DEFAULT, INPUT_SIZE_DEFAULT, IOU_THRESHOLD_DEFAULT,
    JPEG_QUALITY_DEFAULT, LOCAL_TIMEOUT_MS_DEFAULT, MAX_DETECTIONS_DEFAULT,
    MAX_DIMENSION_DEFAULT, READ_TIMEOUT_MS_DEFAULT, SERVER_URL_DEFAULT, WRITE_TIMEOUT_MS_DEFAULT,
};

/// What to do with a frame when the remote backend cannot serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Run the local CPU model on the same frame.
    #[default]
    Local,
    /// Surface the remote error; the caller skips the frame.
    Skip,
}

/// Independent network timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// TCP/TLS connect timeout [ms].
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Response read timeout [ms].
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    /// Request upload timeout [ms].
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
}

fn default_connect_ms() -> u64 {
    CONNECT_TIMEOUT_MS_DEFAULT
}
fn default_read_ms() -> u64 {
    READ_TIMEOUT_MS_DEFAULT
}
fn default_write_ms() -> u64 {
    WRITE_TIMEOUT_MS_DEFAULT
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: CONNECT_TIMEOUT_MS_DEFAULT,
            read_ms: READ_TIMEOUT_MS_DEFAULT,
            write_ms: WRITE_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
    /// Read timeout.
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
    /// Write timeout.
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
    /// Upper bound for one complete request.
    pub fn request_budget(&self) -> Duration {
        self.connect() + self.write() + self.read()
    }
}

/// Upload compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressionConfig {
    /// JPEG quality (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Frames larger than this on either side are downscaled [px].
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Lower the quality for large frames.
    #[serde(default = "default_true")]
    pub auto_quality: bool,
}

fn default_jpeg_quality() -> u8 {
    JPEG_QUALITY_DEFAULT
}
fn default_max_dimension() -> u32 {
    MAX_DIMENSION_DEFAULT
}
fn default_true() -> bool {
    true
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: JPEG_QUALITY_DEFAULT,
            max_dimension: MAX_DIMENSION_DEFAULT,
            auto_quality: true,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the breaker stays open before a probe is allowed [ms].
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    FAILURE_THRESHOLD_DEFAULT
}
fn default_cooldown_ms() -> u64 {
    COOLDOWN_MS_DEFAULT
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FAILURE_THRESHOLD_DEFAULT,
            cooldown_ms: COOLDOWN_MS_DEFAULT,
        }
    }
}

impl BreakerConfig {
    /// Cool-down as a duration.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Detection result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Serve repeated frames from the cache.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry lifetime [ms].
    #[serde(default = "default_cache_ttl")]
    pub ttl_ms: u64,
    /// Maximum number of entries.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_ttl() -> u64 {
    CACHE_TTL_MS_DEFAULT
}
fn default_cache_capacity() -> usize {
    CACHE_CAPACITY_DEFAULT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: CACHE_TTL_MS_DEFAULT,
            capacity: CACHE_CAPACITY_DEFAULT,
        }
    }
}

/// Remote health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// How long a health result is reused [ms].
    #[serde(default = "default_health_ttl")]
    pub cache_ttl_ms: u64,
    /// Background probe period [ms].
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
}

fn default_health_ttl() -> u64 {
    HEALTH_CACHE_TTL_MS_DEFAULT
}
fn default_health_interval() -> u64 {
    HEALTH_INTERVAL_MS_DEFAULT
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: HEALTH_CACHE_TTL_MS_DEFAULT,
            interval_ms: HEALTH_INTERVAL_MS_DEFAULT,
        }
    }
}

/// Inference transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    /// Use the remote GPU service at all.
    #[serde(default = "default_true")]
    pub remote_enabled: bool,
    /// Base URL of the remote service.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Inference endpoint path.
    #[serde(default = "default_infer_path")]
    pub infer_path: String,
    /// Health endpoint path.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Behaviour when the remote path is unavailable.
    #[serde(default)]
    pub fallback: FallbackPolicy,
    /// Registered local model name (e.g. "replay").
    #[serde(default)]
    pub local_model: Option<String>,
    /// Model artifact/script for the local model.
    #[serde(default)]
    pub local_model_path: Option<PathBuf>,
    /// Budget for one local inference [ms].
    #[serde(default = "default_local_timeout")]
    pub local_timeout_ms: u64,

    /// Detections below this confidence are discarded.
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    /// NMS IoU threshold forwarded to the detector.
    #[serde(default = "default_iou")]
    pub iou_threshold: f32,
    /// Detector input size [px].
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// Maximum detections per frame.
    #[serde(default = "default_max_detections")]
    pub max_detections: u32,
    /// Class names indexed by class id.
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    /// Detect and correct swapped red/blue channels.
    #[serde(default = "default_true")]
    pub auto_correct_channels: bool,

    /// Network timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Upload compression.
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Circuit breaker.
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    /// Result cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Health probing.
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_server_url() -> String {
    SERVER_URL_DEFAULT.to_string()
}
fn default_infer_path() -> String {
    INFER_PATH_DEFAULT.to_string()
}
fn default_health_path() -> String {
    HEALTH_PATH_DEFAULT.to_string()
}
fn default_local_timeout() -> u64 {
    LOCAL_TIMEOUT_MS_DEFAULT
}
fn default_confidence() -> f32 {
    CONFIDENCE_THRESHOLD_DEFAULT
}
fn default_iou() -> f32 {
    IOU_THRESHOLD_DEFAULT
}
fn default_input_size() -> u32 {
    INPUT_SIZE_DEFAULT
}
fn default_max_detections() -> u32 {
    MAX_DETECTIONS_DEFAULT
}
fn default_class_names() -> Vec<String> {
    CLASS_NAMES_DEFAULT.iter().map(|s| s.to_string()).collect()
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            server_url: default_server_url(),
            infer_path: default_infer_path(),
            health_path: default_health_path(),
            auth_token: None,
            fallback: FallbackPolicy::default(),
            local_model: None,
            local_model_path: None,
            local_timeout_ms: LOCAL_TIMEOUT_MS_DEFAULT,
            confidence_threshold: CONFIDENCE_THRESHOLD_DEFAULT,
            iou_threshold: IOU_THRESHOLD_DEFAULT,
            input_size: INPUT_SIZE_DEFAULT,
            max_detections: MAX_DETECTIONS_DEFAULT,
            class_names: default_class_names(),
            auto_correct_channels: true,
            timeouts: TimeoutConfig::default(),
            compression: CompressionConfig::default(),
            circuit_breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl InferenceConfig {
    /// Budget for one local inference.
    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }

    /// Join the base URL with an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.remote_enabled
            && !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://"))
        {
            return invalid(format!(
                "inference.server_url '{}' must be an http(s) URL",
                self.server_url
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "inference.confidence_threshold {} out of range [0, 1]",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return invalid(format!(
                "inference.iou_threshold {} out of range [0, 1]",
                self.iou_threshold
            ));
        }
        if !(320..=1280).contains(&self.input_size) {
            return invalid(format!(
                "inference.input_size {} out of range [320, 1280]",
                self.input_size
            ));
        }
        if !(1..=300).contains(&self.max_detections) {
            return invalid(format!(
                "inference.max_detections {} out of range [1, 300]",
                self.max_detections
            ));
        }
        if self.timeouts.connect_ms == 0 || self.timeouts.read_ms == 0 || self.timeouts.write_ms == 0
        {
            return invalid("inference.timeouts must all be > 0".to_string());
        }
        if !(1..=100).contains(&self.compression.jpeg_quality) {
            return invalid(format!(
                "inference.compression.jpeg_quality {} out of range [1, 100]",
                self.compression.jpeg_quality
            ));
        }
        if self.compression.max_dimension < 32 {
            return invalid(format!(
                "inference.compression.max_dimension {} below 32",
                self.compression.max_dimension
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("inference.circuit_breaker.failure_threshold must be >= 1".to_string());
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return invalid("inference.cache.capacity must be >= 1 when enabled".to_string());
        }
        if self.local_timeout_ms == 0 {
            return invalid("inference.local_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = InferenceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.class_names, vec!["apple", "pear", "lemon"]);
        assert_eq!(cfg.fallback, FallbackPolicy::Local);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = InferenceConfig {
            server_url: "http://gpu:9000/".into(),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint("/infer"), "http://gpu:9000/infer");
        assert_eq!(cfg.endpoint("health"), "http://gpu:9000/health");
    }

    #[test]
    fn request_budget_sums_phases() {
        let t = TimeoutConfig {
            connect_ms: 200,
            read_ms: 800,
            write_ms: 500,
        };
        assert_eq!(t.request_budget(), Duration::from_millis(1500));
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut cfg = InferenceConfig::default();
        cfg.circuit_breaker.failure_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_url_rejected_only_when_remote_enabled() {
        let mut cfg = InferenceConfig {
            server_url: "gpu:9000".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.remote_enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: InferenceConfig = toml::from_str(
            r#"
fallback = "skip"
[circuit_breaker]
failure_threshold = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.fallback, FallbackPolicy::Skip);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.circuit_breaker.cooldown_ms, COOLDOWN_MS_DEFAULT);
        assert_eq!(cfg.timeouts.connect_ms, CONNECT_TIMEOUT_MS_DEFAULT);
    }
}
