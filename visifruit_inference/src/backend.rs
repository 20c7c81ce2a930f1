//! Backend strategy interface and shared detection post-processing.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::compress::PreparedFrame;
use crate::error::InferenceError;
use visifruit::detection::{BackendKind, BoundingBox, Detection, DetectionResult, FruitClass};
use visifruit::inference::InferenceConfig;

/// A detection source: remote GPU service or local CPU model.
///
/// The client selects between implementations based on breaker state; a
/// backend never consults the breaker itself.
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run detection on a prepared frame.
    fn infer(
        &self,
        frame: &PreparedFrame,
    ) -> impl Future<Output = Result<DetectionResult, InferenceError>> + Send;
}

/// Backend health reported by the remote `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub requests_served: Option<u64>,
}

impl HealthStatus {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Lightweight availability probe.
pub trait HealthProbe: Send + Sync {
    fn health(&self) -> impl Future<Output = Result<HealthStatus, InferenceError>> + Send;
}

/// Detection as a model reports it, in model-input pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub class_id: Option<u32>,
    #[serde(default)]
    pub class_name: Option<String>,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f64; 4],
}

impl RawDetection {
    fn class(&self, class_names: &[String]) -> FruitClass {
        match (&self.class_name, self.class_id) {
            (Some(name), _) if !name.trim().is_empty() => FruitClass::from_name(name),
            (_, Some(id)) => FruitClass::from_id(id, class_names),
            _ => FruitClass::Other("unknown".to_string()),
        }
    }
}

/// Filter, rescale and clip raw detections for `frame`.
///
/// `scale_x`/`scale_y` map model pixels back to source pixels. The output
/// holds only detections at or above the confidence threshold, sorted by
/// descending confidence and capped at `max_detections`.
pub fn finalize_detections(
    raw: Vec<RawDetection>,
    scale_x: f64,
    scale_y: f64,
    frame: &PreparedFrame,
    config: &InferenceConfig,
) -> Vec<Detection> {
    let (w, h) = (frame.width(), frame.height());
    let mut out: Vec<Detection> = raw
        .into_iter()
        .filter(|r| r.confidence.is_finite() && r.confidence >= config.confidence_threshold)
        .map(|r| {
            let [x1, y1, x2, y2] = r.bbox;
            let bbox = BoundingBox::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
                .scale(scale_x, scale_y)
                .clip(w, h);
            Detection {
                class: r.class(&config.class_names),
                confidence: r.confidence.min(1.0),
                bbox,
                frame_timestamp_us: frame.captured_at_us,
                frame_width: w,
                frame_height: h,
            }
        })
        .collect();
    out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    out.truncate(config.max_detections as usize);
    out
}
