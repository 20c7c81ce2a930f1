//! Local CPU fallback backend.
//!
//! A [`LocalModel`] is synchronous and potentially slow; [`LocalBackend`]
//! runs it on the blocking pool under a time budget so the async runtime
//! keeps serving health polls and signals meanwhile.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::{InferenceBackend, RawDetection, finalize_detections};
use crate::compress::PreparedFrame;
use crate::error::InferenceError;
use visifruit::clock::duration_ms;
use visifruit::detection::{BackendKind, DetectionResult};
use visifruit::inference::InferenceConfig;

/// A CPU-bound detector.
pub trait LocalModel: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Detect fruit in an RGB image. Boxes are in image pixels.
    fn detect(&self, image: &RgbImage, sequence: u64) -> Result<Vec<RawDetection>, InferenceError>;
}

/// Fallback backend wrapping a [`LocalModel`].
#[derive(Clone)]
pub struct LocalBackend {
    model: Arc<dyn LocalModel>,
    config: InferenceConfig,
    timeout: Duration,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("model", &self.model.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LocalBackend {
    pub fn new(model: Arc<dyn LocalModel>, config: InferenceConfig) -> Self {
        let timeout = config.local_timeout();
        info!(
            "Local fallback model '{}' ready (budget {} ms)",
            model.name(),
            timeout.as_millis()
        );
        Self {
            model,
            config,
            timeout,
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }
}

impl InferenceBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn infer(&self, frame: &PreparedFrame) -> Result<DetectionResult, InferenceError> {
        let model = Arc::clone(&self.model);
        let image = frame.image.clone();
        let sequence = frame.sequence;
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || model.detect(&image, sequence));
        let raw = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                return Err(InferenceError::Timeout {
                    backend: BackendKind::Local,
                    after_ms: self.timeout.as_millis() as u64,
                });
            }
            Ok(Err(join)) => {
                return Err(InferenceError::LocalModelUnavailable(format!(
                    "model task failed: {join}"
                )));
            }
            Ok(Ok(result)) => result?,
        };

        let latency_ms = duration_ms(started.elapsed());
        debug!(
            "Local inference frame {}: {} raw detections, {:.1} ms",
            sequence,
            raw.len(),
            latency_ms
        );
        Ok(DetectionResult {
            detections: finalize_detections(raw, 1.0, 1.0, frame, &self.config),
            latency_ms,
            backend: BackendKind::Local,
            frame_timestamp_us: frame.captured_at_us,
            frame_width: frame.width(),
            frame_height: frame.height(),
            device: Some("cpu".to_string()),
            server_timing: None,
        })
    }
}

// ─── Built-in models ────────────────────────────────────────────────

/// Model that never detects anything.
#[derive(Debug, Default)]
pub struct EmptyModel;

impl LocalModel for EmptyModel {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn detect(&self, _image: &RgbImage, _sequence: u64) -> Result<Vec<RawDetection>, InferenceError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ReplayScript {
    frames: Vec<ReplayFrame>,
}

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// Serves detections scripted in a JSON file, cycling by frame sequence.
///
/// ```json
/// { "frames": [ { "detections": [
///     { "class_name": "apple", "confidence": 0.92, "bbox": [100, 80, 160, 140] }
/// ] } ] }
/// ```
#[derive(Debug)]
pub struct ReplayModel {
    frames: Vec<Vec<RawDetection>>,
}

impl ReplayModel {
    pub fn from_frames(frames: Vec<Vec<RawDetection>>) -> Self {
        Self { frames }
    }

    pub fn from_json(content: &str) -> Result<Self, InferenceError> {
        let script: ReplayScript = serde_json::from_str(content)
            .map_err(|e| InferenceError::LocalModelUnavailable(format!("replay script: {e}")))?;
        Ok(Self::from_frames(
            script.frames.into_iter().map(|f| f.detections).collect(),
        ))
    }

    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::LocalModelUnavailable(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl LocalModel for ReplayModel {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, _image: &RgbImage, sequence: u64) -> Result<Vec<RawDetection>, InferenceError> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let idx = (sequence % self.frames.len() as u64) as usize;
        Ok(self.frames[idx].clone())
    }
}
