//! ONNX YOLO detector for the local CPU fallback.
//!
//! Expects a YOLOv8-style export: one `images` input of shape
//! `[1, 3, S, S]` (RGB, 0..1) and one `output0` of shape `[1, 4 + C, N]`
//! holding `cx, cy, w, h` followed by `C` class scores per candidate.
//! Frames are letterboxed to `S = inference.input_size`.

use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewD, Axis, Ix3};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info};
use visifruit::inference::InferenceConfig;

use crate::backend::RawDetection;
use crate::error::InferenceError;
use crate::local::LocalModel;

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

/// Grey used for the letterbox border.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Post-processing thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl YoloParams {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            input_size: config.input_size,
            conf_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections as usize,
        }
    }
}

/// Placement of the source image inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size as f32 - new_w) / 2.0).floor(),
            pad_y: ((size as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-input box `cx, cy, w, h` to source-image corners.
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f64; 4] {
        let x1 = (cx - w / 2.0 - self.pad_x) / self.scale;
        let y1 = (cy - h / 2.0 - self.pad_y) / self.scale;
        let x2 = (cx + w / 2.0 - self.pad_x) / self.scale;
        let y2 = (cy + h / 2.0 - self.pad_y) / self.scale;
        [f64::from(x1), f64::from(y1), f64::from(x2), f64::from(y2)]
    }
}

/// Resize into a padded `[1, 3, size, size]` tensor.
pub fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let lb = Letterbox::fit(image.width(), image.height(), size);
    let new_w = ((image.width() as f32 * lb.scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * lb.scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let s = size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, s, s), PAD_VALUE);
    let (ox, oy) = (lb.pad_x as usize, lb.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        if tx >= s || ty >= s {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = f32::from(pixel[c]) / 255.0;
        }
    }
    (tensor, lb)
}

/// Turn a raw `[1, 4 + C, N]` output into source-pixel detections.
///
/// Each candidate keeps its best class; candidates under the confidence
/// threshold are discarded before NMS. A `[1, N, 4 + C]` layout is
/// accepted as well.
pub fn decode_output(
    output: ArrayViewD<'_, f32>,
    lb: &Letterbox,
    params: &YoloParams,
) -> Result<Vec<RawDetection>, InferenceError> {
    let output = output.into_dimensionality::<Ix3>().map_err(|e| {
        InferenceError::LocalModelUnavailable(format!("unexpected output rank: {e}"))
    })?;
    let output = output.index_axis_move(Axis(0), 0);
    // Attributes run along the shorter axis; exports have far more
    // candidates than classes.
    let preds = if output.shape()[0] <= output.shape()[1] {
        output
    } else {
        output.reversed_axes()
    };
    let attrs = preds.shape()[0];
    if attrs < 5 {
        return Err(InferenceError::LocalModelUnavailable(format!(
            "output has {attrs} attributes, need at least 5"
        )));
    }

    let mut candidates = Vec::new();
    for i in 0..preds.shape()[1] {
        let (class_id, score) = (4..attrs)
            .map(|a| (a - 4, preds[[a, i]]))
            .fold((0, f32::MIN), |best, c| if c.1 > best.1 { c } else { best });
        if !score.is_finite() || score < params.conf_threshold {
            continue;
        }
        candidates.push(RawDetection {
            class_id: Some(class_id as u32),
            class_name: None,
            confidence: score,
            bbox: lb.unmap(preds[[0, i]], preds[[1, i]], preds[[2, i]], preds[[3, i]]),
        });
    }
    Ok(non_max_suppression(
        candidates,
        params.iou_threshold,
        params.max_detections,
    ))
}

/// Class-aware greedy NMS, highest confidence first.
pub fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for c in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == c.class_id && iou(&k.bbox, &c.bbox) > f64::from(iou_threshold));
        if !suppressed {
            kept.push(c);
        }
    }
    kept
}

fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area = |r: &[f64; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

// ─── Model ──────────────────────────────────────────────────────────

fn model_error(msg: String) -> InferenceError {
    InferenceError::LocalModelUnavailable(msg)
}

/// YOLO detector running on the ONNX Runtime CPU provider.
pub struct OnnxYoloModel {
    session: Mutex<Session>,
    params: YoloParams,
}

impl std::fmt::Debug for OnnxYoloModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxYoloModel")
            .field("params", &self.params)
            .finish()
    }
}

impl OnnxYoloModel {
    /// Load an exported model.
    ///
    /// # Errors
    /// `LocalModelUnavailable` if the file cannot be loaded as a session.
    pub fn load(path: &Path, params: YoloParams) -> Result<Self, InferenceError> {
        let unavailable = |e: String| model_error(format!("{}: {e}", path.display()));
        let session = Session::builder()
            .map_err(|e| unavailable(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| unavailable(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| unavailable(e.to_string()))?;
        info!(
            "ONNX model {} loaded (input {}x{})",
            path.display(),
            params.input_size,
            params.input_size
        );
        Ok(Self {
            session: Mutex::new(session),
            params,
        })
    }
}

impl LocalModel for OnnxYoloModel {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn detect(&self, image: &RgbImage, sequence: u64) -> Result<Vec<RawDetection>, InferenceError> {
        let (input, lb) = letterbox(image, self.params.input_size);
        let tensor = Tensor::from_array(input).map_err(|e| model_error(format!("onnx: {e}")))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![INPUT_NAME => tensor])
            .map_err(|e| model_error(format!("onnx: {e}")))?;
        let output: ArrayViewD<f32> = outputs[OUTPUT_NAME]
            .try_extract_array()
            .map_err(|e| model_error(format!("onnx: {e}")))?;
        let detections = decode_output(output, &lb, &self.params)?;
        debug!("ONNX frame {}: {} detections", sequence, detections.len());
        Ok(detections)
    }
}
