//! Detections produced by the inference transport.
//!
//! A [`Detection`] is read-only after creation. It carries the source frame
//! metadata so the coordinate mapper needs nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::TimestampUs;

/// Fruit category reported by the detector.
///
/// Known names map to dedicated variants; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FruitClass {
    Apple,
    Pear,
    Lemon,
    Other(String),
}

impl FruitClass {
    /// Parse a class name (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "apple" | "manzana" => Self::Apple,
            "pear" | "pera" => Self::Pear,
            "lemon" | "limon" | "limón" => Self::Lemon,
            _ => Self::Other(name.trim().to_string()),
        }
    }

    /// Resolve a class id against a configured class list.
    pub fn from_id(class_id: u32, class_names: &[String]) -> Self {
        match class_names.get(class_id as usize) {
            Some(name) => Self::from_name(name),
            None => Self::Other(format!("class_{class_id}")),
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &str {
        match self {
            Self::Apple => "apple",
            Self::Pear => "pear",
            Self::Lemon => "lemon",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for FruitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for FruitClass {
    fn from(s: String) -> Self {
        Self::from_name(&s)
    }
}

impl From<FruitClass> for String {
    fn from(c: FruitClass) -> Self {
        c.name().to_string()
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub const fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x_min + self.x_max) * 0.5,
            (self.y_min + self.y_max) * 0.5,
        )
    }

    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    /// Zero or negative extent on either axis, or non-finite corners.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clip(&self, width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        Self {
            x_min: self.x_min.clamp(0.0, w),
            y_min: self.y_min.clamp(0.0, h),
            x_max: self.x_max.clamp(0.0, w),
            y_max: self.y_max.clamp(0.0, h),
        }
    }

    /// Scale both axes independently.
    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self {
            x_min: self.x_min * sx,
            y_min: self.y_min * sy,
            x_max: self.x_max * sx,
            y_max: self.y_max * sy,
        }
    }

    /// True if any side lies on (or beyond) the frame border.
    pub fn touches_edge(&self, width: u32, height: u32) -> bool {
        const EPS: f64 = 0.5;
        self.x_min <= EPS
            || self.y_min <= EPS
            || self.x_max >= f64::from(width) - EPS
            || self.y_max >= f64::from(height) - EPS
    }
}

/// One detected fruit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: FruitClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Capture instant of the source frame.
    pub frame_timestamp_us: TimestampUs,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Which backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
    Cached,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Cached => "cached",
        })
    }
}

/// Server-side timing breakdown reported by the remote service [ms].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerTiming {
    #[serde(default)]
    pub pre_ms: f64,
    #[serde(default)]
    pub inference_ms: f64,
    #[serde(default)]
    pub post_ms: f64,
    #[serde(default)]
    pub total_ms: f64,
}

/// Detections for one frame plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Sorted by descending confidence.
    pub detections: Vec<Detection>,
    /// Client-side round trip [ms].
    pub latency_ms: f64,
    pub backend: BackendKind,
    pub frame_timestamp_us: TimestampUs,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Compute device reported by the backend ("cuda:0", "cpu").
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub server_timing: Option<ServerTiming>,
}

impl DetectionResult {
    /// Empty result ("no fruit this cycle").
    pub fn empty(backend: BackendKind, timestamp_us: TimestampUs, width: u32, height: u32) -> Self {
        Self {
            detections: Vec::new(),
            latency_ms: 0.0,
            backend,
            frame_timestamp_us: timestamp_us,
            frame_width: width,
            frame_height: height,
            device: None,
            server_timing: None,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Re-stamp the result for another frame with identical content.
    pub fn restamped(&self, timestamp_us: TimestampUs, backend: BackendKind) -> Self {
        let mut out = self.clone();
        out.frame_timestamp_us = timestamp_us;
        out.backend = backend;
        for d in &mut out.detections {
            d.frame_timestamp_us = timestamp_us;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_map_to_variants() {
        assert_eq!(String::from(FruitClass::Lemon), "lemon");
        assert_eq!(FruitClass::from_name("PEAR"), FruitClass::Pear);
        assert_eq!(
            FruitClass::from_name("kiwi"),
            FruitClass::Other("kiwi".into())
        );
    }

    #[test]
    fn class_from_id_uses_table() {
        let names: Vec<String> = vec!["apple".into(), "pear".into()];
        assert_eq!(FruitClass::from_id(1, &names), FruitClass::Pear);
        assert_eq!(
            FruitClass::from_id(7, &names),
            FruitClass::Other("class_7".into())
        );
    }

    #[test]
    fn degenerate_boxes() {
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 20.0).is_degenerate());
        assert!(BoundingBox::new(10.0, 10.0, 20.0, 5.0).is_degenerate());
        assert!(BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_degenerate());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_degenerate());
    }

    #[test]
    fn clip_and_edge() {
        let b = BoundingBox::new(-5.0, 10.0, 700.0, 50.0).clip(640, 480);
        assert_eq!(b, BoundingBox::new(0.0, 10.0, 640.0, 50.0));
        assert!(b.touches_edge(640, 480));
        assert!(!BoundingBox::new(100.0, 100.0, 150.0, 150.0).touches_edge(640, 480));
    }

    #[test]
    fn restamp_updates_every_detection() {
        let det = Detection {
            class: FruitClass::Apple,
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            frame_timestamp_us: 1,
            frame_width: 100,
            frame_height: 100,
        };
        let mut r = DetectionResult::empty(BackendKind::Remote, 1, 100, 100);
        r.detections.push(det);
        let s = r.restamped(99, BackendKind::Cached);
        assert_eq!(s.frame_timestamp_us, 99);
        assert_eq!(s.backend, BackendKind::Cached);
        assert_eq!(s.detections[0].frame_timestamp_us, 99);
    }
}
