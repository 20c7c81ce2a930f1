//! Coordinate mapper: pixel boxes to belt-plane meters.
//!
//! The camera looks straight down with its horizontal field of view equal
//! to the belt width, so one linear scale (`belt_width_m / frame_width`)
//! applies to both image axes. Longitudinal positions are measured from
//! the frame's horizontal centre line (the camera reference line) at the
//! capture instant, positive downstream.

use tracing::{debug, warn};
use visifruit::detection::Detection;
use visifruit::geometry::{BeltPoint, BeltPosition};
use visifruit::kinematics::{BeltKinematicsConfig, TravelDirection};

use crate::error::GeometryError;

/// Meters per pixel for a frame of the given width.
#[inline]
pub fn scale_m_per_px(frame_width: u32, config: &BeltKinematicsConfig) -> f64 {
    config.belt_width_m / f64::from(frame_width)
}

/// Project one detection onto the belt plane.
///
/// Pure: the same inputs always produce the same point.
///
/// # Errors
///
/// - `DegenerateBox` for zero-area boxes or an empty frame.
/// - `OutsideBelt` if the box centre maps beyond the belt edges.
pub fn map(
    detection: &Detection,
    frame_width: u32,
    frame_height: u32,
    config: &BeltKinematicsConfig,
) -> Result<BeltPoint, GeometryError> {
    let bbox = &detection.bbox;
    if frame_width == 0 || frame_height == 0 || bbox.is_degenerate() {
        return Err(GeometryError::DegenerateBox {
            width_px: bbox.width(),
            height_px: bbox.height(),
        });
    }

    let scale = scale_m_per_px(frame_width, config);
    let (cx, cy) = bbox.center();

    let lateral_m = cx / f64::from(frame_width) * config.belt_width_m;
    if !(0.0..=config.belt_width_m).contains(&lateral_m) {
        return Err(GeometryError::OutsideBelt {
            lateral_m,
            belt_width_m: config.belt_width_m,
        });
    }

    let offset_m = (cy - f64::from(frame_height) * 0.5) * scale;
    let longitudinal_m = match config.travel_direction {
        TravelDirection::Down => offset_m,
        TravelDirection::Up => -offset_m,
    };

    Ok(BeltPoint {
        position: BeltPosition {
            lateral_m,
            longitudinal_m,
        },
        width_m: bbox.width() * scale,
        length_m: bbox.height() * scale,
        size_m: bbox.diagonal() * scale,
        truncated: bbox.touches_edge(frame_width, frame_height),
        detection: detection.clone(),
    })
}

/// Mapped points of one frame plus what was dropped.
#[derive(Debug, Default)]
pub struct MappedFrame {
    pub points: Vec<BeltPoint>,
    pub dropped: Vec<GeometryError>,
}

/// Map every detection of a frame, dropping the ones that cannot be placed.
pub fn map_all(
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
    config: &BeltKinematicsConfig,
) -> MappedFrame {
    let mut out = MappedFrame {
        points: Vec::with_capacity(detections.len()),
        dropped: Vec::new(),
    };
    for det in detections {
        match map(det, frame_width, frame_height, config) {
            Ok(point) => out.points.push(point),
            Err(e @ GeometryError::DegenerateBox { .. }) => {
                debug!("Dropping {} detection: {}", det.class, e);
                out.dropped.push(e);
            }
            Err(e) => {
                warn!("Dropping {} detection: {}", det.class, e);
                out.dropped.push(e);
            }
        }
    }
    out
}
