//! Engine error types.
//!
//! Geometry errors are contained per cluster, scheduling (configuration)
//! errors halt activation output, and the rest surface through
//! [`EngineError`] for the frame that produced them.

use thiserror::Error;
use visifruit::clock::TimestampUs;
use visifruit::config::ConfigError;
use visifruit::frame::FrameError;
use visifruit_inference::InferenceError;

/// A detection or cluster that cannot be placed in time or space.
///
/// The offending item is dropped for the current cycle; the rest of the
/// frame still proceeds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Box with zero (or negative) width or height.
    #[error("degenerate box {width_px:.1}x{height_px:.1} px")]
    DegenerateBox { width_px: f64, height_px: f64 },

    /// Mapped center falls outside the belt.
    #[error("lateral position {lateral_m:.3} m outside belt width {belt_width_m:.3} m")]
    OutsideBelt { lateral_m: f64, belt_width_m: f64 },

    /// Cluster already at or past its actuator.
    #[error("cluster {cluster_id}: non-positive delay {delay_ms:.1} ms")]
    NonPositiveDelay { cluster_id: usize, delay_ms: f64 },

    /// Transit too long to express as a fire-at timestamp.
    #[error("cluster {cluster_id}: delay {delay_ms:.1} ms out of range")]
    DelayOutOfRange { cluster_id: usize, delay_ms: f64 },

    /// Fire instant not after the scheduling instant.
    #[error("cluster {cluster_id}: fire-at {fire_at_us} us not after now {now_us} us")]
    FireAtNotInFuture {
        cluster_id: usize,
        fire_at_us: TimestampUs,
        now_us: TimestampUs,
    },
}

/// The scheduler refuses to emit activations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    /// Kinematics invalid or incomplete; fail closed until corrected.
    #[error("kinematics configuration invalid: {0}")]
    Configuration(String),
}

impl From<ConfigError> for SchedulingError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// Hand-off to the activation dispatcher failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Receiving side is gone.
    #[error("dispatcher closed")]
    Closed,
    /// Dispatcher queue full.
    #[error("dispatcher queue full ({capacity})")]
    Backpressure { capacity: usize },
}

/// Per-frame pipeline failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Frame not newer than the last processed one.
    #[error("stale frame {sequence}: captured at {captured_at_us} us, last processed {last_us} us")]
    StaleFrame {
        sequence: u64,
        captured_at_us: TimestampUs,
        last_us: TimestampUs,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    /// Frame source could not produce a frame.
    #[error("frame source: {0}")]
    Source(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_scheduling() {
        let e: SchedulingError = ConfigError::ValidationError("belt_speed_mps".into()).into();
        assert!(e.to_string().contains("belt_speed_mps"));
    }

    #[test]
    fn geometry_messages() {
        let e = GeometryError::NonPositiveDelay {
            cluster_id: 2,
            delay_ms: -12.0,
        };
        assert_eq!(e.to_string(), "cluster 2: non-positive delay -12.0 ms");
    }
}
