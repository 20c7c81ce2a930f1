//! Prelude module for common re-exports.
//!
//! `use visifruit_common::prelude::*;` brings in the pipeline data types
//! and configuration entry points without listing individual paths.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, EngineConfig, PipelineConfig, SharedConfig};
pub use crate::inference::{FallbackPolicy, InferenceConfig};
pub use crate::kinematics::{ActuatorZone, BeltKinematicsConfig, SharedKinematics, TravelDirection};

// ─── Pipeline data ──────────────────────────────────────────────────
pub use crate::activation::{ActuatorTarget, ScheduledActivation};
pub use crate::clock::{TimestampUs, now_us};
pub use crate::detection::{BackendKind, BoundingBox, Detection, DetectionResult, FruitClass};
pub use crate::frame::{ChannelOrder, Frame, FrameError};
pub use crate::geometry::{BeltPoint, BeltPosition, Cluster, Extent};
