//! VisiFruit position detection and temporal synchronization engine.
//!
//! Converts per-frame fruit detections into timed actuator activations:
//! pixel boxes are projected onto the belt plane, grouped into clusters,
//! and each cluster is scheduled to fire as it reaches its labeler.
//!
//! # Module Structure
//!
//! - [`mapper`] - Pixel boxes to belt-plane meters
//! - [`cluster`] - DBSCAN (`min_pts = 1`) clustering with row/column estimates
//! - [`scheduler`] - Delay and duration per cluster
//! - [`routing`] - Actuator zone selection
//! - [`pipeline`] - Sequential per-frame [`Engine`]
//! - [`capture`] - Frame sources and the latest-frame slot
//! - [`dispatch`] - Activation dispatcher contract
//! - [`telemetry`] - Counters and activation history
//! - [`error`] - Error types

pub mod capture;
pub mod cluster;
pub mod dispatch;
pub mod error;
pub mod mapper;
pub mod pipeline;
pub mod routing;
pub mod scheduler;
pub mod telemetry;

pub use capture::{DirectoryFrameSource, FrameReceiver, FrameSlot, FrameSource, SyntheticFrameSource};
pub use dispatch::{ActivationDispatcher, ChannelDispatcher, LogDispatcher};
pub use error::{DispatchError, EngineError, GeometryError, SchedulingError};
pub use pipeline::{CyclePlan, CycleReport, Engine, plan_cycle};
pub use scheduler::FrameTiming;
pub use telemetry::{Telemetry, TelemetrySnapshot};
