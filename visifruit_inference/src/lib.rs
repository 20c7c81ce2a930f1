//! VisiFruit inference transport.
//!
//! Obtains detections for captured frames from a remote GPU service,
//! falling back to a local CPU model when the remote path is unavailable.
//!
//! # Module Structure
//!
//! - [`client`] - Backend selection, fallback, caching, health monitor
//! - [`backend`] - `InferenceBackend` strategy trait and post-processing
//! - [`remote`] - HTTP backend (`reqwest`)
//! - [`local`] - Local fallback backend and built-in models
//! - [`onnx`] - ONNX Runtime YOLO detector for the local fallback
//! - [`registry`] - Local model registry
//! - [`breaker`] - Circuit breaker
//! - [`compress`] - Channel normalization and JPEG compression
//! - [`cache`] - Content-addressed result cache
//! - [`stats`] - Client counters
//! - [`error`] - Error types

pub mod backend;
pub mod breaker;
pub mod cache;
pub mod client;
pub mod compress;
pub mod error;
pub mod local;
pub mod onnx;
pub mod registry;
pub mod remote;
pub mod stats;

pub use backend::{HealthProbe, HealthStatus, InferenceBackend, RawDetection};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use client::{DefaultInferenceClient, HealthReport, InferenceClient};
pub use error::{InferenceError, RemoteFailure};
pub use local::{LocalBackend, LocalModel, ReplayModel};
pub use onnx::{OnnxYoloModel, YoloParams};
pub use registry::LocalModelRegistry;
pub use remote::RemoteBackend;
pub use stats::ClientStatsSnapshot;
