//! VisiFruit Common Library
//!
//! Shared data model, configuration loading and constants for every
//! VisiFruit workspace crate.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and the root engine config
//! - [`kinematics`] - Belt geometry, timing calibration, atomic snapshots
//! - [`inference`] - Inference transport settings
//! - [`frame`], [`detection`], [`geometry`], [`activation`] - Pipeline data
//! - [`clock`] - Monotonic timestamps
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! visifruit = { package = "visifruit_common", path = "../visifruit_common" }
//! ```
//!
//! Then import:
//! ```rust,ignore
//! use visifruit::config::{ConfigLoader, EngineConfig};
//! use visifruit::kinematics::BeltKinematicsConfig;
//! ```

pub mod activation;
pub mod clock;
pub mod config;
pub mod consts;
pub mod detection;
pub mod frame;
pub mod geometry;
pub mod inference;
pub mod kinematics;
pub mod prelude;
