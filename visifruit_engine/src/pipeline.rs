//! Per-frame pipeline: inference → map → cluster → schedule → dispatch.
//!
//! Frames are handled strictly one after another. A cycle takes a single
//! kinematics snapshot at its start and uses it throughout, so a reload
//! never mixes two calibrations within one frame. Activations of frame N
//! are dispatched before frame N+1 is looked at.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use visifruit::activation::ScheduledActivation;
use visifruit::clock::{TimestampUs, now_us};
use visifruit::detection::{BackendKind, DetectionResult};
use visifruit::frame::Frame;
use visifruit::geometry::Cluster;
use visifruit::kinematics::{BeltKinematicsConfig, SharedKinematics};
use visifruit_inference::{HealthProbe, InferenceBackend, InferenceClient};

use crate::cluster::cluster_points;
use crate::dispatch::ActivationDispatcher;
use crate::error::{DispatchError, EngineError, GeometryError, SchedulingError};
use crate::mapper::map_all;
use crate::scheduler::{FrameTiming, schedule};
use crate::telemetry::Telemetry;

/// Mapping, clustering and scheduling of one frame's detections.
#[derive(Debug)]
pub struct CyclePlan {
    pub clusters: Vec<Cluster>,
    /// Ordered by fire-at.
    pub activations: Vec<ScheduledActivation>,
    /// Detections and clusters that could not be placed.
    pub dropped: Vec<GeometryError>,
}

/// Plan a cycle without side effects.
///
/// # Errors
///
/// `SchedulingError::Configuration` if `config` is invalid; nothing is
/// scheduled in that case.
pub fn plan_cycle(
    result: &DetectionResult,
    timing: FrameTiming,
    config: &BeltKinematicsConfig,
) -> Result<CyclePlan, SchedulingError> {
    let mapped = map_all(
        &result.detections,
        result.frame_width,
        result.frame_height,
        config,
    );
    let clusters = cluster_points(mapped.points, config);
    let outcome = schedule(&clusters, timing, config)?;

    let mut dropped = mapped.dropped;
    dropped.extend(outcome.dropped);
    Ok(CyclePlan {
        clusters,
        activations: outcome.activations,
        dropped,
    })
}

/// What one cycle produced.
#[derive(Debug)]
pub struct CycleReport {
    pub frame_sequence: u64,
    pub backend: BackendKind,
    pub detections: usize,
    pub clusters: usize,
    /// Activations handed to the dispatcher, in fire-at order.
    pub activations: Vec<ScheduledActivation>,
    pub dropped: Vec<GeometryError>,
    /// Activations the dispatcher refused.
    pub dispatch_failures: usize,
    pub cycle_ms: f64,
}

/// Sequential frame pipeline.
pub struct Engine<D> {
    kinematics: Arc<SharedKinematics>,
    dispatcher: D,
    telemetry: Arc<Telemetry>,
    last_captured_at_us: Option<TimestampUs>,
    halted: bool,
}

impl<D: ActivationDispatcher> Engine<D> {
    pub fn new(kinematics: Arc<SharedKinematics>, dispatcher: D, telemetry: Arc<Telemetry>) -> Self {
        Self {
            kinematics,
            dispatcher,
            telemetry,
            last_captured_at_us: None,
            halted: false,
        }
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// True while the last cycle was refused for invalid configuration.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Run the full pipeline for one captured frame.
    ///
    /// # Errors
    ///
    /// - `StaleFrame` if the frame is not newer than the last one.
    /// - `Inference` if no backend produced detections.
    /// - `Scheduling` while the kinematics are invalid.
    /// - `Dispatch(Closed)` if the dispatcher went away.
    pub async fn process_frame<R, L>(
        &mut self,
        client: &InferenceClient<R, L>,
        frame: &Frame,
    ) -> Result<CycleReport, EngineError>
    where
        R: InferenceBackend + HealthProbe,
        L: InferenceBackend,
    {
        self.check_order(frame.sequence, frame.captured_at_us)?;
        let started = Instant::now();

        let result = match client.infer(frame).await {
            Ok(result) => result,
            Err(e) => {
                self.telemetry.record_inference_failure();
                warn!("Frame {}: no detections: {}", frame.sequence, e);
                return Err(e.into());
            }
        };
        self.complete(frame.sequence, &result, now_us(), started)
    }

    /// Run map → cluster → schedule → dispatch on detections obtained
    /// elsewhere. `created_at_us` is the scheduling instant.
    ///
    /// # Errors
    ///
    /// As [`Engine::process_frame`], minus inference.
    pub fn process_detections(
        &mut self,
        frame_sequence: u64,
        result: &DetectionResult,
        created_at_us: TimestampUs,
    ) -> Result<CycleReport, EngineError> {
        self.check_order(frame_sequence, result.frame_timestamp_us)?;
        self.complete(frame_sequence, result, created_at_us, Instant::now())
    }

    fn check_order(&self, sequence: u64, captured_at_us: TimestampUs) -> Result<(), EngineError> {
        match self.last_captured_at_us {
            Some(last) if captured_at_us <= last => {
                self.telemetry.record_stale_frame();
                debug!(
                    "Frame {} rejected: captured at {} us, last {} us",
                    sequence, captured_at_us, last
                );
                Err(EngineError::StaleFrame {
                    sequence,
                    captured_at_us,
                    last_us: last,
                })
            }
            _ => Ok(()),
        }
    }

    fn complete(
        &mut self,
        frame_sequence: u64,
        result: &DetectionResult,
        created_at_us: TimestampUs,
        started: Instant,
    ) -> Result<CycleReport, EngineError> {
        self.last_captured_at_us = Some(result.frame_timestamp_us);
        let config = self.kinematics.snapshot();
        let timing = FrameTiming {
            frame_sequence,
            captured_at_us: result.frame_timestamp_us,
            created_at_us,
        };

        let plan = match plan_cycle(result, timing, &config) {
            Ok(plan) => plan,
            Err(e) => {
                self.telemetry.record_config_halt();
                if !self.halted {
                    error!("Activation output halted until configuration is fixed: {}", e);
                    self.halted = true;
                }
                return Err(e.into());
            }
        };
        if self.halted {
            info!("Configuration valid again, activation output resumed");
            self.halted = false;
        }

        let mut dispatch_failures = 0;
        for activation in &plan.activations {
            match self.dispatcher.dispatch(activation) {
                Ok(()) => self.telemetry.record_activation(activation),
                Err(DispatchError::Closed) => {
                    self.telemetry.record_dispatch_failure();
                    return Err(DispatchError::Closed.into());
                }
                Err(e) => {
                    self.telemetry.record_dispatch_failure();
                    warn!(
                        "Frame {} cluster {}: {}",
                        frame_sequence, activation.cluster_id, e
                    );
                    dispatch_failures += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        self.telemetry.record_cycle(
            result.detections.len(),
            plan.clusters.len(),
            plan.dropped.len(),
            elapsed.as_micros() as u64,
        );
        if !plan.clusters.is_empty() {
            debug!(
                "Frame {} ({}): {} detections, {} clusters, {} activations",
                frame_sequence,
                result.backend,
                result.detections.len(),
                plan.clusters.len(),
                plan.activations.len()
            );
        }

        Ok(CycleReport {
            frame_sequence,
            backend: result.backend,
            detections: result.detections.len(),
            clusters: plan.clusters.len(),
            activations: plan.activations,
            dropped: plan.dropped,
            dispatch_failures,
            cycle_ms: elapsed.as_secs_f64() * 1_000.0,
        })
    }
}
