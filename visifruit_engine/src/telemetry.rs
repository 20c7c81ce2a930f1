//! Engine telemetry.
//!
//! Counters are lock-free; the activation history is a bounded ring
//! behind a `parking_lot` mutex. The engine only exposes the data, an
//! external dashboard polls [`Telemetry::snapshot`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use visifruit::activation::ScheduledActivation;
use visifruit_inference::ClientStatsSnapshot;

#[derive(Debug)]
pub struct Telemetry {
    frames_processed: AtomicU64,
    frames_dropped: AtomicU64,
    frames_stale: AtomicU64,
    detections: AtomicU64,
    triggers: AtomicU64,
    activations: AtomicU64,
    geometry_errors: AtomicU64,
    config_halts: AtomicU64,
    inference_failures: AtomicU64,
    dispatch_failures: AtomicU64,
    cycle_total_us: AtomicU64,
    history: Mutex<VecDeque<ScheduledActivation>>,
    history_size: usize,
}

impl Telemetry {
    pub fn new(history_size: usize) -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_stale: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            triggers: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            geometry_errors: AtomicU64::new(0),
            config_halts: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            cycle_total_us: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            history_size: history_size.max(1),
        }
    }

    /// One completed cycle.
    pub fn record_cycle(
        &self,
        detections: usize,
        clusters: usize,
        geometry_errors: usize,
        cycle_us: u64,
    ) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections as u64, Ordering::Relaxed);
        self.triggers.fetch_add(clusters as u64, Ordering::Relaxed);
        self.geometry_errors
            .fetch_add(geometry_errors as u64, Ordering::Relaxed);
        self.cycle_total_us.fetch_add(cycle_us, Ordering::Relaxed);
    }

    /// Frames overwritten in the capture slot before being processed.
    pub fn record_frames_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stale_frame(&self) {
        self.frames_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_halt(&self) {
        self.config_halts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispatched activation and keep it in the history ring.
    pub fn record_activation(&self, activation: &ScheduledActivation) {
        self.activations.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history.lock();
        if history.len() == self.history_size {
            history.pop_front();
        }
        history.push_back(activation.clone());
    }

    /// Most recent activations, oldest first.
    pub fn recent_activations(&self) -> Vec<ScheduledActivation> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn snapshot(&self, inference: Option<ClientStatsSnapshot>) -> TelemetrySnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let processed = load(&self.frames_processed);
        let avg_cycle_ms = if processed == 0 {
            0.0
        } else {
            load(&self.cycle_total_us) as f64 / processed as f64 / 1_000.0
        };
        TelemetrySnapshot {
            frames_processed: processed,
            frames_dropped: load(&self.frames_dropped),
            frames_stale: load(&self.frames_stale),
            detections: load(&self.detections),
            triggers: load(&self.triggers),
            activations: load(&self.activations),
            geometry_errors: load(&self.geometry_errors),
            config_halts: load(&self.config_halts),
            inference_failures: load(&self.inference_failures),
            dispatch_failures: load(&self.dispatch_failures),
            avg_cycle_ms,
            recent_activations: self.history.lock().len(),
            inference,
        }
    }
}

/// Serializable telemetry view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub frames_stale: u64,
    pub detections: u64,
    /// Clusters found, one trigger each.
    pub triggers: u64,
    pub activations: u64,
    pub geometry_errors: u64,
    pub config_halts: u64,
    pub inference_failures: u64,
    pub dispatch_failures: u64,
    pub avg_cycle_ms: f64,
    /// Entries currently held in the history ring.
    pub recent_activations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<ClientStatsSnapshot>,
}
