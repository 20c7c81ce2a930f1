//! Scheduled actuator commands, the engine's output contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::TimestampUs;
use crate::detection::FruitClass;

/// Which actuator should fire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorTarget {
    /// A configured actuator zone.
    Zone(String),
    /// Routing left to the dispatcher.
    Unassigned,
}

impl fmt::Display for ActuatorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(id) => f.write_str(id),
            Self::Unassigned => f.write_str("unassigned"),
        }
    }
}

/// One actuator firing, computed for one cluster.
///
/// Invariants upheld by the scheduler: `fire_at_us > created_at_us` and
/// `duration_ms > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledActivation {
    pub actuator: ActuatorTarget,
    /// Absolute fire instant on the monotonic clock.
    pub fire_at_us: TimestampUs,
    /// Instant the activation was computed.
    pub created_at_us: TimestampUs,
    /// Transit delay from capture to fire [ms].
    pub delay_ms: f64,
    /// Activation length [ms].
    pub duration_ms: f64,
    /// Power level [%].
    pub intensity_pct: f64,
    pub cluster_member_count: usize,

    // Telemetry only; the dispatcher contract is the fields above.
    pub frame_sequence: u64,
    pub cluster_id: usize,
    pub rows: usize,
    pub columns: usize,
    pub spatial_factor: f64,
    /// Time for the whole cluster to pass the actuator [ms].
    pub passage_ms: f64,
    pub majority_class: Option<FruitClass>,
}

impl ScheduledActivation {
    /// Microseconds from creation to fire.
    #[inline]
    pub fn lead_time_us(&self) -> u64 {
        self.fire_at_us.saturating_sub(self.created_at_us)
    }

    /// Fire instant plus duration.
    #[inline]
    pub fn release_at_us(&self) -> TimestampUs {
        self.fire_at_us + crate::clock::ms_to_us(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_display() {
        assert_eq!(ActuatorTarget::Zone("L2".into()).to_string(), "L2");
        assert_eq!(ActuatorTarget::Unassigned.to_string(), "unassigned");
    }

    #[test]
    fn release_after_fire() {
        let a = ScheduledActivation {
            actuator: ActuatorTarget::Unassigned,
            fire_at_us: 4_000_000,
            created_at_us: 10_000,
            delay_ms: 4_000.0,
            duration_ms: 250.0,
            intensity_pct: 100.0,
            cluster_member_count: 1,
            frame_sequence: 0,
            cluster_id: 0,
            rows: 1,
            columns: 1,
            spatial_factor: 1.0,
            passage_ms: 333.3,
            majority_class: None,
        };
        assert_eq!(a.lead_time_us(), 3_990_000);
        assert_eq!(a.release_at_us(), 4_250_000);
    }
}
