//! Temporal scheduler.
//!
//! Turns each cluster into one [`ScheduledActivation`]. The actuator fires
//! when the cluster's leading edge (its most downstream footprint edge)
//! reaches the labeling point:
//!
//! ```text
//! delay    = (camera_to_actuator_m - leading_edge_m) / belt_speed_mps
//! duration = (base + (n - 1) * per_fruit) * spatial_factor + margin
//! factor   = row^(rows-1) * column^(columns-1) * [density if dense]
//! ```
//!
//! The row and column factors apply once per extra band, never per fruit:
//! a 2x3 grid gets `row * column * column` whatever its member count. The
//! member count only enters through the additive per-fruit term.
//!
//! Clusters are scheduled independently; overlapping windows are left to
//! the dispatcher.

use tracing::{debug, error, warn};
use visifruit::activation::ScheduledActivation;
use visifruit::clock::{TimestampUs, secs_to_us};
use visifruit::geometry::Cluster;
use visifruit::kinematics::BeltKinematicsConfig;

use crate::error::{GeometryError, SchedulingError};
use crate::routing::route;

/// Timing context of the frame being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub frame_sequence: u64,
    /// Capture instant; the mapper's longitudinal positions refer to it.
    pub captured_at_us: TimestampUs,
    /// Instant the schedule is computed.
    pub created_at_us: TimestampUs,
}

/// Activations for one frame plus the clusters that were dropped.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Ordered by fire-at, earliest first.
    pub activations: Vec<ScheduledActivation>,
    pub dropped: Vec<GeometryError>,
}

/// Duration multiplier from the cluster's shape and density.
pub fn spatial_factor(cluster: &Cluster, config: &BeltKinematicsConfig) -> f64 {
    let extra_rows = cluster.rows.saturating_sub(1) as i32;
    let extra_columns = cluster.columns.saturating_sub(1) as i32;
    let mut factor = config.row_factor.powi(extra_rows) * config.column_factor.powi(extra_columns);
    if !cluster.is_singleton() && cluster.density_per_m2 > config.density_threshold_per_m2 {
        factor *= config.density_factor;
    }
    factor
}

/// Activation length for a cluster [ms]. Never below the single-fruit base.
pub fn activation_duration_ms(cluster: &Cluster, config: &BeltKinematicsConfig) -> f64 {
    let extra = cluster.member_count().saturating_sub(1) as f64;
    (config.base_activation_time_ms + extra * config.time_per_additional_fruit_ms)
        * spatial_factor(cluster, config)
        + config.safety_margin_ms
}

/// Transit time from capture until the leading edge reaches `distance_m` [s].
#[inline]
pub fn transit_delay_s(leading_edge_m: f64, distance_m: f64, belt_speed_mps: f64) -> f64 {
    (distance_m - leading_edge_m) / belt_speed_mps
}

/// Time for the whole cluster to pass a fixed point [ms].
#[inline]
pub fn passage_ms(cluster: &Cluster, config: &BeltKinematicsConfig) -> f64 {
    cluster.extent.length_m() / config.belt_speed_mps * 1_000.0
}

/// Schedule a single cluster against a validated configuration.
///
/// # Errors
///
/// - `NonPositiveDelay` if the cluster's leading edge is at or past the
///   actuator.
/// - `DelayOutOfRange` if the fire instant does not fit a timestamp.
/// - `FireAtNotInFuture` if processing took longer than the transit.
pub fn schedule_cluster(
    cluster: &Cluster,
    timing: FrameTiming,
    config: &BeltKinematicsConfig,
) -> Result<ScheduledActivation, GeometryError> {
    let route = route(cluster, config);
    let delay_s = transit_delay_s(cluster.leading_edge_m(), route.distance_m, config.belt_speed_mps);
    let delay_ms = delay_s * 1_000.0;
    if delay_s <= 0.0 || !delay_s.is_finite() {
        return Err(GeometryError::NonPositiveDelay {
            cluster_id: cluster.id,
            delay_ms,
        });
    }

    let fire_at_us = timing
        .captured_at_us
        .checked_add(secs_to_us(delay_s))
        .ok_or(GeometryError::DelayOutOfRange {
            cluster_id: cluster.id,
            delay_ms,
        })?;
    if fire_at_us <= timing.created_at_us {
        return Err(GeometryError::FireAtNotInFuture {
            cluster_id: cluster.id,
            fire_at_us,
            now_us: timing.created_at_us,
        });
    }

    let factor = spatial_factor(cluster, config);
    let duration_ms = activation_duration_ms(cluster, config);
    debug!(
        "Cluster {}: {} fruit, {}x{} (rows x cols), density {:.0}/m², factor {:.3} -> {} in {:.1} ms for {:.1} ms",
        cluster.id,
        cluster.member_count(),
        cluster.rows,
        cluster.columns,
        cluster.density_per_m2,
        factor,
        route.target,
        delay_ms,
        duration_ms
    );

    Ok(ScheduledActivation {
        actuator: route.target,
        fire_at_us,
        created_at_us: timing.created_at_us,
        delay_ms,
        duration_ms,
        intensity_pct: config.intensity_pct,
        cluster_member_count: cluster.member_count(),
        frame_sequence: timing.frame_sequence,
        cluster_id: cluster.id,
        rows: cluster.rows,
        columns: cluster.columns,
        spatial_factor: factor,
        passage_ms: passage_ms(cluster, config),
        majority_class: cluster.majority_class().cloned(),
    })
}

/// Schedule every cluster of a frame.
///
/// The configuration is validated first; an invalid one emits nothing.
/// Clusters with geometry errors are dropped and reported, the others
/// still proceed.
///
/// # Errors
///
/// `SchedulingError::Configuration` if the kinematics fail validation.
pub fn schedule(
    clusters: &[Cluster],
    timing: FrameTiming,
    config: &BeltKinematicsConfig,
) -> Result<ScheduleOutcome, SchedulingError> {
    if let Err(e) = config.validate() {
        error!("Scheduling halted: {}", e);
        return Err(e.into());
    }

    let mut outcome = ScheduleOutcome::default();
    for cluster in clusters {
        match schedule_cluster(cluster, timing, config) {
            Ok(activation) => outcome.activations.push(activation),
            Err(e) => {
                warn!("Frame {}: dropping cluster: {}", timing.frame_sequence, e);
                outcome.dropped.push(e);
            }
        }
    }
    outcome.activations.sort_by_key(|a| a.fire_at_us);
    Ok(outcome)
}
