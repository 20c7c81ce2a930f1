//! Belt kinematics configuration.
//!
//! Physical calibration of one conveyor installation: belt geometry, the
//! camera and actuator mount positions, clustering radius, and the
//! activation timing constants. Immutable while a pipeline cycle is using
//! it; reloads swap a whole new snapshot through [`SharedKinematics`].
//!
//! All longitudinal positions are measured along the direction of travel
//! from the start of the belt, in meters.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ConfigError;
use crate::consts::{
    BAND_TOLERANCE_DEFAULT, BASE_ACTIVATION_MS_DEFAULT, CLUSTER_EPS_M_DEFAULT,
    COLUMN_FACTOR_DEFAULT, DENSITY_FACTOR_DEFAULT, DENSITY_THRESHOLD_DEFAULT,
    INTENSITY_PCT_DEFAULT, MAX_TRANSIT_S, PER_FRUIT_MS_DEFAULT, ROW_FACTOR_DEFAULT,
    SAFETY_MARGIN_MS_DEFAULT,
};

/// Direction in which the belt moves through the camera image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelDirection {
    /// Fruit enters at the top of the image and leaves at the bottom.
    #[default]
    Down,
    /// Fruit enters at the bottom of the image and leaves at the top.
    Up,
}

/// One labeling actuator and the lateral strip of belt it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorZone {
    /// Identifier forwarded to the dispatcher.
    pub id: String,
    /// Left edge of the covered strip [m].
    pub lateral_min_m: f64,
    /// Right edge of the covered strip [m].
    pub lateral_max_m: f64,
    /// Fruit classes handled by this actuator. Empty = all classes.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Mount position along the belt [m]; defaults to `actuator_position_m`.
    #[serde(default)]
    pub position_m: Option<f64>,
    /// Inactive zones are never selected.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl ActuatorZone {
    /// True if the lateral coordinate lies within the covered strip.
    #[inline]
    pub fn covers(&self, lateral_m: f64) -> bool {
        lateral_m >= self.lateral_min_m && lateral_m <= self.lateral_max_m
    }

    /// True if this zone labels the given class name.
    pub fn accepts(&self, class_name: &str) -> bool {
        self.classes.is_empty() || self.classes.iter().any(|c| c.eq_ignore_ascii_case(class_name))
    }
}

/// Belt geometry and activation timing calibration.
///
/// The four geometry fields are required: a missing value is a parse error,
/// never a silent default, because wrong timing misfires the labelers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeltKinematicsConfig {
    /// Belt width, equal to the camera field of view at the belt plane [m].
    pub belt_width_m: f64,
    /// Belt surface speed [m/s].
    pub belt_speed_mps: f64,
    /// Longitudinal position of the camera field-of-view center [m].
    pub camera_position_m: f64,
    /// Longitudinal position of the labeling point [m].
    pub actuator_position_m: f64,

    /// How the belt moves through the image.
    #[serde(default)]
    pub travel_direction: TravelDirection,

    /// Clustering neighbourhood radius [m].
    #[serde(default = "default_cluster_eps")]
    pub cluster_eps_m: f64,

    /// Activation time for a single fruit [ms].
    #[serde(default = "default_base_activation")]
    pub base_activation_time_ms: f64,
    /// Extra activation time per additional fruit [ms].
    #[serde(default = "default_per_fruit")]
    pub time_per_additional_fruit_ms: f64,
    /// Margin appended to every activation [ms].
    #[serde(default = "default_safety_margin")]
    pub safety_margin_ms: f64,

    /// Duration multiplier per estimated row beyond the first.
    #[serde(default = "default_row_factor")]
    pub row_factor: f64,
    /// Duration multiplier per estimated column beyond the first.
    #[serde(default = "default_column_factor")]
    pub column_factor: f64,
    /// Duration multiplier applied once to dense clusters.
    #[serde(default = "default_density_factor")]
    pub density_factor: f64,
    /// Density above which `density_factor` applies [fruits/m²].
    #[serde(default = "default_density_threshold")]
    pub density_threshold_per_m2: f64,
    /// Band tolerance as a fraction of the mean fruit extent.
    #[serde(default = "default_band_tolerance")]
    pub band_tolerance: f64,

    /// Activation power [%].
    #[serde(default = "default_intensity")]
    pub intensity_pct: f64,

    /// Actuator routing table. Empty = leave routing to the dispatcher.
    #[serde(default)]
    pub actuators: Vec<ActuatorZone>,
}

fn default_cluster_eps() -> f64 {
    CLUSTER_EPS_M_DEFAULT
}
fn default_base_activation() -> f64 {
    BASE_ACTIVATION_MS_DEFAULT
}
fn default_per_fruit() -> f64 {
    PER_FRUIT_MS_DEFAULT
}
fn default_safety_margin() -> f64 {
    SAFETY_MARGIN_MS_DEFAULT
}
fn default_row_factor() -> f64 {
    ROW_FACTOR_DEFAULT
}
fn default_column_factor() -> f64 {
    COLUMN_FACTOR_DEFAULT
}
fn default_density_factor() -> f64 {
    DENSITY_FACTOR_DEFAULT
}
fn default_density_threshold() -> f64 {
    DENSITY_THRESHOLD_DEFAULT
}
fn default_band_tolerance() -> f64 {
    BAND_TOLERANCE_DEFAULT
}
fn default_intensity() -> f64 {
    INTENSITY_PCT_DEFAULT
}

impl BeltKinematicsConfig {
    /// Geometry-only constructor; every tunable takes its default.
    pub fn new(
        belt_width_m: f64,
        belt_speed_mps: f64,
        camera_position_m: f64,
        actuator_position_m: f64,
    ) -> Self {
        Self {
            belt_width_m,
            belt_speed_mps,
            camera_position_m,
            actuator_position_m,
            travel_direction: TravelDirection::default(),
            cluster_eps_m: CLUSTER_EPS_M_DEFAULT,
            base_activation_time_ms: BASE_ACTIVATION_MS_DEFAULT,
            time_per_additional_fruit_ms: PER_FRUIT_MS_DEFAULT,
            safety_margin_ms: SAFETY_MARGIN_MS_DEFAULT,
            row_factor: ROW_FACTOR_DEFAULT,
            column_factor: COLUMN_FACTOR_DEFAULT,
            density_factor: DENSITY_FACTOR_DEFAULT,
            density_threshold_per_m2: DENSITY_THRESHOLD_DEFAULT,
            band_tolerance: BAND_TOLERANCE_DEFAULT,
            intensity_pct: INTENSITY_PCT_DEFAULT,
            actuators: Vec::new(),
        }
    }

    /// Distance from the camera reference line to the default actuator [m].
    #[inline]
    pub fn camera_to_actuator_m(&self) -> f64 {
        self.actuator_position_m - self.camera_position_m
    }

    /// Distance from the camera reference line to a specific zone [m].
    #[inline]
    pub fn camera_to_zone_m(&self, zone: &ActuatorZone) -> f64 {
        zone.position_m.unwrap_or(self.actuator_position_m) - self.camera_position_m
    }

    /// Base transit time from camera to actuator [s].
    #[inline]
    pub fn base_transit_s(&self) -> f64 {
        self.camera_to_actuator_m() / self.belt_speed_mps
    }

    /// Validate parameter bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("belt_width_m", self.belt_width_m)?;
        positive("belt_speed_mps", self.belt_speed_mps)?;
        finite("camera_position_m", self.camera_position_m)?;
        finite("actuator_position_m", self.actuator_position_m)?;
        if self.camera_to_actuator_m() <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "actuator_position_m {} must be downstream of camera_position_m {}",
                self.actuator_position_m, self.camera_position_m
            )));
        }
        positive("cluster_eps_m", self.cluster_eps_m)?;
        positive("base_activation_time_ms", self.base_activation_time_ms)?;
        non_negative(
            "time_per_additional_fruit_ms",
            self.time_per_additional_fruit_ms,
        )?;
        non_negative("safety_margin_ms", self.safety_margin_ms)?;
        at_least_one("row_factor", self.row_factor)?;
        at_least_one("column_factor", self.column_factor)?;
        at_least_one("density_factor", self.density_factor)?;
        positive("density_threshold_per_m2", self.density_threshold_per_m2)?;
        if !(self.band_tolerance > 0.0 && self.band_tolerance <= 2.0) {
            return Err(ConfigError::ValidationError(format!(
                "band_tolerance {} out of range (0, 2]",
                self.band_tolerance
            )));
        }
        if !(self.intensity_pct > 0.0 && self.intensity_pct <= 100.0) {
            return Err(ConfigError::ValidationError(format!(
                "intensity_pct {} out of range (0, 100]",
                self.intensity_pct
            )));
        }
        self.validate_actuators()?;
        self.validate_transit()
    }

    /// Every labeling point must be reached within [`MAX_TRANSIT_S`].
    fn validate_transit(&self) -> Result<(), ConfigError> {
        let farthest_m = self
            .actuators
            .iter()
            .map(|zone| self.camera_to_zone_m(zone))
            .fold(self.camera_to_actuator_m(), f64::max);
        let transit_s = farthest_m / self.belt_speed_mps;
        if !transit_s.is_finite() || transit_s > MAX_TRANSIT_S {
            return Err(ConfigError::ValidationError(format!(
                "belt_speed_mps {} too slow: {:.1} m to the farthest labeler takes {} s (max {} s)",
                self.belt_speed_mps, farthest_m, transit_s, MAX_TRANSIT_S
            )));
        }
        Ok(())
    }

    fn validate_actuators(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for zone in &self.actuators {
            if zone.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "actuator id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(zone.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate actuator id: {}",
                    zone.id
                )));
            }
            let in_belt = |v: f64| v.is_finite() && (0.0..=self.belt_width_m).contains(&v);
            if !in_belt(zone.lateral_min_m)
                || !in_belt(zone.lateral_max_m)
                || zone.lateral_min_m >= zone.lateral_max_m
            {
                return Err(ConfigError::ValidationError(format!(
                    "actuator {}: lateral range [{}, {}] invalid for belt width {}",
                    zone.id, zone.lateral_min_m, zone.lateral_max_m, self.belt_width_m
                )));
            }
            if let Some(pos) = zone.position_m {
                if !pos.is_finite() || pos <= self.camera_position_m {
                    return Err(ConfigError::ValidationError(format!(
                        "actuator {}: position_m {} must be downstream of the camera",
                        zone.id, pos
                    )));
                }
            }
        }
        Ok(())
    }
}

fn finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be finite, got {value}"
        )))
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be > 0, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be >= 0, got {value}"
        )))
    }
}

fn at_least_one(name: &str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value >= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be >= 1.0, got {value}"
        )))
    }
}

// ─── Atomic snapshot holder ─────────────────────────────────────────

/// Shared, swappable kinematics snapshot.
///
/// Readers take an `Arc` snapshot and keep it for a whole cycle. A reload
/// builds a new validated config and swaps the pointer; fields of a
/// snapshot in use are never mutated.
#[derive(Debug)]
pub struct SharedKinematics {
    current: RwLock<Arc<BeltKinematicsConfig>>,
    generation: AtomicU64,
}

impl SharedKinematics {
    /// Wrap a validated configuration.
    pub fn new(config: BeltKinematicsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        })
    }

    /// Current snapshot.
    #[inline]
    pub fn snapshot(&self) -> Arc<BeltKinematicsConfig> {
        self.current.read().clone()
    }

    /// Number of successful replacements since construction.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Validate `candidate` and swap it in.
    ///
    /// On validation failure the active snapshot is left untouched.
    pub fn replace(&self, candidate: BeltKinematicsConfig) -> Result<u64, ConfigError> {
        candidate.validate()?;
        let next = Arc::new(candidate);
        *self.current.write() = next;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Kinematics configuration swapped (generation {generation})");
        Ok(generation)
    }
}
