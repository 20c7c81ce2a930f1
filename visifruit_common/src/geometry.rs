//! Belt-plane geometry: mapped points and clusters.
//!
//! Coordinates are meters on the belt surface. `lateral_m` runs across the
//! belt from its left edge (0) to `belt_width_m`. `longitudinal_m` runs along
//! the direction of travel, relative to the camera reference line at the
//! capture instant; positive values are already downstream of it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detection::{Detection, FruitClass};

/// A point on the belt plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeltPosition {
    pub lateral_m: f64,
    pub longitudinal_m: f64,
}

impl BeltPosition {
    #[inline]
    pub fn distance_to(&self, other: &BeltPosition) -> f64 {
        (self.lateral_m - other.lateral_m).hypot(self.longitudinal_m - other.longitudinal_m)
    }
}

/// A detection projected onto the belt plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeltPoint {
    /// Box center.
    pub position: BeltPosition,
    /// Physical extent across the belt [m].
    pub width_m: f64,
    /// Physical extent along the belt [m].
    pub length_m: f64,
    /// Box diagonal [m].
    pub size_m: f64,
    /// Box touches a frame edge; the size estimate may be short.
    pub truncated: bool,
    pub detection: Detection,
}

impl BeltPoint {
    #[inline]
    pub fn lateral_m(&self) -> f64 {
        self.position.lateral_m
    }

    #[inline]
    pub fn longitudinal_m(&self) -> f64 {
        self.position.longitudinal_m
    }

    /// Most downstream edge of the fruit [m].
    #[inline]
    pub fn leading_edge_m(&self) -> f64 {
        self.position.longitudinal_m + self.length_m * 0.5
    }

    /// Most upstream edge of the fruit [m].
    #[inline]
    pub fn trailing_edge_m(&self) -> f64 {
        self.position.longitudinal_m - self.length_m * 0.5
    }

    #[inline]
    pub fn distance_to(&self, other: &BeltPoint) -> f64 {
        self.position.distance_to(&other.position)
    }
}

/// Axis-aligned bounds of a cluster's member footprints [m].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub lateral_min_m: f64,
    pub lateral_max_m: f64,
    pub longitudinal_min_m: f64,
    pub longitudinal_max_m: f64,
}

impl Extent {
    /// Bounds covering every member's footprint. `None` for no points.
    pub fn of<'a>(points: impl IntoIterator<Item = &'a BeltPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut ext = Self::footprint(first);
        for p in iter {
            let f = Self::footprint(p);
            ext.lateral_min_m = ext.lateral_min_m.min(f.lateral_min_m);
            ext.lateral_max_m = ext.lateral_max_m.max(f.lateral_max_m);
            ext.longitudinal_min_m = ext.longitudinal_min_m.min(f.longitudinal_min_m);
            ext.longitudinal_max_m = ext.longitudinal_max_m.max(f.longitudinal_max_m);
        }
        Some(ext)
    }

    fn footprint(p: &BeltPoint) -> Self {
        Self {
            lateral_min_m: p.lateral_m() - p.width_m * 0.5,
            lateral_max_m: p.lateral_m() + p.width_m * 0.5,
            longitudinal_min_m: p.trailing_edge_m(),
            longitudinal_max_m: p.leading_edge_m(),
        }
    }

    #[inline]
    pub fn width_m(&self) -> f64 {
        self.lateral_max_m - self.lateral_min_m
    }

    #[inline]
    pub fn length_m(&self) -> f64 {
        self.longitudinal_max_m - self.longitudinal_min_m
    }

    #[inline]
    pub fn area_m2(&self) -> f64 {
        self.width_m() * self.length_m()
    }
}

/// A group of spatially contiguous fruit from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Index within its frame, in leading-edge order.
    pub id: usize,
    /// Ordered by longitudinal position.
    pub members: Vec<BeltPoint>,
    pub extent: Extent,
    pub centroid: BeltPosition,
    /// Estimated rows along the direction of travel.
    pub rows: usize,
    /// Estimated columns across the belt.
    pub columns: usize,
    /// Members per square meter of footprint.
    pub density_per_m2: f64,
}

impl Cluster {
    #[inline]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Most downstream member edge [m].
    #[inline]
    pub fn leading_edge_m(&self) -> f64 {
        self.extent.longitudinal_max_m
    }

    /// Most frequent class; ties go to the class seen first.
    pub fn majority_class(&self) -> Option<&FruitClass> {
        let mut counts: HashMap<&FruitClass, (usize, usize)> = HashMap::new();
        for (order, m) in self.members.iter().enumerate() {
            counts.entry(&m.detection.class).or_insert((0, order)).0 += 1;
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
            .map(|(class, _)| class)
    }

    /// Any member box touches the frame edge.
    pub fn any_truncated(&self) -> bool {
        self.members.iter().any(|m| m.truncated)
    }
}
