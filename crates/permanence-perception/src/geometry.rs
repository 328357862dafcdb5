//! Monocular Geometry Estimator.
//!
//! Turns a 2-D bounding box into the rough 3-D placement the tracker anchors
//! into world memory.  The model is a pinhole camera and an object of known
//! real-world width:
//!
//! ```text
//! distance_mm = known_width_mm * focal_length_px / observed_width_px
//! ```
//!
//! Raw detector boxes are systematically oversized, so each span is divided
//! by `footprint_divisor` before use.  Boxes that end up smaller than
//! `min_footprint` in either axis are replaced by a `min_footprint` cube.
//!
//! The constants in [`GeometryConfig::default`] were calibrated against one
//! class of object roughly 76 mm wide; they are tunables, not physics.
//!
//! # Example
//!
//! ```rust
//! use permanence_perception::geometry::GeometryConfig;
//! use permanence_types::{BoundingBox, FocalLength};
//!
//! let geometry = GeometryConfig::default();
//! let bbox = BoundingBox { xmin: 0.0, xmax: 40.0, ymin: 0.0, ymax: 60.0 };
//! let est = geometry
//!     .estimate(&bbox, FocalLength { fx: 300.0, fy: 300.0 })
//!     .unwrap();
//!
//! // Half-width of 20 px: 76 * 300 / 20.
//! assert!((est.distance_mm - 1140.0).abs() < 1e-3);
//! assert_eq!((est.footprint.width, est.footprint.height), (20.0, 30.0));
//! ```

use permanence_types::{BoundingBox, FocalLength, Pose, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the estimator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("observed pixel width must be positive and finite, got {0}")]
    DegenerateWidth(f32),
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Calibration constants for the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Assumed real-world width of every detected object (mm).
    #[serde(default = "default_known_width_mm")]
    pub known_width_mm: f32,
    /// Each raw bounding-box span is divided by this before use.
    #[serde(default = "default_footprint_divisor")]
    pub footprint_divisor: f32,
    /// Smallest footprint edge an anchor may have.
    #[serde(default = "default_min_footprint")]
    pub min_footprint: f32,
    /// Share of the x distance to an object that a go-to command leaves
    /// uncovered, so the observer stops short of the object.
    #[serde(default = "default_approach_fraction")]
    pub approach_fraction: f32,
}

fn default_known_width_mm() -> f32 {
    76.0
}
fn default_footprint_divisor() -> f32 {
    2.0
}
fn default_min_footprint() -> f32 {
    10.0
}
fn default_approach_fraction() -> f32 {
    1.0 / 3.0
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            known_width_mm: default_known_width_mm(),
            footprint_divisor: default_footprint_divisor(),
            min_footprint: default_min_footprint(),
            approach_fraction: default_approach_fraction(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pure functions
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole distance estimate from an observed width.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateWidth`] when `observed_px` is zero,
/// negative, or not finite.
pub fn estimate_distance(
    observed_px: f32,
    known_width_mm: f32,
    focal_length_px: f32,
) -> Result<f32, GeometryError> {
    if !(observed_px.is_finite() && observed_px > 0.0) {
        return Err(GeometryError::DegenerateWidth(observed_px));
    }
    Ok(known_width_mm * focal_length_px / observed_px)
}

/// Size of the anchor cuboid derived from a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub width: f32,
    pub height: f32,
}

/// Divide both raw spans by `divisor`; if either result is below `floor`,
/// return a `floor` × `floor` footprint instead.
///
/// Both axes collapse together, matching the tracker's established 10 × 10
/// cube for small objects, rather than each axis being clamped on its own.
pub fn normalize_footprint(width_px: f32, height_px: f32, divisor: f32, floor: f32) -> Footprint {
    let width = width_px / divisor;
    let height = height_px / divisor;
    if width < floor || height < floor {
        Footprint {
            width: floor,
            height: floor,
        }
    } else {
        Footprint { width, height }
    }
}

/// Observer-relative pose for a new anchor: `distance_mm` straight ahead,
/// raised by half the footprint width.
pub fn anchor_offset(distance_mm: f32, footprint: Footprint) -> Pose {
    Pose::from_translation(Vec3::new(distance_mm, 0.0, footprint.width / 2.0))
}

/// A pose short of `target`: x is reduced by `x * fraction`, y, z and the
/// rotation are kept.
pub fn approach_pose(target: Pose, fraction: f32) -> Pose {
    let mut near = target;
    near.position.x -= target.position.x * fraction;
    near
}

// ────────────────────────────────────────────────────────────────────────────
// Estimator
// ────────────────────────────────────────────────────────────────────────────

/// Output of [`GeometryConfig::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectEstimate {
    /// Distance from the observer along its forward axis (mm).
    pub distance_mm: f32,
    /// Anchor footprint after the minimum-size clamp.
    pub footprint: Footprint,
}

impl ObjectEstimate {
    /// See [`anchor_offset`].
    pub fn offset(&self) -> Pose {
        anchor_offset(self.distance_mm, self.footprint)
    }
}

impl GeometryConfig {
    /// Estimate distance and footprint for `bbox`.
    ///
    /// The distance is computed from the reduced width *before* the
    /// minimum-size clamp is applied.
    ///
    /// # Errors
    ///
    /// Propagates [`GeometryError::DegenerateWidth`] for boxes without
    /// horizontal extent.
    pub fn estimate(
        &self,
        bbox: &BoundingBox,
        focal: FocalLength,
    ) -> Result<ObjectEstimate, GeometryError> {
        let reduced_width = bbox.width() / self.footprint_divisor;
        let distance_mm = estimate_distance(reduced_width, self.known_width_mm, focal.fx)
            .inspect_err(|e| {
                debug!(xmin = bbox.xmin, xmax = bbox.xmax, error = %e, "no distance estimate")
            })?;
        let footprint = normalize_footprint(
            bbox.width(),
            bbox.height(),
            self.footprint_divisor,
            self.min_footprint,
        );
        Ok(ObjectEstimate {
            distance_mm,
            footprint,
        })
    }

    /// See [`approach_pose`].
    pub fn approach(&self, target: Pose) -> Pose {
        approach_pose(target, self.approach_fraction)
    }
}
