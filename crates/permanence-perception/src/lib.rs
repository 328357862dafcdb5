//! `permanence-perception` – from pixels to placements.
//!
//! # Modules
//!
//! - [`geometry`] – [`GeometryConfig`][geometry::GeometryConfig]: pinhole
//!   distance estimation from a bounding box of known real-world width, the
//!   minimum-size footprint clamp, and the anchor / approach poses derived
//!   from them.

pub mod geometry;

pub use geometry::{
    Footprint, GeometryConfig, GeometryError, ObjectEstimate, approach_pose, estimate_distance,
    normalize_footprint,
};
