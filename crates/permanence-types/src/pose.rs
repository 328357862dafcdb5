//! Rigid-body poses in the observer's world frame.
//!
//! Positions are expressed in millimetres; rotations are unit quaternions in
//! (w, x, y, z) order.  A [`Pose`] describes where a frame sits relative to
//! its parent: to bring a point from the child frame into the parent frame,
//! rotate it by `rotation` and then add `position`.
//!
//! # Example
//!
//! ```rust
//! use permanence_types::{Pose, Quaternion, Vec3};
//!
//! // Observer stands 100 mm along x, facing +y (90° about z).
//! let observer = Pose::new(
//!     Vec3::new(100.0, 0.0, 0.0),
//!     Quaternion::from_yaw(std::f32::consts::FRAC_PI_2),
//! );
//! // Something 50 mm straight ahead of the observer.
//! let ahead = Pose::from_translation(Vec3::new(50.0, 0.0, 0.0));
//!
//! let world = observer.compose(ahead);
//! assert!((world.position.x - 100.0).abs() < 1e-3);
//! assert!((world.position.y - 50.0).abs() < 1e-3);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D position vector (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `yaw_rad` about the vertical (z) axis.
    pub fn from_yaw(yaw_rad: f32) -> Self {
        let half = yaw_rad * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

/// Position plus orientation of the observer or of an anchored object.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quaternion,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }

    /// A pose at `position` with no rotation.
    pub fn from_translation(position: Vec3) -> Self {
        Self::new(position, Quaternion::identity())
    }

    /// The origin pose.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Express `child` (given relative to `self`) in `self`'s parent frame.
    ///
    /// If `self` = T_world_observer and `child` = T_observer_object, the
    /// result is T_world_object.
    pub fn compose(self, child: Self) -> Self {
        let position = self.position.add(self.rotation.rotate(child.position));
        let rotation = self.rotation.mul(child.rotation);
        Self::new(position, rotation)
    }
}
