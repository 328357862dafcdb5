//! Generic `Actuation` trait for the robot body the tracker drives.
//!
//! The tracker never talks to a concrete robot SDK.  Drivers implement this
//! trait and the rest of the engine only ever talks to the trait, so a real
//! robot, a remote bridge, or [`SimActuation`][crate::sim::SimActuation] can be
//! swapped without touching tracking logic.
//!
//! Every async method resolves only once the underlying action has completed
//! (the motion has finished, the utterance has been spoken, ...).  Callers
//! that need a bound on that wait wrap the future in a deadline.

use async_trait::async_trait;
use permanence_types::{AnchorId, BehaviorHandle, FocalLength, PermanenceError, Pose};

/// Request to place a fixed cuboid anchor into the spatial memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorRequest {
    /// Anchor pose; interpreted relative to the observer when
    /// `relative_to_observer` is set, otherwise in the world frame.
    pub pose: Pose,
    pub size_x: f32,
    pub size_y: f32,
    pub size_z: f32,
    pub relative_to_observer: bool,
}

/// A fixed anchor as stored by the spatial memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub id: AnchorId,
    /// World-frame pose of the anchor.
    pub pose: Pose,
}

/// The physical or simulated body: motion, speech, spatial memory and
/// camera intrinsics.
#[async_trait]
pub trait Actuation: Send + Sync {
    /// Camera focal length in pixels.
    fn camera_focal_length(&self) -> FocalLength;

    /// The observer's current world-frame pose.
    fn current_pose(&self) -> Pose;

    /// Create a fixed anchor and return its identifier and world pose.
    ///
    /// # Errors
    ///
    /// Returns [`PermanenceError::ActuationFailure`] if the spatial memory
    /// rejects the anchor.
    async fn create_fixed_anchor(&self, request: AnchorRequest) -> Result<Anchor, PermanenceError>;

    /// Drive to `pose`, resolving once the motion has completed.
    async fn move_to(&self, pose: Pose) -> Result<(), PermanenceError>;

    /// Speak `text`, resolving once the utterance has finished.
    async fn speak(&self, text: &str) -> Result<(), PermanenceError>;

    /// Start the autonomous look-around behavior.
    async fn start_look_around(&self) -> Result<BehaviorHandle, PermanenceError>;

    /// Stop a behavior previously returned by
    /// [`start_look_around`][Actuation::start_look_around].
    async fn stop_behavior(&self, handle: BehaviorHandle) -> Result<(), PermanenceError>;
}
