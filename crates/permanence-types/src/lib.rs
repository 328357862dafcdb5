//! `permanence-types` – shared data model for the object-permanence engine.
//!
//! Everything that crosses a crate boundary lives here: inbound perception
//! events, the records kept in world memory, outbound anchor events, and the
//! workspace-wide [`PermanenceError`].

mod pose;

pub use pose::{Pose, Quaternion, Vec3};

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Update tag attached to every upstream event.  Only [`UpdateKind::Add`] is
/// acted upon; the other kinds are filtered out at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Add,
    Revoke,
    Commit,
    #[serde(other)]
    Other,
}

/// Axis-aligned bounding box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Horizontal span in pixels.
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    /// Vertical span in pixels.
    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// One object reported inside a [`DetectionEvent`].
///
/// Geometry fields are optional on the wire so that an upstream frame with a
/// missing coordinate is reported as [`PermanenceError::MalformedEvent`]
/// instead of failing deserialization of the whole event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedObject {
    pub label: String,
    #[serde(default)]
    pub xmin: Option<f32>,
    #[serde(default)]
    pub xmax: Option<f32>,
    #[serde(default)]
    pub ymin: Option<f32>,
    #[serde(default)]
    pub ymax: Option<f32>,
    /// Ordering rank; `0` is the top object of the frame.
    #[serde(default)]
    pub rank: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl DetectedObject {
    /// A fully-specified object with rank 0.
    pub fn new(label: impl Into<String>, xmin: f32, xmax: f32, ymin: f32, ymax: f32) -> Self {
        Self {
            label: label.into(),
            xmin: Some(xmin),
            xmax: Some(xmax),
            ymin: Some(ymin),
            ymax: Some(ymax),
            rank: 0,
            confidence: None,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// Validate and return the bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`PermanenceError::MalformedEvent`] when a coordinate is
    /// missing or non-finite, when the box has no horizontal extent, or when
    /// its vertical extent is negative.
    pub fn bounding_box(&self, event_id: Uuid) -> Result<BoundingBox, PermanenceError> {
        let field = |name: &str, v: Option<f32>| match v {
            Some(v) if v.is_finite() => Ok(v),
            Some(_) => Err(PermanenceError::malformed(
                event_id,
                format!("object '{}' has non-finite {name}", self.label),
            )),
            None => Err(PermanenceError::malformed(
                event_id,
                format!("object '{}' is missing {name}", self.label),
            )),
        };
        let bbox = BoundingBox {
            xmin: field("xmin", self.xmin)?,
            xmax: field("xmax", self.xmax)?,
            ymin: field("ymin", self.ymin)?,
            ymax: field("ymax", self.ymax)?,
        };
        if bbox.width() <= 0.0 {
            return Err(PermanenceError::malformed(
                event_id,
                format!("object '{}' has degenerate width {}", self.label, bbox.width()),
            ));
        }
        if bbox.height() < 0.0 {
            return Err(PermanenceError::malformed(
                event_id,
                format!("object '{}' has negative height {}", self.label, bbox.height()),
            ));
        }
        Ok(bbox)
    }
}

/// One perception frame from the object detector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DetectionEvent {
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
}

impl DetectionEvent {
    /// The object with the lowest rank; ties go to the earliest listed.
    pub fn top_object(&self) -> Option<&DetectedObject> {
        self.objects.iter().min_by_key(|o| o.rank)
    }
}

/// One recognized utterance from the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SpeechCommandEvent {
    pub text: String,
}

/// The two kinds of event the tracker understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PerceptionPayload {
    Detection(DetectionEvent),
    Speech(SpeechCommandEvent),
}

/// Envelope around every inbound event.  `id` is what outbound events are
/// grounded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerceptionEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// e.g. `"vision::yolo"` or `"asr::whisper"`
    #[serde(default)]
    pub source: String,
    pub payload: PerceptionPayload,
}

impl PerceptionEvent {
    pub fn new(source: impl Into<String>, payload: PerceptionPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Convenience constructor for a detection frame.
    pub fn detection(source: impl Into<String>, objects: Vec<DetectedObject>) -> Self {
        Self::new(source, PerceptionPayload::Detection(DetectionEvent { objects }))
    }

    /// Convenience constructor for a recognized utterance.
    pub fn speech(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            source,
            PerceptionPayload::Speech(SpeechCommandEvent { text: text.into() }),
        )
    }
}

/// One line of the host's inbound stream: an event plus its update tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntakeMessage {
    #[serde(default = "default_update")]
    pub update: UpdateKind,
    pub event: PerceptionEvent,
}

fn default_update() -> UpdateKind {
    UpdateKind::Add
}

/// Stable identifier the spatial memory assigns to a fixed anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(pub u64);

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anchor-{}", self.0)
    }
}

/// Opaque reference to a running autonomous behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BehaviorHandle(Uuid);

impl BehaviorHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BehaviorHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera intrinsics needed for distance estimation, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalLength {
    pub fx: f32,
    pub fy: f32,
}

/// What world memory remembers about an anchored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObjectRecord {
    pub label: String,
    /// Where the observer stood when the object was first seen.
    pub observer_pose: Pose,
    /// Pose of the fixed anchor as reported by the spatial memory.
    pub anchored_pose: Pose,
    pub anchor_id: AnchorId,
    pub sighted_at: DateTime<Utc>,
}

/// Emitted once per newly anchored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub anchor_id: AnchorId,
    /// Id of the [`PerceptionEvent`] that caused this anchor.
    pub grounded_in: Uuid,
}

impl OutputEvent {
    pub fn grounded(source: &PerceptionEvent, label: impl Into<String>, anchor_id: AnchorId) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            label: label.into(),
            anchor_id,
            grounded_in: source.id,
        }
    }
}

/// Workspace-wide error type.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum PermanenceError {
    #[error("Malformed event {event_id}: {details}")]
    MalformedEvent { event_id: Uuid, details: String },

    #[error("Actuation failure during {operation}: {details}")]
    ActuationFailure { operation: String, details: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PermanenceError {
    pub fn malformed(event_id: Uuid, details: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event_id,
            details: details.into(),
        }
    }

    pub fn actuation(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ActuationFailure {
            operation: operation.into(),
            details: details.into(),
        }
    }
}
