//! In-process simulated body for CI/CD testing without a physical robot.
//!
//! [`SimActuation`] implements [`Actuation`] by recording every call and
//! returning plausible state: moves teleport the observer, observer-relative
//! anchors are resolved by pose composition, and anchor ids are handed out in
//! increasing order.  Failures and latency can be injected per operation so
//! error paths and deadlines can be exercised headlessly.
//!
//! # Example
//!
//! ```rust
//! use permanence_hal::sim::SimActuation;
//!
//! let body = SimActuation::builder().with_focal_length(290.0, 290.0).build();
//! assert!(body.calls().is_empty());
//! ```

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use permanence_types::{AnchorId, BehaviorHandle, FocalLength, PermanenceError, Pose};
use tracing::debug;

use crate::actuation::{Actuation, Anchor, AnchorRequest};

/// Focal length reported when none is configured (pixels).
const DEFAULT_FOCAL_LENGTH: f32 = 296.54;

// ────────────────────────────────────────────────────────────────────────────
// Recorded calls
// ────────────────────────────────────────────────────────────────────────────

/// The operations a [`SimActuation`] can be told to fail or delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    CreateAnchor,
    MoveTo,
    Speak,
    StartLookAround,
    StopBehavior,
}

impl SimOperation {
    fn name(self) -> &'static str {
        match self {
            SimOperation::CreateAnchor => "create_fixed_anchor",
            SimOperation::MoveTo => "move_to",
            SimOperation::Speak => "speak",
            SimOperation::StartLookAround => "start_look_around",
            SimOperation::StopBehavior => "stop_behavior",
        }
    }
}

/// One call observed by the simulator, in the order it was issued.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationCall {
    CreateAnchor(AnchorRequest),
    MoveTo(Pose),
    Speak(String),
    StartLookAround,
    StopBehavior(BehaviorHandle),
}

impl ActuationCall {
    pub fn operation(&self) -> SimOperation {
        match self {
            ActuationCall::CreateAnchor(_) => SimOperation::CreateAnchor,
            ActuationCall::MoveTo(_) => SimOperation::MoveTo,
            ActuationCall::Speak(_) => SimOperation::Speak,
            ActuationCall::StartLookAround => SimOperation::StartLookAround,
            ActuationCall::StopBehavior(_) => SimOperation::StopBehavior,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimActuation
// ────────────────────────────────────────────────────────────────────────────

struct SimState {
    pose: Pose,
    next_anchor: u64,
    active_behaviors: HashSet<BehaviorHandle>,
    calls: Vec<ActuationCall>,
    failing: HashSet<SimOperation>,
}

/// A simulated robot body.  Cheap to share behind an `Arc`.
pub struct SimActuation {
    focal_length: FocalLength,
    latency: Duration,
    slow: HashSet<SimOperation>,
    state: Mutex<SimState>,
}

impl SimActuation {
    /// A simulator with default intrinsics, starting at the origin.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SimActuationBuilder {
        SimActuationBuilder::default()
    }

    /// Every call issued so far, oldest first.
    pub fn calls(&self) -> Vec<ActuationCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of kind `op`.
    pub fn count(&self, op: SimOperation) -> usize {
        self.lock().calls.iter().filter(|c| c.operation() == op).count()
    }

    /// Number of behaviors started and not yet stopped.
    pub fn active_behaviors(&self) -> usize {
        self.lock().active_behaviors.len()
    }

    /// Make every subsequent call of kind `op` fail.
    pub fn fail(&self, op: SimOperation) {
        self.lock().failing.insert(op);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, then apply injected latency and failures.
    async fn begin(&self, call: ActuationCall) -> Result<(), PermanenceError> {
        let op = call.operation();
        debug!(operation = op.name(), "sim actuation call");
        let failing = {
            let mut state = self.lock();
            state.calls.push(call);
            state.failing.contains(&op)
        };
        if self.slow.contains(&op) {
            tokio::time::sleep(self.latency).await;
        }
        if failing {
            return Err(PermanenceError::actuation(op.name(), "injected simulator failure"));
        }
        Ok(())
    }
}

impl Default for SimActuation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuation for SimActuation {
    fn camera_focal_length(&self) -> FocalLength {
        self.focal_length
    }

    fn current_pose(&self) -> Pose {
        self.lock().pose
    }

    async fn create_fixed_anchor(&self, request: AnchorRequest) -> Result<Anchor, PermanenceError> {
        self.begin(ActuationCall::CreateAnchor(request)).await?;
        let mut state = self.lock();
        let pose = if request.relative_to_observer {
            state.pose.compose(request.pose)
        } else {
            request.pose
        };
        state.next_anchor += 1;
        Ok(Anchor {
            id: AnchorId(state.next_anchor),
            pose,
        })
    }

    async fn move_to(&self, pose: Pose) -> Result<(), PermanenceError> {
        self.begin(ActuationCall::MoveTo(pose)).await?;
        self.lock().pose = pose;
        Ok(())
    }

    async fn speak(&self, text: &str) -> Result<(), PermanenceError> {
        self.begin(ActuationCall::Speak(text.to_string())).await
    }

    async fn start_look_around(&self) -> Result<BehaviorHandle, PermanenceError> {
        self.begin(ActuationCall::StartLookAround).await?;
        let handle = BehaviorHandle::new();
        self.lock().active_behaviors.insert(handle);
        Ok(handle)
    }

    async fn stop_behavior(&self, handle: BehaviorHandle) -> Result<(), PermanenceError> {
        self.begin(ActuationCall::StopBehavior(handle)).await?;
        if !self.lock().active_behaviors.remove(&handle) {
            return Err(PermanenceError::actuation(
                SimOperation::StopBehavior.name(),
                "behavior is not running",
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimActuation`].
pub struct SimActuationBuilder {
    focal_length: FocalLength,
    start_pose: Pose,
    latency: Duration,
    slow: HashSet<SimOperation>,
}

impl Default for SimActuationBuilder {
    fn default() -> Self {
        Self {
            focal_length: FocalLength {
                fx: DEFAULT_FOCAL_LENGTH,
                fy: DEFAULT_FOCAL_LENGTH,
            },
            start_pose: Pose::identity(),
            latency: Duration::ZERO,
            slow: HashSet::new(),
        }
    }
}

impl SimActuationBuilder {
    pub fn with_focal_length(mut self, fx: f32, fy: f32) -> Self {
        self.focal_length = FocalLength { fx, fy };
        self
    }

    pub fn with_start_pose(mut self, pose: Pose) -> Self {
        self.start_pose = pose;
        self
    }

    /// Delay every call of kind `op` by `latency` before it completes.
    pub fn with_latency(mut self, op: SimOperation, latency: Duration) -> Self {
        self.latency = latency;
        self.slow.insert(op);
        self
    }

    pub fn build(self) -> SimActuation {
        SimActuation {
            focal_length: self.focal_length,
            latency: self.latency,
            slow: self.slow,
            state: Mutex::new(SimState {
                pose: self.start_pose,
                next_anchor: 0,
                active_behaviors: HashSet::new(),
                calls: Vec::new(),
                failing: HashSet::new(),
            }),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
