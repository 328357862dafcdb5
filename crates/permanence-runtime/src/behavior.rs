//! Behavior Coordinator.
//!
//! Gates the single autonomous motion source the tracker may run: the
//! look-around behavior used while exploring.
//!
//! ```text
//!          begin                     stop
//!   Idle ─────────▶ Exploring ─────────▶ Idle
//!    │ stop: no-op      │ begin: no-op
//! ```
//!
//! Anything else that moves the observer (go-to, return home, anchoring a new
//! object) calls [`BehaviorCoordinator::stop`] first, so there is never more
//! than one motion source at a time.
//!
//! `stop` is best-effort: the handle is cleared even when the body fails to
//! confirm the stop, so a stuck behavior can never wedge the coordinator.
//! The body may therefore still be turning for a moment after `stop`
//! returns.

use std::sync::Arc;
use std::time::Duration;

use permanence_hal::Actuation;
use permanence_types::{BehaviorHandle, PermanenceError};
use tracing::{info, warn};

use crate::deadline::with_deadline;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    Idle,
    Exploring,
}

/// Owns the (at most one) active [`BehaviorHandle`].
pub struct BehaviorCoordinator {
    actuation: Arc<dyn Actuation>,
    deadline: Option<Duration>,
    active: Option<BehaviorHandle>,
}

impl BehaviorCoordinator {
    pub fn new(actuation: Arc<dyn Actuation>, deadline: Option<Duration>) -> Self {
        Self {
            actuation,
            deadline,
            active: None,
        }
    }

    pub fn state(&self) -> BehaviorState {
        if self.active.is_some() {
            BehaviorState::Exploring
        } else {
            BehaviorState::Idle
        }
    }

    pub fn active_handle(&self) -> Option<BehaviorHandle> {
        self.active
    }

    /// Start exploring unless already exploring.
    ///
    /// # Errors
    ///
    /// Returns [`PermanenceError::ActuationFailure`] if the behavior cannot
    /// be started; the coordinator stays idle.
    pub async fn begin(&mut self) -> Result<(), PermanenceError> {
        if self.active.is_some() {
            return Ok(());
        }
        let handle = with_deadline(
            "start_look_around",
            self.deadline,
            self.actuation.start_look_around(),
        )
        .await?;
        info!(?handle, "look-around behavior started");
        self.active = Some(handle);
        Ok(())
    }

    /// Stop the active behavior, if any.  Returns whether one was active.
    pub async fn stop(&mut self) -> bool {
        let Some(handle) = self.active.take() else {
            return false;
        };
        match with_deadline("stop_behavior", self.deadline, self.actuation.stop_behavior(handle))
            .await
        {
            Ok(()) => info!(?handle, "behavior stopped"),
            Err(e) => warn!(?handle, error = %e, "behavior stop not confirmed; clearing handle anyway"),
        }
        true
    }
}
