//! [`TrackerService`] – process-level wrapper around the tracking loop.
//!
//! Owns the intake queue and output bus, spawns the [`TrackingLoop`] on the
//! Tokio runtime, and tears it down on request.
//!
//! ```text
//!  producers ──process_update──▶ IntakeQueue ──▶ TrackingLoop task ──▶ OutputBus ──▶ subscribe()
//!                                                      ▲
//!                           ShutdownTrigger ───watch───┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use permanence_hal::SimActuation;
//! use permanence_runtime::{TrackerConfig, TrackerService};
//! use permanence_types::{PerceptionEvent, UpdateKind};
//!
//! # async fn demo() -> Result<(), permanence_types::PermanenceError> {
//! let mut service = TrackerService::new(&TrackerConfig::default(), Arc::new(SimActuation::new()));
//! let mut outputs = service.subscribe();
//! service.prepare_run()?;
//! service.process_update(UpdateKind::Add, PerceptionEvent::speech("asr", "explore"));
//! let tracker = service.shutdown().await?;
//! println!("{} objects tracked", tracker.registry().len());
//! # Ok(()) }
//! ```

use std::sync::Arc;

use permanence_hal::Actuation;
use permanence_middleware::{IntakeQueue, OutputBus, OutputReceiver};
use permanence_types::{PerceptionEvent, PermanenceError, UpdateKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::tracking_loop::{TrackerConfig, TrackingLoop};

/// Cloneable handle that asks the tracking loop to stop.
///
/// Safe to fire from any thread, including a signal handler.
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once [`trigger`][Self::trigger] has been called.
    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so this cannot report a closed channel.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// The tracker as a running service.
pub struct TrackerService {
    intake: IntakeQueue,
    output: OutputBus,
    shutdown: Arc<watch::Sender<bool>>,
    pending: Option<TrackingLoop>,
    task: Option<JoinHandle<TrackingLoop>>,
}

impl TrackerService {
    pub fn new(config: &TrackerConfig, actuation: Arc<dyn Actuation>) -> Self {
        let intake = IntakeQueue::new(config.intake_capacity);
        let output = OutputBus::new(config.output_capacity);
        let tracker = TrackingLoop::new(config, actuation, intake.clone(), output.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            intake,
            output,
            shutdown: Arc::new(shutdown),
            pending: Some(tracker),
            task: None,
        }
    }

    /// Spawn the consumer task.  Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PermanenceError::Channel`] if the loop was already started.
    pub fn prepare_run(&mut self) -> Result<(), PermanenceError> {
        let tracker = self
            .pending
            .take()
            .ok_or_else(|| PermanenceError::Channel("tracking loop already started".into()))?;
        let shutdown = self.shutdown.subscribe();
        self.task = Some(tokio::spawn(tracker.run(shutdown)));
        info!(capacity = self.intake.capacity(), "tracker service running");
        Ok(())
    }

    /// Upstream entry point; see [`IntakeQueue::process_update`].
    pub fn process_update(&self, kind: UpdateKind, event: PerceptionEvent) -> bool {
        self.intake.process_update(kind, event)
    }

    /// Handle on the intake queue for producers that outlive a borrow.
    pub fn intake(&self) -> IntakeQueue {
        self.intake.clone()
    }

    pub fn subscribe(&self) -> OutputReceiver {
        self.output.subscribe()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(self.shutdown.clone())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and return it, so the caller can inspect what was
    /// tracked.  Also works on a service that was never started.
    ///
    /// # Errors
    ///
    /// Returns [`PermanenceError::Channel`] if the loop was already shut down
    /// or its task panicked.
    pub async fn shutdown(&mut self) -> Result<TrackingLoop, PermanenceError> {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let tracker = task
                .await
                .map_err(|e| PermanenceError::Channel(format!("tracking loop task failed: {e}")))?;
            info!(tracked = tracker.registry().len(), "tracker service stopped");
            return Ok(tracker);
        }
        self.pending
            .take()
            .ok_or_else(|| PermanenceError::Channel("tracking loop already shut down".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permanence_hal::{SimActuation, SimOperation};
    use permanence_types::DetectedObject;
    use std::time::Duration;

    fn service() -> (Arc<SimActuation>, TrackerService) {
        let sim = Arc::new(SimActuation::new());
        let svc = TrackerService::new(&TrackerConfig::default(), sim.clone());
        (sim, svc)
    }

    #[tokio::test]
    async fn events_flow_from_intake_to_subscribers() {
        let (sim, mut svc) = service();
        let mut rx = svc.subscribe();
        svc.prepare_run().unwrap();
        assert!(svc.is_running());

        let frame = PerceptionEvent::detection(
            "vision::test",
            vec![DetectedObject::new("book", 10.0, 90.0, 0.0, 120.0)],
        );
        let frame_id = frame.id;
        assert!(svc.process_update(UpdateKind::Add, frame));

        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("output within deadline")
            .expect("bus open");
        assert_eq!(out.label, "book");
        assert_eq!(out.grounded_in, frame_id);

        let tracker = svc.shutdown().await.unwrap();
        assert!(tracker.registry().has("book"));
        assert_eq!(sim.count(SimOperation::CreateAnchor), 1);
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn non_add_updates_never_reach_the_loop() {
        let (sim, mut svc) = service();
        svc.prepare_run().unwrap();
        assert!(!svc.process_update(
            UpdateKind::Revoke,
            PerceptionEvent::speech("asr::test", "explore")
        ));
        let _ = svc.shutdown().await.unwrap();
        assert_eq!(sim.count(SimOperation::StartLookAround), 0);
    }

    #[tokio::test]
    async fn prepare_run_twice_is_an_error() {
        let (_sim, mut svc) = service();
        svc.prepare_run().unwrap();
        assert!(matches!(svc.prepare_run(), Err(PermanenceError::Channel(_))));
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_run_returns_idle_loop() {
        let (_sim, mut svc) = service();
        let tracker = svc.shutdown().await.unwrap();
        assert!(tracker.registry().is_empty());
        assert!(svc.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn trigger_from_another_thread_stops_the_loop() {
        let (_sim, mut svc) = service();
        svc.prepare_run().unwrap();
        let trigger = svc.shutdown_trigger();
        std::thread::spawn(move || trigger.trigger())
            .join()
            .unwrap();
        assert!(svc.shutdown_trigger().is_triggered());
        tokio::time::timeout(Duration::from_secs(2), svc.shutdown())
            .await
            .expect("loop must exit")
            .unwrap();
    }
}
