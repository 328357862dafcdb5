//! [`TrackingLoop`] – the single consumer at the heart of the tracker.
//!
//! Drains the [`IntakeQueue`] one event at a time and routes each by kind:
//!
//! 1. **Speech** – classified into a [`VoiceCommand`].  Pause and explore go
//!    to the [`BehaviorCoordinator`]; home drives back to the pose recorded
//!    at construction; anything else is looked up in the [`ObjectRegistry`]
//!    and, if known, the observer drives to just short of the object.
//!    Speech never falls through to detection handling.
//! 2. **Detection** – only the top-ranked object is considered.  A label
//!    that is already tracked clears the intake queue (the queued frames are
//!    most likely more of the same object) and stops there.  A new label
//!    stops any exploration, is placed in front of the observer using the
//!    [`GeometryConfig`] estimate, recorded, announced out loud, and
//!    published as an [`OutputEvent`] grounded in the triggering event.
//! 3. **Empty detection** – clears the cached top object.
//!
//! Everything the loop owns (registry, coordinator, top-object cache) is
//! touched only from the consumer task; the intake queue is the only state
//! shared with producers.
//!
//! Every actuation call is awaited to completion (bounded by
//! [`TrackerConfig::actuation_timeout`]), so handling one event fully
//! finishes before the next is dequeued.  A failing event is logged and
//! abandoned; the loop itself never exits on a per-event error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use permanence_hal::{Actuation, AnchorRequest};
use permanence_memory::ObjectRegistry;
use permanence_middleware::{
    DEFAULT_INTAKE_CAPACITY, DEFAULT_OUTPUT_CAPACITY, IntakeQueue, OutputBus,
};
use permanence_perception::GeometryConfig;
use permanence_types::{
    DetectedObject, DetectionEvent, OutputEvent, PerceptionEvent, PerceptionPayload,
    PermanenceError, Pose, TrackedObjectRecord,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::behavior::{BehaviorCoordinator, BehaviorState};
use crate::command::VoiceCommand;
use crate::deadline::with_deadline;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default upper bound on a single actuation call.
pub const DEFAULT_ACTUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration bundle for [`TrackingLoop`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Distance / footprint calibration.
    pub geometry: GeometryConfig,
    /// Upper bound on each actuation call; `None` waits indefinitely.
    pub actuation_timeout: Option<Duration>,
    /// Intake slots; the tracker is designed around a single slot.
    pub intake_capacity: usize,
    /// Buffered output events per slow subscriber.
    pub output_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            actuation_timeout: Some(DEFAULT_ACTUATION_TIMEOUT),
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// A new object was anchored and announced.
    Anchored(OutputEvent),
    /// The top object's label is already tracked; `cleared` queued events
    /// were discarded.
    AlreadyTracked { label: String, cleared: usize },
    /// The detection frame carried no objects.
    NoObjects,
    /// A voice command was carried out.
    Command(VoiceCommand),
    /// A go-to command named an object that is not tracked.
    LookupMiss(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackingLoop
// ─────────────────────────────────────────────────────────────────────────────

/// The consumer: owns world memory and the behavior coordinator.
pub struct TrackingLoop {
    geometry: GeometryConfig,
    deadline: Option<Duration>,
    actuation: Arc<dyn Actuation>,
    registry: ObjectRegistry,
    behavior: BehaviorCoordinator,
    intake: IntakeQueue,
    output: OutputBus,
    top_object: Option<DetectedObject>,
    /// Where the observer was when the loop was built; "home".
    start_pose: Pose,
}

impl TrackingLoop {
    /// Build a loop reading from `intake` and publishing to `output`.
    ///
    /// The observer's current pose is captured as the home pose.
    pub fn new(
        config: &TrackerConfig,
        actuation: Arc<dyn Actuation>,
        intake: IntakeQueue,
        output: OutputBus,
    ) -> Self {
        let start_pose = actuation.current_pose();
        let behavior = BehaviorCoordinator::new(actuation.clone(), config.actuation_timeout);
        Self {
            geometry: config.geometry,
            deadline: config.actuation_timeout,
            actuation,
            registry: ObjectRegistry::new(),
            behavior,
            intake,
            output,
            top_object: None,
            start_pose,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn behavior_state(&self) -> BehaviorState {
        self.behavior.state()
    }

    /// Top object of the most recent non-empty detection frame.
    pub fn top_object(&self) -> Option<&DetectedObject> {
        self.top_object.as_ref()
    }

    pub fn start_pose(&self) -> Pose {
        self.start_pose
    }

    /// Consume the loop, keeping only what it has learned.  Releases the
    /// loop's handle on the output bus.
    pub fn into_registry(self) -> ObjectRegistry {
        self.registry
    }

    // -------------------------------------------------------------------------
    // Consumer loop
    // -------------------------------------------------------------------------

    /// Drain the intake queue until `shutdown` turns `true` (or its sender is
    /// dropped), then hand the loop back so its state can be inspected.
    ///
    /// Shutdown is checked between events; an event that is being handled
    /// runs to completion first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        info!("tracking loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(event) = self.intake.try_pop() else {
                tokio::select! {
                    _ = self.intake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };
            let event_id = event.id;
            match self.handle(event).await {
                Ok(outcome) => debug!(%event_id, ?outcome, "event handled"),
                Err(e) => warn!(%event_id, error = %e, "event abandoned"),
            }
        }
        info!(
            tracked = self.registry.len(),
            dropped = self.intake.dropped(),
            "tracking loop stopped"
        );
        self
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// - [`PermanenceError::MalformedEvent`] if the top object's geometry is
    ///   missing or degenerate.
    /// - [`PermanenceError::ActuationFailure`] if a required actuation call
    ///   fails or times out.
    #[instrument(skip_all, fields(event_id = %event.id, source = %event.source))]
    pub async fn handle(&mut self, event: PerceptionEvent) -> Result<TrackOutcome, PermanenceError> {
        match &event.payload {
            PerceptionPayload::Speech(speech) => self.handle_speech(&speech.text).await,
            PerceptionPayload::Detection(detection) => {
                self.handle_detection(&event, detection).await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Speech
    // -------------------------------------------------------------------------

    async fn handle_speech(&mut self, text: &str) -> Result<TrackOutcome, PermanenceError> {
        let command = VoiceCommand::parse(text);
        info!(text, command = command.name(), "voice command");
        match &command {
            VoiceCommand::Pause => {
                self.behavior.stop().await;
            }
            VoiceCommand::Explore => self.behavior.begin().await?,
            VoiceCommand::Home => {
                self.behavior.stop().await;
                with_deadline("move_to", self.deadline, self.actuation.move_to(self.start_pose))
                    .await?;
            }
            VoiceCommand::GoTo(label) => {
                let Some(record) = self.registry.resolve(label) else {
                    debug!(label = %label, "no tracked object with that name");
                    return Ok(TrackOutcome::LookupMiss(label.clone()));
                };
                let target = self.geometry.approach(record.anchored_pose);
                self.behavior.stop().await;
                info!(label = %label, x = target.position.x, y = target.position.y, "going to object");
                with_deadline("move_to", self.deadline, self.actuation.move_to(target)).await?;
            }
        }
        Ok(TrackOutcome::Command(command))
    }

    // -------------------------------------------------------------------------
    // Detection
    // -------------------------------------------------------------------------

    async fn handle_detection(
        &mut self,
        event: &PerceptionEvent,
        detection: &DetectionEvent,
    ) -> Result<TrackOutcome, PermanenceError> {
        let Some(top) = detection.top_object() else {
            self.top_object = None;
            return Ok(TrackOutcome::NoObjects);
        };
        self.top_object = Some(top.clone());
        let label = top.label.clone();

        if self.registry.has(&label) {
            let cleared = self.intake.clear();
            info!(label = %label, cleared, "object already tracked");
            return Ok(TrackOutcome::AlreadyTracked { label, cleared });
        }

        let bbox = top.bounding_box(event.id)?;
        let estimate = self
            .geometry
            .estimate(&bbox, self.actuation.camera_focal_length())
            .map_err(|e| PermanenceError::malformed(event.id, e.to_string()))?;

        self.behavior.stop().await;

        let observer_pose = self.actuation.current_pose();
        let footprint = estimate.footprint;
        let request = AnchorRequest {
            pose: estimate.offset(),
            size_x: footprint.height,
            size_y: footprint.height,
            size_z: footprint.width,
            relative_to_observer: true,
        };
        let anchor = with_deadline(
            "create_fixed_anchor",
            self.deadline,
            self.actuation.create_fixed_anchor(request),
        )
        .await?;
        info!(
            label = %label,
            anchor = %anchor.id,
            distance_mm = estimate.distance_mm,
            "object anchored"
        );

        self.registry.add(
            label.clone(),
            TrackedObjectRecord {
                label: label.clone(),
                observer_pose,
                anchored_pose: anchor.pose,
                anchor_id: anchor.id,
                sighted_at: Utc::now(),
            },
        );

        if let Err(e) = with_deadline("speak", self.deadline, self.actuation.speak(&label)).await {
            warn!(label = %label, error = %e, "announcement failed; object remains tracked");
        }

        let output = OutputEvent::grounded(event, label, anchor.id);
        match self.output.publish(output.clone()) {
            Ok(n) => debug!(subscribers = n, "output event published"),
            Err(e) => debug!(error = %e, "output event not delivered"),
        }
        Ok(TrackOutcome::Anchored(output))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use permanence_hal::{ActuationCall, SimActuation, SimOperation};
    use permanence_middleware::OutputReceiver;
    use permanence_types::{AnchorId, Quaternion, Vec3};

    const EPS: f32 = 1e-2;

    struct Rig {
        sim: Arc<SimActuation>,
        tracker: TrackingLoop,
        rx: OutputReceiver,
        intake: IntakeQueue,
    }

    fn rig_with(sim: SimActuation, config: TrackerConfig) -> Rig {
        let sim = Arc::new(sim);
        let intake = IntakeQueue::new(config.intake_capacity);
        let output = OutputBus::new(config.output_capacity);
        let rx = output.subscribe();
        let tracker = TrackingLoop::new(&config, sim.clone(), intake.clone(), output);
        Rig {
            sim,
            tracker,
            rx,
            intake,
        }
    }

    fn rig() -> Rig {
        rig_with(
            SimActuation::builder().with_focal_length(300.0, 300.0).build(),
            TrackerConfig::default(),
        )
    }

    fn mug_frame() -> PerceptionEvent {
        PerceptionEvent::detection(
            "vision::test",
            vec![DetectedObject::new("mug", 0.0, 40.0, 0.0, 60.0)],
        )
    }

    fn speech(text: &str) -> PerceptionEvent {
        PerceptionEvent::speech("asr::test", text)
    }

    #[test]
    fn default_config_uses_shared_capacities() {
        let config = TrackerConfig::default();
        assert_eq!(config.intake_capacity, DEFAULT_INTAKE_CAPACITY);
        assert_eq!(config.output_capacity, DEFAULT_OUTPUT_CAPACITY);
        assert_eq!(config.actuation_timeout, Some(DEFAULT_ACTUATION_TIMEOUT));
    }

    // ── Speech ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn explore_command_starts_exploring() {
        let mut r = rig();
        let outcome = r.tracker.handle(speech("let's explore now")).await.unwrap();
        assert_eq!(outcome, TrackOutcome::Command(VoiceCommand::Explore));
        assert_eq!(r.tracker.behavior_state(), BehaviorState::Exploring);
        assert_eq!(r.sim.count(SimOperation::StartLookAround), 1);
    }

    #[tokio::test]
    async fn pause_command_stops_exploring() {
        let mut r = rig();
        r.tracker.handle(speech("explore")).await.unwrap();
        r.tracker.handle(speech("pause")).await.unwrap();
        assert_eq!(r.tracker.behavior_state(), BehaviorState::Idle);
        assert_eq!(r.sim.active_behaviors(), 0);
    }

    #[tokio::test]
    async fn home_command_moves_to_start_pose_once() {
        let start = Pose::new(Vec3::new(12.0, -7.0, 0.0), Quaternion::from_yaw(0.4));
        let mut r = rig_with(
            SimActuation::builder().with_start_pose(start).build(),
            TrackerConfig::default(),
        );
        assert_eq!(r.tracker.start_pose(), start);
        r.tracker.handle(speech("go home")).await.unwrap();
        assert_eq!(r.sim.calls(), vec![ActuationCall::MoveTo(start)]);
    }

    #[tokio::test]
    async fn home_command_stops_exploring_first() {
        let mut r = rig();
        r.tracker.handle(speech("explore")).await.unwrap();
        r.tracker.handle(speech("home")).await.unwrap();
        let ops: Vec<SimOperation> = r.sim.calls().iter().map(ActuationCall::operation).collect();
        assert_eq!(
            ops,
            vec![SimOperation::StartLookAround, SimOperation::StopBehavior, SimOperation::MoveTo]
        );
    }

    #[tokio::test]
    async fn lookup_of_unknown_object_is_a_silent_no_op() {
        let mut r = rig();
        let outcome = r.tracker.handle(speech("find mug")).await.unwrap();
        assert_eq!(outcome, TrackOutcome::LookupMiss("find mug".to_string()));
        assert!(r.sim.calls().is_empty());
    }

    #[tokio::test]
    async fn speech_never_anchors_anything() {
        let mut r = rig();
        r.tracker.handle(speech("mug")).await.unwrap();
        assert_eq!(r.sim.count(SimOperation::CreateAnchor), 0);
        assert!(r.tracker.registry().is_empty());
        assert!(r.rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn go_to_tracked_object_stops_short_of_it() {
        let mut r = rig();
        r.tracker.handle(mug_frame()).await.unwrap();
        r.tracker.handle(speech("explore")).await.unwrap();

        let outcome = r.tracker.handle(speech("  Mug ")).await.unwrap();
        assert_eq!(outcome, TrackOutcome::Command(VoiceCommand::GoTo("mug".into())));
        assert_eq!(r.tracker.behavior_state(), BehaviorState::Idle);

        let Some(ActuationCall::MoveTo(target)) = r.sim.calls().last().cloned() else {
            panic!("expected a move");
        };
        // Anchor at x = 76 * 300 / 20 = 1140; approach leaves a third.
        assert!((target.position.x - 760.0).abs() < EPS);
        assert!((target.position.z - 10.0).abs() < EPS);
    }

    // ── Detection ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn repeated_sightings_anchor_once() {
        let mut r = rig();
        let first = r.tracker.handle(mug_frame()).await.unwrap();
        assert!(matches!(first, TrackOutcome::Anchored(_)));
        let second = r.tracker.handle(mug_frame()).await.unwrap();
        assert!(matches!(second, TrackOutcome::AlreadyTracked { ref label, .. } if label == "mug"));

        assert!(r.rx.try_recv().is_some());
        assert!(r.rx.try_recv().is_none());
        assert_eq!(r.tracker.registry().get("mug").unwrap().len(), 1);
        assert_eq!(r.sim.count(SimOperation::CreateAnchor), 1);
        assert_eq!(r.sim.count(SimOperation::Speak), 1);
    }

    #[tokio::test]
    async fn anchor_request_uses_estimated_geometry() {
        let mut r = rig();
        r.tracker.handle(mug_frame()).await.unwrap();
        let request = r
            .sim
            .calls()
            .into_iter()
            .find_map(|c| match c {
                ActuationCall::CreateAnchor(req) => Some(req),
                _ => None,
            })
            .expect("anchor requested");
        assert!(request.relative_to_observer);
        assert!((request.pose.position.x - 1140.0).abs() < EPS);
        assert_eq!(request.pose.position.y, 0.0);
        assert!((request.pose.position.z - 10.0).abs() < EPS);
        assert_eq!((request.size_x, request.size_y, request.size_z), (30.0, 30.0, 20.0));
    }

    #[tokio::test]
    async fn new_object_is_recorded_announced_and_published() {
        let mut r = rig();
        let frame = mug_frame();
        let frame_id = frame.id;
        let outcome = r.tracker.handle(frame).await.unwrap();

        let record = r.tracker.registry().resolve("mug").expect("recorded");
        assert_eq!(record.anchor_id, AnchorId(1));
        assert_eq!(record.observer_pose, Pose::identity());

        let published = r.rx.try_recv().expect("published");
        assert_eq!(published.label, "mug");
        assert_eq!(published.anchor_id, AnchorId(1));
        assert_eq!(published.grounded_in, frame_id);
        assert_eq!(outcome, TrackOutcome::Anchored(published));

        assert_eq!(r.sim.calls().last(), Some(&ActuationCall::Speak("mug".into())));
    }

    #[tokio::test]
    async fn detection_interrupts_exploration() {
        let mut r = rig();
        r.tracker.handle(speech("explore")).await.unwrap();
        r.tracker.handle(mug_frame()).await.unwrap();
        assert_eq!(r.tracker.behavior_state(), BehaviorState::Idle);
        assert_eq!(r.sim.active_behaviors(), 0);
    }

    #[tokio::test]
    async fn only_the_top_ranked_object_is_processed() {
        let mut r = rig();
        let frame = PerceptionEvent::detection(
            "vision::test",
            vec![
                DetectedObject::new("book", 0.0, 40.0, 0.0, 60.0).with_rank(1),
                DetectedObject::new("mug", 0.0, 40.0, 0.0, 60.0).with_rank(0),
            ],
        );
        r.tracker.handle(frame).await.unwrap();
        assert!(r.tracker.registry().has("mug"));
        assert!(!r.tracker.registry().has("book"));
        assert_eq!(r.tracker.top_object().unwrap().label, "mug");
    }

    #[tokio::test]
    async fn known_object_clears_the_intake_queue() {
        let config = TrackerConfig {
            intake_capacity: 3,
            ..TrackerConfig::default()
        };
        let mut r = rig_with(SimActuation::new(), config);
        r.tracker.handle(mug_frame()).await.unwrap();

        r.intake.push(mug_frame());
        r.intake.push(mug_frame());
        let outcome = r.tracker.handle(mug_frame()).await.unwrap();
        assert_eq!(
            outcome,
            TrackOutcome::AlreadyTracked {
                label: "mug".into(),
                cleared: 2
            }
        );
        assert!(r.intake.is_empty());
    }

    #[tokio::test]
    async fn empty_frame_clears_top_object() {
        let mut r = rig();
        r.tracker.handle(mug_frame()).await.unwrap();
        assert!(r.tracker.top_object().is_some());
        let outcome = r
            .tracker
            .handle(PerceptionEvent::detection("vision::test", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome, TrackOutcome::NoObjects);
        assert!(r.tracker.top_object().is_none());
    }

    #[tokio::test]
    async fn malformed_geometry_fails_fast_without_side_effects() {
        let mut r = rig();
        r.tracker.handle(speech("explore")).await.unwrap();
        let mut obj = DetectedObject::new("mug", 0.0, 40.0, 0.0, 60.0);
        obj.xmax = None;
        let err = r
            .tracker
            .handle(PerceptionEvent::detection("vision::test", vec![obj]))
            .await
            .unwrap_err();
        assert!(matches!(err, PermanenceError::MalformedEvent { .. }));
        assert!(r.tracker.registry().is_empty());
        assert_eq!(r.sim.count(SimOperation::CreateAnchor), 0);
        // Exploration was not interrupted by the bad frame.
        assert_eq!(r.tracker.behavior_state(), BehaviorState::Exploring);
    }

    #[tokio::test]
    async fn failed_anchor_leaves_label_untracked_for_retry() {
        let mut r = rig();
        r.sim.fail(SimOperation::CreateAnchor);
        let err = r.tracker.handle(mug_frame()).await.unwrap_err();
        assert!(matches!(err, PermanenceError::ActuationFailure { .. }));
        assert!(!r.tracker.registry().has("mug"));
        assert!(r.rx.try_recv().is_none());

        r.sim.clear_failures();
        assert!(matches!(
            r.tracker.handle(mug_frame()).await.unwrap(),
            TrackOutcome::Anchored(_)
        ));
    }

    #[tokio::test]
    async fn failed_announcement_still_publishes() {
        let mut r = rig();
        r.sim.fail(SimOperation::Speak);
        let outcome = r.tracker.handle(mug_frame()).await.unwrap();
        assert!(matches!(outcome, TrackOutcome::Anchored(_)));
        assert!(r.rx.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_move_times_out_as_actuation_failure() {
        let config = TrackerConfig {
            actuation_timeout: Some(Duration::from_secs(2)),
            ..TrackerConfig::default()
        };
        let sim = SimActuation::builder()
            .with_latency(SimOperation::MoveTo, Duration::from_secs(600))
            .build();
        let mut r = rig_with(sim, config);
        let err = r.tracker.handle(speech("home")).await.unwrap_err();
        assert!(matches!(&err, PermanenceError::ActuationFailure { operation, .. } if operation == "move_to"));
    }

    // ── Consumer loop ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_consumes_queue_until_shutdown() {
        let r = rig();
        let Rig {
            sim,
            tracker,
            mut rx,
            intake,
        } = r;
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(tracker.run(shutdown));

        intake.push(mug_frame());
        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("loop must publish")
            .expect("bus open");
        assert_eq!(out.label, "mug");

        // A malformed event does not stop the loop.
        intake.push(PerceptionEvent::detection(
            "vision::test",
            vec![DetectedObject {
                xmin: None,
                ..DetectedObject::new("book", 0.0, 1.0, 0.0, 1.0)
            }],
        ));
        intake.push(PerceptionEvent::detection(
            "vision::test",
            vec![DetectedObject::new("cup", 0.0, 30.0, 0.0, 30.0)],
        ));
        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("loop must survive bad events")
            .expect("bus open");
        assert_eq!(out.label, "cup");

        tx.send(true).unwrap();
        let tracker = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop must exit")
            .expect("no panic");
        assert_eq!(tracker.registry().len(), 2);
        assert_eq!(sim.count(SimOperation::CreateAnchor), 2);
    }

    #[tokio::test]
    async fn run_exits_when_shutdown_sender_dropped() {
        let r = rig();
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(r.tracker.run(shutdown));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop must exit")
            .expect("no panic");
    }
}
