//! `permanence-runtime` – the object-permanence tracker.
//!
//! Turns a stream of perception events into world memory: every newly seen
//! object is anchored in front of the observer, remembered by label, and
//! announced; voice commands steer exploration and let the observer drive
//! back to anything it has seen.
//!
//! # Modules
//!
//! - [`tracking_loop`] – [`TrackingLoop`]: the single consumer that routes
//!   speech and detection events, plus [`TrackerConfig`] and
//!   [`TrackOutcome`].
//! - [`service`] – [`TrackerService`]: spawns the loop on Tokio, exposes the
//!   intake entry point and output subscriptions, and shuts down on a
//!   [`ShutdownTrigger`].
//! - [`behavior`] – [`BehaviorCoordinator`]: at most one autonomous
//!   look-around behavior at a time.
//! - [`command`] – [`VoiceCommand`]: keyword classification of recognized
//!   speech.
//! - [`deadline`] – [`with_deadline`][deadline::with_deadline]: bounded waits
//!   on actuation calls.
//! - [`telemetry`] – [`init_tracing`]: stderr logging with optional OTLP span
//!   export.

pub mod behavior;
pub mod command;
pub mod deadline;
pub mod service;
pub mod telemetry;
pub mod tracking_loop;

pub use behavior::{BehaviorCoordinator, BehaviorState};
pub use command::VoiceCommand;
pub use service::{ShutdownTrigger, TrackerService};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tracking_loop::{DEFAULT_ACTUATION_TIMEOUT, TrackOutcome, TrackerConfig, TrackingLoop};
