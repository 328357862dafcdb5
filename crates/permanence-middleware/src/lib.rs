//! `permanence-middleware` – the plumbing around the tracker.
//!
//! Moves events in and out of the tracking loop without caring about their
//! meaning.
//!
//! # Modules
//!
//! - [`intake`] – [`IntakeQueue`][intake::IntakeQueue]: bounded, drop-oldest
//!   queue between the upstream producer and the single consumer, with a
//!   wake-on-enqueue notifier.
//! - [`output`] – [`OutputBus`][output::OutputBus]: broadcast channel carrying
//!   one [`OutputEvent`][permanence_types::OutputEvent] per newly anchored
//!   object to any number of downstream subscribers.

pub mod intake;
pub mod output;

pub use intake::{DEFAULT_INTAKE_CAPACITY, IntakeQueue};
pub use output::{DEFAULT_OUTPUT_CAPACITY, OutputBus, OutputReceiver};
