//! `permanence-hal` – the body the tracker drives.
//!
//! # Modules
//!
//! - [`actuation`] – [`Actuation`][actuation::Actuation]: the async trait
//!   covering motion, speech, the look-around behavior, fixed anchors in the
//!   spatial memory, and camera intrinsics.
//! - [`sim`] – [`SimActuation`][sim::SimActuation]: an in-process simulated
//!   body that records calls, for tests and headless runs.

pub mod actuation;
pub mod sim;

pub use actuation::{Actuation, Anchor, AnchorRequest};
pub use sim::{ActuationCall, SimActuation, SimOperation};
