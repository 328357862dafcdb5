//! `permanence-memory` – world memory.
//!
//! Remembers every object the tracker has anchored, for the lifetime of the
//! process.  Nothing is persisted across restarts.
//!
//! # Modules
//!
//! - [`registry`] – [`ObjectRegistry`][registry::ObjectRegistry]: label-keyed,
//!   append-only store of [`TrackedObjectRecord`][permanence_types::TrackedObjectRecord]s
//!   with a fixed first-inserted-wins policy for ambiguous lookups.

pub mod registry;

pub use registry::{AMBIGUITY_PICK_INDEX, ObjectRegistry};
