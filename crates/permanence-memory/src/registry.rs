//! Object Registry.
//!
//! Maps an object label (e.g. `"mug"`) to the ordered list of
//! [`TrackedObjectRecord`]s anchored under it.  Entries are never mutated,
//! expired, or removed.
//!
//! The tracker only adds a label the first time it is seen, so in practice
//! every list has exactly one element.  The registry itself does not enforce
//! that; it simply appends.  When a list does hold more than one record,
//! [`ObjectRegistry::resolve`] picks the entry at [`AMBIGUITY_PICK_INDEX`].
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use permanence_memory::registry::ObjectRegistry;
//! use permanence_types::{AnchorId, Pose, TrackedObjectRecord};
//!
//! let mut registry = ObjectRegistry::new();
//! registry.add("mug", TrackedObjectRecord {
//!     label: "mug".to_string(),
//!     observer_pose: Pose::identity(),
//!     anchored_pose: Pose::identity(),
//!     anchor_id: AnchorId(1),
//!     sighted_at: Utc::now(),
//! });
//!
//! assert!(registry.has("mug"));
//! assert_eq!(registry.resolve("mug").unwrap().anchor_id, AnchorId(1));
//! assert!(registry.resolve("book").is_none());
//! ```

use std::collections::BTreeMap;

use permanence_types::TrackedObjectRecord;
use serde::Serialize;
use tracing::info;

/// Index chosen when a label maps to several records: the first inserted.
pub const AMBIGUITY_PICK_INDEX: usize = 0;

/// Append-only, label-keyed store of anchored objects.
#[derive(Debug, Default, Serialize)]
pub struct ObjectRegistry {
    objects: BTreeMap<String, Vec<TrackedObjectRecord>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if at least one record exists under `label`.
    pub fn has(&self, label: &str) -> bool {
        self.objects.contains_key(label)
    }

    /// All records under `label`, oldest first.
    pub fn get(&self, label: &str) -> Option<&[TrackedObjectRecord]> {
        self.objects.get(label).map(Vec::as_slice)
    }

    /// The record a lookup of `label` should use.
    ///
    /// Logs when the label is ambiguous; that is a known simplification, not
    /// an error.
    pub fn resolve(&self, label: &str) -> Option<&TrackedObjectRecord> {
        let seen = self.get(label)?;
        if seen.len() > 1 {
            info!(
                label,
                count = seen.len(),
                index = AMBIGUITY_PICK_INDEX,
                "several objects share this label; selecting the first"
            );
        }
        seen.get(AMBIGUITY_PICK_INDEX)
    }

    /// Append `record` under `label`, creating the list if needed.
    pub fn add(&mut self, label: impl Into<String>, record: TrackedObjectRecord) {
        self.objects.entry(label.into()).or_default().push(record);
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    /// Total number of records across all labels.
    pub fn record_count(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }
}
