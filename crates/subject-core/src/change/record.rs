//! `ChangeRecord`: the unit published on every successful property write.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::property::PropertyValue;
use crate::source::SourceId;
use crate::subject::Subject;

/// Where a change originated. `spec.md` §4.F distinguishes a locally
/// initiated write from one applied via `SetValueFromSource`, carrying the
/// identity of the source it came from so the transaction dispatcher (§4.G)
/// can exclude it from being routed back to that same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Source(SourceId),
}

/// One property change, published to the context's change stream after the
/// terminal write succeeds (`spec.md` §4.F).
#[derive(Clone)]
pub struct ChangeRecord {
    pub subject: Arc<dyn Subject>,
    pub property: &'static str,
    pub old_value: PropertyValue,
    pub new_value: PropertyValue,
    pub origin: ChangeOrigin,
    /// When the terminal write was applied.
    pub changed_at_utc: Timestamp,
    /// When the update was received from a source, if `origin` is `Source`.
    /// Distinct from `changed_at_utc` because applying it may be queued
    /// behind other subscriber backpressure.
    pub received_at_utc: Option<Timestamp>,
}

impl std::fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("subject", &self.subject.type_name())
            .field("property", &self.property)
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .field("origin", &self.origin)
            .field("changed_at_utc", &self.changed_at_utc)
            .finish()
    }
}
