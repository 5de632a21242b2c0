//! Source binding: external systems of record for individual properties.
//!
//! `spec.md` §4.F: a property may be bound to at most one source at a time
//! (single ownership — binding a second source to an already-bound property
//! replaces the first, logged as a warning). Values arriving from a source
//! go through [`set_value_from_source`], which applies the value directly
//! and tags the resulting [`ChangeRecord`] with a [`ChangeOrigin::Source`]
//! carrying that source's identity, so the transaction dispatcher
//! (`crate::transaction`) can exclude it from being routed back to the
//! source it just came from. Outbound writes — pushing a locally changed
//! value out to a bound source — are the transaction dispatcher's job, not
//! this module's; binding only tracks ownership and buffers writes made
//! while the source is disconnected.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::change::record::{ChangeOrigin, ChangeRecord};
use crate::change::scope;
use crate::clock::Timestamp;
use crate::context::Context;
use crate::error::SubjectError;
use crate::observability::Field;
use crate::property::{subject_id, PropertyReference, PropertyValue, SubjectId};
use crate::subject::Subject;

/// Stable identity for a bound [`Source`], used to tag a [`ChangeRecord`]
/// with the source it came from and to recognize, at dispatch time, that a
/// write is being routed back to the very source that produced it.
pub type SourceId = usize;

pub fn source_id(source: &Arc<dyn Source>) -> SourceId {
    Arc::as_ptr(source) as *const () as usize
}

/// One already-applied property change, as the transaction dispatcher
/// presents a batch to [`Source::write_changes`].
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub property: PropertyReference,
    pub old_value: PropertyValue,
    pub new_value: PropertyValue,
}

/// The outcome of one `write_changes` call. `spec.md` §6: "`WriteResult`
/// reports `(successful_changes, error_or_null, failed_changes)` so the
/// dispatcher can distinguish partial from total failures." `error` carries
/// a batch-wide failure (e.g. the connection itself dropped) that applies to
/// every change not otherwise accounted for in `successful` or `failed`.
#[derive(Debug, Default)]
pub struct WriteResult {
    pub successful: Vec<PropertyReference>,
    pub error: Option<SubjectError>,
    pub failed: Vec<(PropertyReference, SubjectError)>,
}

/// An external system of record for one or more properties.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Pushes one batch of already-applied local changes out to the
    /// external system in a single call (`spec.md` §4.G: "calls
    /// `WriteChangesAsync(batch)` sequentially" per source).
    async fn write_changes(&self, batch: &[SourceChange]) -> WriteResult;

    /// Maximum number of writes the transaction dispatcher should batch
    /// into one call to this source at a time. `None` means no declared
    /// limit; the dispatcher falls back to
    /// [`crate::config::RuntimeConfig::default_write_batch_size`].
    fn write_batch_size(&self) -> Option<usize> {
        None
    }
}

struct Binding {
    source: Arc<dyn Source>,
    /// Writes buffered while this source is known to be disconnected,
    /// flushed by the runtime monitor on reconnect.
    pending: Mutex<VecDeque<(PropertyReference, PropertyValue)>>,
}

/// Tracks which source, if any, owns each property.
#[derive(Default)]
pub struct SourceRegistry {
    bindings: DashMap<(SubjectId, &'static str), Binding>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, context: &Context, property: &PropertyReference, source: Arc<dyn Source>) {
        let key = (subject_id(&property.subject), property.name);
        if self.bindings.contains_key(&key) {
            context.logger().warn(
                "source.rebind",
                &[
                    Field::new("subject", property.subject.type_name()),
                    Field::new("property", property.name),
                ],
            );
        }
        self.bindings.insert(
            key,
            Binding {
                source,
                pending: Mutex::new(VecDeque::new()),
            },
        );
    }

    pub fn unbind(&self, property: &PropertyReference) {
        self.bindings.remove(&(subject_id(&property.subject), property.name));
    }

    pub fn source_for(&self, property: &PropertyReference) -> Option<Arc<dyn Source>> {
        self.bindings
            .get(&(subject_id(&property.subject), property.name))
            .map(|b| b.source.clone())
    }

    /// Buffers an outbound write while its source is disconnected.
    pub fn buffer_write(&self, property: &PropertyReference, value: PropertyValue) {
        if let Some(binding) = self.bindings.get(&(subject_id(&property.subject), property.name)) {
            binding.pending.lock().push_back((property.clone(), value));
        }
    }

    /// Drains and returns every write buffered for `source_name`'s
    /// properties, in the order they were buffered, for replay on
    /// reconnect.
    pub fn drain_pending(&self, source_name: &str) -> Vec<(PropertyReference, PropertyValue)> {
        let mut out = Vec::new();
        for entry in self.bindings.iter() {
            if entry.source.name() == source_name {
                out.extend(entry.pending.lock().drain(..));
            }
        }
        out
    }
}

/// Applies a value received from `source`. The resulting change is
/// published with `origin: ChangeOrigin::Source(source_id(source))` and
/// `received_at_utc` set, and `changed_at_utc` is stamped from the
/// source-supplied timestamp rather than the local clock (`spec.md` §4.F).
///
/// While this call and anything it triggers (derived-property recompute and
/// cascade) are running on this thread, [`crate::change::scope::active`]
/// reports the same `changed_at_utc`, so a cascaded write still carries the
/// source's timestamp even though it keeps `ChangeOrigin::Local` — only the
/// directly-written property is attributed to the source itself.
pub fn set_value_from_source(
    context: &Context,
    source: &Arc<dyn Source>,
    subject: &Arc<dyn Subject>,
    property: &'static str,
    value: PropertyValue,
    changed_at_utc: Timestamp,
    received_at_utc: Timestamp,
) -> crate::error::Result<()> {
    let old_value = subject.core().raw_read(property)?;
    let _scope = scope::enter(scope::ActiveChange {
        source: source_id(source),
        changed_at_utc,
        received_at_utc,
    });
    subject.core().raw_write(property, value.clone(), changed_at_utc)?;
    context.change_stream().publish(ChangeRecord {
        subject: subject.clone(),
        property,
        old_value,
        new_value: value,
        origin: ChangeOrigin::Source(source_id(source)),
        changed_at_utc,
        received_at_utc: Some(received_at_utc),
    });
    crate::interceptor::pipeline::recompute_dependents(context, subject, property);
    Ok(())
}
