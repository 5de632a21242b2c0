//! Transaction dispatcher: pushes a batch of already-applied local changes
//! out to their bound sources.
//!
//! `spec.md` §4.G: "handles a batch of change records at the end of a
//! logical transaction" — by the time a [`Transaction`] reaches
//! [`dispatch`], every write in it has already gone through the ordinary
//! interceptor pipeline and is reflected in its subject's stored value;
//! each [`PendingWrite`] simply carries the old/new pair a
//! [`crate::change::ChangeRecord`] recorded, so the dispatcher never needs
//! to re-read current state to figure out what to undo.
//!
//! Three modes:
//! - `Default` — each source's writes are dispatched independently; one
//!   source failing doesn't affect another.
//! - `Rollback` — if any write in the transaction fails, every write that
//!   did succeed is undone by replaying its pre-transaction (`old_value`)
//!   back to its source.
//! - `SingleWrite` — the transaction must target exactly one source; this
//!   is validated, along with the write count against that source's
//!   declared `WriteBatchSize`, before any write is attempted.
//!
//! Writes addressed to the same source are sliced into batches of at most
//! that source's `write_batch_size()` (or
//! [`crate::config::RuntimeConfig::default_write_batch_size`] if the source
//! doesn't declare one) and each batch is handed to [`Source::write_changes`]
//! in one call. A batch that fails stops dispatch to that source entirely:
//! every write in later batches is reported as a `"transaction.never_attempted"`
//! failure rather than attempted (`spec.md` §4.G).
//!
//! A write whose origin is the very source it would be routed back to is
//! skipped before dispatch (`spec.md` §4.F non-echo rule): the source
//! already has that value, having just supplied it.

use std::collections::HashMap;

use crate::change::ChangeOrigin;
use crate::context::Context;
use crate::error::{ErrorCategory, Result, SubjectError};
use crate::property::{PropertyReference, PropertyValue, SubjectId};
use crate::source::{source_id, Source, SourceChange, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Default,
    Rollback,
    SingleWrite,
}

/// One already-applied property change, ready to be pushed out to its
/// bound source.
#[derive(Clone)]
pub struct PendingWrite {
    pub property: PropertyReference,
    pub old_value: PropertyValue,
    pub new_value: PropertyValue,
    pub origin: ChangeOrigin,
}

impl PendingWrite {
    fn to_source_change(&self) -> SourceChange {
        SourceChange {
            property: self.property.clone(),
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
        }
    }
}

pub struct Transaction {
    pub mode: TransactionMode,
    pub writes: Vec<PendingWrite>,
}

impl Transaction {
    pub fn new(mode: TransactionMode, writes: Vec<PendingWrite>) -> Self {
        Self { mode, writes }
    }

    /// Builds a transaction directly from the [`crate::change::ChangeRecord`]s
    /// a batch of local writes produced, in the order they were applied.
    pub fn from_change_records(mode: TransactionMode, records: &[crate::change::ChangeRecord]) -> Self {
        let writes = records
            .iter()
            .map(|record| PendingWrite {
                property: PropertyReference::new(record.subject.clone(), record.property),
                old_value: record.old_value.clone(),
                new_value: record.new_value.clone(),
                origin: record.origin,
            })
            .collect();
        Self { mode, writes }
    }
}

#[derive(Debug, Default)]
pub struct TransactionOutcome {
    pub applied: Vec<PropertyReference>,
    pub failed: Vec<(PropertyReference, SubjectError)>,
    pub rolled_back: Vec<PropertyReference>,
}

struct Routed {
    source: std::sync::Arc<dyn Source>,
    writes: Vec<PendingWrite>,
}

/// Groups `writes` by bound source, dropping (without reporting a failure)
/// any write whose origin is the very source it would route to.
fn route(context: &Context, writes: &[PendingWrite]) -> Result<(Vec<Routed>, Vec<(PropertyReference, SubjectError)>)> {
    let mut by_source: HashMap<SourceId, Routed> = HashMap::new();
    let mut unrouted = Vec::new();
    for write in writes {
        match context.sources().source_for(&write.property) {
            Some(source) => {
                let key = source_id(&source);
                if let ChangeOrigin::Source(origin_id) = write.origin {
                    if origin_id == key {
                        continue;
                    }
                }
                by_source
                    .entry(key)
                    .or_insert_with(|| Routed {
                        source,
                        writes: Vec::new(),
                    })
                    .writes
                    .push(write.clone());
            }
            None => unrouted.push((
                write.property.clone(),
                SubjectError::new(
                    "transaction.no_source_bound",
                    format!("property '{}' has no bound source", write.property.name),
                    ErrorCategory::Permanent,
                ),
            )),
        }
    }
    Ok((by_source.into_values().collect(), unrouted))
}

fn batch_size(context: &Context, source: &dyn Source) -> usize {
    source
        .write_batch_size()
        .unwrap_or(context.config().default_write_batch_size)
        .max(1)
}

fn never_attempted_error() -> SubjectError {
    SubjectError::new(
        "transaction.never_attempted",
        "skipped: an earlier batch to this source failed",
        ErrorCategory::Transient,
    )
}

fn unreported_outcome_error() -> SubjectError {
    SubjectError::new(
        "transaction.unreported_outcome",
        "source's write_changes result did not account for this write",
        ErrorCategory::Transient,
    )
}

/// `SubjectError` doesn't implement `Clone` (its `cause` is a boxed trait
/// object); this rebuilds an equivalent error from its public fields so a
/// batch-level `WriteResult::error` can be attributed to more than one
/// write without moving it.
fn describe_error(err: &SubjectError) -> SubjectError {
    SubjectError::new(err.code(), err.message().to_string(), err.category())
}

/// Dispatches one source's share of a transaction, one `write_changes` call
/// per batch. `spec.md` §4.G: batches are sequential per source, and the
/// first batch to fail stops further batches to that source; every write in
/// a skipped batch is reported as a never-attempted failure rather than
/// silently dropped.
async fn dispatch_batch(
    context: &Context,
    source: &dyn Source,
    writes: &[PendingWrite],
    outcome: &mut TransactionOutcome,
) -> Vec<PendingWrite> {
    let mut applied = Vec::new();
    let size = batch_size(context, source);
    let mut stopped = false;
    for chunk in writes.chunks(size) {
        if stopped {
            for write in chunk {
                outcome.failed.push((write.property.clone(), never_attempted_error()));
            }
            continue;
        }

        let batch: Vec<SourceChange> = chunk.iter().map(PendingWrite::to_source_change).collect();
        let mut result = source.write_changes(&batch).await;
        let mut failed_map: HashMap<PropertyReference, SubjectError> = result.failed.drain(..).collect();
        let successful: std::collections::HashSet<PropertyReference> = result.successful.drain(..).collect();

        let mut chunk_failed = false;
        for write in chunk {
            if let Some(err) = failed_map.remove(&write.property) {
                outcome.failed.push((write.property.clone(), err));
                chunk_failed = true;
            } else if successful.contains(&write.property) {
                commit_write(context, write);
                outcome.applied.push(write.property.clone());
                applied.push(write.clone());
            } else if let Some(err) = &result.error {
                outcome.failed.push((write.property.clone(), describe_error(err)));
                chunk_failed = true;
            } else {
                outcome.failed.push((write.property.clone(), unreported_outcome_error()));
                chunk_failed = true;
            }
        }
        if chunk_failed {
            stopped = true;
        }
    }
    applied
}

/// Stores `write.new_value` on its subject, publishes the resulting
/// [`ChangeRecord`], and cascades to derived properties — mirroring what
/// [`crate::interceptor::pipeline::write`] does for a locally initiated
/// write.
fn commit_write(context: &Context, write: &PendingWrite) {
    let subject = &write.property.subject;
    let stamp = context.clock().now_utc();
    if let Err(err) = subject.core().raw_write(write.property.name, write.new_value.clone(), stamp) {
        context.logger().error(
            "transaction.commit_failed",
            &[
                crate::observability::Field::new("property", write.property.name),
                crate::observability::Field::new("error", err.to_string()),
            ],
        );
        return;
    }
    context.change_stream().publish(crate::change::ChangeRecord {
        subject: subject.clone(),
        property: write.property.name,
        old_value: write.old_value.clone(),
        new_value: write.new_value.clone(),
        origin: crate::change::ChangeOrigin::Local,
        changed_at_utc: stamp,
        received_at_utc: None,
    });
    crate::interceptor::pipeline::recompute_dependents(context, subject, write.property.name);
}

/// Dispatches `transaction`, pushing each write out to its bound source.
pub async fn dispatch(context: &Context, transaction: Transaction) -> Result<TransactionOutcome> {
    let (routed, unrouted) = route(context, &transaction.writes)?;
    let mut outcome = TransactionOutcome::default();
    outcome.failed.extend(unrouted);

    if transaction.mode == TransactionMode::SingleWrite {
        if routed.len() != 1 {
            return Err(SubjectError::validation_failure(
                "<transaction>",
                format!("SingleWrite transaction must target exactly one source, got {}", routed.len()),
            ));
        }
        let single = &routed[0];
        let limit = batch_size(context, single.source.as_ref());
        if single.writes.len() > limit {
            return Err(SubjectError::validation_failure(
                "<transaction>",
                format!(
                    "SingleWrite transaction has {} writes, exceeding source write batch size {limit}",
                    single.writes.len()
                ),
            ));
        }
    }

    for routed_source in &routed {
        dispatch_batch(context, routed_source.source.as_ref(), &routed_source.writes, &mut outcome).await;
    }

    if transaction.mode == TransactionMode::Rollback && !outcome.failed.is_empty() {
        for routed_source in &routed {
            let to_undo: Vec<PendingWrite> = routed_source
                .writes
                .iter()
                .filter(|w| outcome.applied.contains(&w.property))
                .map(|w| PendingWrite {
                    property: w.property.clone(),
                    old_value: w.new_value.clone(),
                    new_value: w.old_value.clone(),
                    origin: w.origin,
                })
                .collect();

            let size = batch_size(context, routed_source.source.as_ref());
            for chunk in to_undo.chunks(size) {
                let batch: Vec<SourceChange> = chunk.iter().map(PendingWrite::to_source_change).collect();
                let mut result = routed_source.source.write_changes(&batch).await;
                let mut failed_map: HashMap<PropertyReference, SubjectError> = result.failed.drain(..).collect();
                let successful: std::collections::HashSet<PropertyReference> = result.successful.drain(..).collect();
                for write in chunk {
                    if successful.contains(&write.property) {
                        commit_write(context, write);
                        outcome.rolled_back.push(write.property.clone());
                    } else {
                        let err = failed_map
                            .remove(&write.property)
                            .or_else(|| result.error.as_ref().map(describe_error))
                            .unwrap_or_else(unreported_outcome_error);
                        context.logger().error(
                            "transaction.rollback_write_failed",
                            &[
                                crate::observability::Field::new("property", write.property.name),
                                crate::observability::Field::new("error", err.to_string()),
                            ],
                        );
                    }
                }
            }
        }
    }

    Ok(outcome)
}
