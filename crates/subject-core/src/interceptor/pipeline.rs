//! Builds and runs the interceptor chain for a subject's property or
//! method, and hosts the derived-property recompute path.
//!
//! Chain construction concatenates every attached context's interceptor
//! list in attachment order, deduplicated by identity (`spec.md` §4.B:
//! "when a subject is attached to multiple contexts the effective chain is
//! the concatenation of their interceptor lists in attachment order"). The
//! built chain is cached on [`crate::subject::SubjectCore`] behind an
//! `ArcSwapOption` and invalidated whenever its attachment set changes;
//! interceptor-list mutation after first attach is logged as a warning by
//! [`crate::context::Context`] rather than tracked for fine-grained
//! invalidation, since by that point a chain may already be cached for any
//! number of subjects.

use std::sync::Arc;

use crate::change::dependency;
use crate::change::record::{ChangeOrigin, ChangeRecord};
use crate::context::Context;
use crate::error::Result;
use crate::interceptor::{InterceptContext, MethodInterceptor, ReadInterceptor, WriteInterceptor};
use crate::property::{PropertyReference, PropertyValue};
use crate::subject::Subject;

fn ptr_id<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

fn dedup_reads(lists: Vec<Vec<Arc<dyn ReadInterceptor>>>) -> Vec<Arc<dyn ReadInterceptor>> {
    let mut seen = std::collections::HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|i| seen.insert(ptr_id(i)))
        .collect()
}
fn dedup_writes(lists: Vec<Vec<Arc<dyn WriteInterceptor>>>) -> Vec<Arc<dyn WriteInterceptor>> {
    let mut seen = std::collections::HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|i| seen.insert(ptr_id(i)))
        .collect()
}
fn dedup_methods(lists: Vec<Vec<Arc<dyn MethodInterceptor>>>) -> Vec<Arc<dyn MethodInterceptor>> {
    let mut seen = std::collections::HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|i| seen.insert(ptr_id(i)))
        .collect()
}

/// Picks the context a given chain entry should report to an interceptor as
/// `InterceptContext::context`: the first attached context, since
/// interceptors rarely care which context invoked them and the pipeline
/// itself is context-agnostic about ordering beyond attachment order.
fn primary_context(subject: &Arc<dyn Subject>) -> Option<Context> {
    subject
        .core()
        .attached_contexts()
        .into_iter()
        .next()
        .map(|inner| Context { inner })
}

/// Returns this subject's effective interceptor chains, rebuilding and
/// caching them only when the attachment set has changed since the chain
/// was last built (`spec.md` §4.B concatenation rule; ambient stack §3's
/// `ArcSwap`-guarded cache so repeated calls don't walk every attached
/// context's interceptor list).
fn chains(subject: &Arc<dyn Subject>) -> Arc<crate::subject::ChainCache> {
    if let Some(cached) = subject.core().cached_chain() {
        return cached;
    }
    let contexts = subject.core().attached_contexts();
    let reads = dedup_reads(
        contexts
            .iter()
            .map(|inner| Context { inner: inner.clone() }.read_interceptors())
            .collect(),
    );
    let writes = dedup_writes(
        contexts
            .iter()
            .map(|inner| Context { inner: inner.clone() }.write_interceptors())
            .collect(),
    );
    let methods = dedup_methods(
        contexts
            .iter()
            .map(|inner| Context { inner: inner.clone() }.method_interceptors())
            .collect(),
    );
    subject.core().store_chain(reads, writes, methods)
}

fn read_chain(subject: &Arc<dyn Subject>) -> Vec<Arc<dyn ReadInterceptor>> {
    chains(subject).reads.clone()
}

fn write_chain(subject: &Arc<dyn Subject>) -> Vec<Arc<dyn WriteInterceptor>> {
    chains(subject).writes.clone()
}

fn method_chain(subject: &Arc<dyn Subject>) -> Vec<Arc<dyn MethodInterceptor>> {
    chains(subject).methods.clone()
}

fn run_read(
    chain: &[Arc<dyn ReadInterceptor>],
    idx: usize,
    ctx: &InterceptContext,
    terminal: &mut dyn FnMut() -> Result<PropertyValue>,
) -> Result<PropertyValue> {
    match chain.get(idx) {
        Some(interceptor) => {
            interceptor.around(ctx, &mut || run_read(chain, idx + 1, ctx, terminal))
        }
        None => terminal(),
    }
}

fn run_write(
    chain: &[Arc<dyn WriteInterceptor>],
    idx: usize,
    ctx: &InterceptContext,
    value: PropertyValue,
    terminal: &mut dyn FnMut(PropertyValue) -> Result<()>,
) -> Result<()> {
    match chain.get(idx) {
        Some(interceptor) => interceptor.around(ctx, value, &mut |v| run_write(chain, idx + 1, ctx, v, terminal)),
        None => terminal(value),
    }
}

fn run_method(
    chain: &[Arc<dyn MethodInterceptor>],
    idx: usize,
    ctx: &InterceptContext,
    args: Vec<PropertyValue>,
    terminal: &mut dyn FnMut(Vec<PropertyValue>) -> Result<PropertyValue>,
) -> Result<PropertyValue> {
    match chain.get(idx) {
        Some(interceptor) => interceptor.around(ctx, args, &mut |a| run_method(chain, idx + 1, ctx, a, terminal)),
        None => terminal(args),
    }
}

/// Reads `name` off `subject` through its interceptor chain. Ordinary
/// stored properties terminate at [`crate::subject::SubjectCore::raw_read`];
/// derived properties recompute when stale.
pub fn read(subject: &Arc<dyn Subject>, name: &'static str) -> Result<PropertyValue> {
    let chain = read_chain(subject);
    let owning_context = primary_context(subject);
    read_with_context(subject, name, &chain, owning_context.as_ref())
}

fn read_with_context(
    subject: &Arc<dyn Subject>,
    name: &'static str,
    chain: &[Arc<dyn ReadInterceptor>],
    owning_context: Option<&Context>,
) -> Result<PropertyValue> {
    let is_derived = subject.core().is_derived(name);
    let subject_for_terminal = subject.clone();
    let mut terminal = move || -> Result<PropertyValue> {
        let value = if is_derived {
            recompute_derived(&subject_for_terminal, name)?
        } else {
            subject_for_terminal.core().raw_read(name)?
        };
        dependency::record_read(&PropertyReference::new(subject_for_terminal.clone(), name));
        Ok(value)
    };

    match owning_context {
        Some(context) => {
            let ctx = InterceptContext {
                subject,
                name,
                context,
            };
            run_read(chain, 0, &ctx, &mut terminal)
        }
        None => terminal(),
    }
}

/// Recomputes a derived property: pushes a dependency-recording frame,
/// invokes the registered compute function (which reads other properties
/// through the ordinary `read` path, recorded into the frame), stores the
/// result and stamps the write time, and updates the `required`/`used_by`
/// side data (`spec.md` §4.E).
pub fn recompute_derived(subject: &Arc<dyn Subject>, name: &'static str) -> Result<PropertyValue> {
    let compute = subject
        .core()
        .derived_fn(name)
        .ok_or_else(|| crate::error::SubjectError::unknown_property(name))?;

    dependency::push_frame();
    let result = compute(subject.as_ref());
    let recorded = dependency::pop_frame();

    let value = result?;
    let stamp = crate::change::scope::active()
        .map(|active| active.changed_at_utc)
        .or_else(|| primary_context(subject).map(|c| c.clock().now_utc()))
        .unwrap_or(crate::clock::Timestamp(0));
    subject.core().raw_write(name, value.clone(), stamp)?;
    dependency::update_dependencies(&PropertyReference::new(subject.clone(), name), recorded);
    Ok(value)
}

/// Writes `value` to `name` on `subject` through its interceptor chain,
/// publishing a [`ChangeRecord`] on success. `spec.md` §4.B: an interceptor
/// that never calls `next` vetoes the write; nothing is stored and nothing
/// is published.
pub fn write(subject: &Arc<dyn Subject>, name: &'static str, value: PropertyValue) -> Result<()> {
    let chain = write_chain(subject);
    let owning_context = primary_context(subject);
    let old_value = subject.core().raw_read(name).unwrap_or(PropertyValue::Null);

    let subject_for_terminal = subject.clone();
    let owning_context_for_publish = owning_context.clone();
    let old_value_for_publish = old_value.clone();
    let mut terminal = move |v: PropertyValue| -> Result<()> {
        let stamp = crate::change::scope::active()
            .map(|active| active.changed_at_utc)
            .or_else(|| owning_context_for_publish.as_ref().map(|c| c.clock().now_utc()))
            .unwrap_or(crate::clock::Timestamp(0));
        subject_for_terminal.core().raw_write(name, v.clone(), stamp)?;
        if let Some(context) = &owning_context_for_publish {
            context.change_stream().publish(ChangeRecord {
                subject: subject_for_terminal.clone(),
                property: name,
                old_value: old_value_for_publish.clone(),
                new_value: v,
                origin: ChangeOrigin::Local,
                changed_at_utc: stamp,
                received_at_utc: None,
            });
            recompute_dependents(context, &subject_for_terminal, name);
        }
        Ok(())
    };

    match owning_context.as_ref() {
        Some(context) => {
            let ctx = InterceptContext {
                subject,
                name,
                context,
            };
            run_write(&chain, 0, &ctx, value, &mut terminal)
        }
        None => terminal(value),
    }
}

/// After a successful write, recomputes (and republishes) every derived
/// property that read this one during its last evaluation. Used both by the
/// local write path above and by [`crate::source::set_value_from_source`],
/// since a source-originated update must keep derived properties consistent
/// just as a local write does.
pub(crate) fn recompute_dependents(context: &Context, subject: &Arc<dyn Subject>, name: &'static str) {
    let reference = PropertyReference::new(subject.clone(), name);
    for dependent in dependency::used_by(&reference) {
        let old = dependent
            .subject
            .core()
            .raw_read(dependent.name)
            .unwrap_or(PropertyValue::Null);
        match recompute_derived(&dependent.subject, dependent.name) {
            Ok(new_value) if new_value != old => {
                let stamp = crate::change::scope::active()
                    .map(|active| active.changed_at_utc)
                    .unwrap_or_else(|| context.clock().now_utc());
                context.change_stream().publish(ChangeRecord {
                    subject: dependent.subject.clone(),
                    property: dependent.name,
                    old_value: old,
                    new_value,
                    origin: ChangeOrigin::Local,
                    changed_at_utc: stamp,
                    received_at_utc: None,
                });
                recompute_dependents(context, &dependent.subject, dependent.name);
            }
            Ok(_) => {}
            Err(err) => {
                context.logger().error(
                    "derived.recompute_failed",
                    &[
                        crate::observability::Field::new("subject", dependent.subject.type_name()),
                        crate::observability::Field::new("property", dependent.name),
                        crate::observability::Field::new("error", err.to_string()),
                    ],
                );
            }
        }
    }
}

/// Invokes `name` as a method on `subject` through its interceptor chain.
pub fn invoke(
    subject: &Arc<dyn Subject>,
    name: &'static str,
    args: Vec<PropertyValue>,
    terminal: impl FnOnce(Vec<PropertyValue>) -> Result<PropertyValue>,
) -> Result<PropertyValue> {
    let chain = method_chain(subject);
    let owning_context = primary_context(subject);
    let mut terminal = Some(terminal);
    let mut call_terminal = move |a: Vec<PropertyValue>| -> Result<PropertyValue> {
        (terminal.take().expect("method terminal invoked twice"))(a)
    };

    match owning_context.as_ref() {
        Some(context) => {
            let ctx = InterceptContext {
                subject,
                name,
                context,
            };
            run_method(&chain, 0, &ctx, args, &mut call_terminal)
        }
        None => call_terminal(args),
    }
}
