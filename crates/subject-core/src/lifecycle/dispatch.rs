//! Attach/detach walk and lifecycle handler dispatch.
//!
//! `spec.md` §4.D: "attaching the root of a previously unattached tree walks
//! the whole tree and fires attach handlers bottom-up, so a parent's
//! handler can assume its children are already live. Detaching does the
//! reverse, top-down, and only for subjects whose reference count reaches
//! zero — a subject reachable through another surviving edge stays
//! attached." Cycles are tolerated on attach via a per-walk seen set: a
//! subject revisited within the same walk still gets its edge recorded, but
//! is not walked or fired a second time.
//!
//! Detach instead defers to [`crate::graph::registry::GraphRegistry::prune_unreachable`]
//! after removing the root edge: a plain refcount would never reach zero
//! for a cycle whose only remaining edges point at its own members, so
//! detach asks the registry which subjects, if any, lost their last path
//! back to a root — that set self-detaches together (`spec.md` §4.C: "a
//! cycle that loses all external references self-detaches").

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::graph::registry::Edge;
use crate::observability::Field;
use crate::property::{subject_id, Index, SubjectId};
use crate::subject::Subject;

/// Fired when a subject attaches to, or detaches from, a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Attached,
    Detached,
}

/// Implemented by application code that needs to react to subjects entering
/// or leaving a context — e.g. to start/stop a [`crate::lifecycle::hosted_service::HostedService`]
/// or seed a derived property's initial value.
pub trait LifecycleHandler: Send + Sync {
    fn handle(&self, context: &Context, subject: &Arc<dyn Subject>, event: LifecycleEvent) -> Result<()>;
}

fn children_of(subject: &Arc<dyn Subject>) -> Vec<(&'static str, Arc<dyn Subject>, Index)> {
    let core = subject.core();
    let mut out = Vec::new();
    for name in core.table().names() {
        if let Ok(value) = core.raw_read(name) {
            for (child, index) in crate::property::subjects_in(&value) {
                out.push((name, child, index));
            }
        }
    }
    out
}

fn fire(context: &Context, subject: &Arc<dyn Subject>, event: LifecycleEvent) {
    for handler in context.lifecycle_handlers() {
        if let Err(err) = handler.handle(context, subject, event) {
            // spec.md §7: a lifecycle failure is logged and otherwise
            // swallowed; the subject stays attached.
            context.logger().error(
                "lifecycle.handler_failed",
                &[
                    Field::new("subject", subject.type_name()),
                    Field::new("event", format!("{event:?}")),
                    Field::new("error", err.to_string()),
                ],
            );
        }
    }
}

pub(crate) fn attach_tree(context: &Context, root: Arc<dyn Subject>) -> Result<()> {
    let mut seen = HashSet::new();
    attach_walk(context, None, "", Index::None, root, &mut seen);
    Ok(())
}

fn attach_walk(
    context: &Context,
    parent: Option<SubjectId>,
    property: &'static str,
    index: Index,
    subject: Arc<dyn Subject>,
    seen: &mut HashSet<SubjectId>,
) {
    let id = subject_id(&subject);
    let first_visit_this_walk = seen.insert(id);
    let became_new = context.graph().add_edge(
        subject.clone(),
        Edge {
            parent,
            property,
            index,
        },
    );

    if first_visit_this_walk && became_new {
        for (child_property, child, child_index) in children_of(&subject) {
            attach_walk(context, Some(id), child_property, child_index, child, seen);
        }
        subject.core().attach(Arc::downgrade(&context.inner));
        fire(context, &subject, LifecycleEvent::Attached);
    }
}

pub(crate) fn detach_tree(context: &Context, root: Arc<dyn Subject>) -> Result<()> {
    let id = subject_id(&root);
    context.graph().remove_edge(id, None, "", &Index::None);
    for subject in context.graph().prune_unreachable() {
        fire(context, &subject, LifecycleEvent::Detached);
        subject.core().detach(&Arc::downgrade(&context.inner));
    }
    Ok(())
}
