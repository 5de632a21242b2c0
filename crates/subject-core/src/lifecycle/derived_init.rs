//! Seeds every derived property with an initial computed value as soon as
//! its subject attaches, so a read before any dependency changes returns a
//! real value instead of whatever placeholder the builder supplied.

use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::interceptor::pipeline;
use crate::lifecycle::dispatch::{LifecycleEvent, LifecycleHandler};
use crate::observability::Field;
use crate::subject::Subject;

#[derive(Debug, Default)]
pub struct DerivedPropertyInitializer;

impl LifecycleHandler for DerivedPropertyInitializer {
    fn handle(&self, context: &Context, subject: &Arc<dyn Subject>, event: LifecycleEvent) -> Result<()> {
        if event != LifecycleEvent::Attached {
            return Ok(());
        }
        let names: Vec<_> = subject
            .core()
            .table()
            .names()
            .filter(|n| subject.core().is_derived(n))
            .collect();
        for name in names {
            if let Err(err) = pipeline::recompute_derived(subject, name) {
                context.logger().warn(
                    "derived.initial_compute_failed",
                    &[Field::new("property", name), Field::new("error", err.to_string())],
                );
            }
        }
        Ok(())
    }
}
