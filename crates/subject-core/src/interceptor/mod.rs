//! The interceptor pipeline: `around(ctx, next)` middleware for property
//! reads, writes and method calls.
//!
//! Grounded on `Plawn-r2e`'s `r2e-core::interceptors` chain-of-continuations
//! shape, adapted to be synchronous: `spec.md` §5 states "interceptors,
//! graph registry, change tracking, and derived-property recomputation are
//! synchronous; the only suspension points are inside source I/O," so unlike
//! the teacher's `async fn around`, these traits take a plain `&mut dyn
//! FnMut` continuation with no `.await`.

pub mod pipeline;

use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::property::PropertyValue;
use crate::subject::Subject;

/// Context visible to an interceptor: which subject, which property or
/// method, and the context it's running under.
pub struct InterceptContext<'a> {
    pub subject: &'a Arc<dyn Subject>,
    pub name: &'static str,
    pub context: &'a Context,
}

/// Intercepts a property read. `next` produces the value that would be
/// returned by the rest of the chain (eventually the stored value, or a
/// derived-property recomputation).
pub trait ReadInterceptor: Send + Sync {
    fn around(
        &self,
        ctx: &InterceptContext,
        next: &mut dyn FnMut() -> Result<PropertyValue>,
    ) -> Result<PropertyValue>;
}

/// Intercepts a property write. An interceptor may replace `value` before
/// calling `next`; if it never calls `next`, the write is vetoed and the
/// terminal write never happens (`spec.md` §4.B, "veto: simply don't call
/// `next`").
pub trait WriteInterceptor: Send + Sync {
    fn around(
        &self,
        ctx: &InterceptContext,
        value: PropertyValue,
        next: &mut dyn FnMut(PropertyValue) -> Result<()>,
    ) -> Result<()>;
}

/// Intercepts a method invocation.
pub trait MethodInterceptor: Send + Sync {
    fn around(
        &self,
        ctx: &InterceptContext,
        args: Vec<PropertyValue>,
        next: &mut dyn FnMut(Vec<PropertyValue>) -> Result<PropertyValue>,
    ) -> Result<PropertyValue>;
}
