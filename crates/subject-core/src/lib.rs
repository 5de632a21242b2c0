//! `subject-core`: a reactive subject graph with an interceptor pipeline.
//!
//! A *subject* is a dynamically typed bag of named properties
//! ([`property::PropertyValue`]) plus identity ([`property::SubjectId`]).
//! Subjects attach to one or more [`context::Context`]s, which supply the
//! interceptor pipeline ([`interceptor`]) every read, write and method call
//! runs through; a [`graph::GraphRegistry`] tracks reachability so attach
//! and detach can walk a whole tree, tolerating cycles; [`change`] tracks
//! derived-property dependencies and publishes [`change::ChangeRecord`]s;
//! [`source`] binds individual properties to an external system of record;
//! [`transaction`] pushes batches of writes out to those sources; and
//! [`runtime`] supplies the circuit breaker, backoff and liveness-monitor
//! plumbing a concrete connector builds on.
//!
//! Property tables are declared at construction time through
//! [`subject::SubjectCore::builder`] rather than generated from struct
//! fields — there is no source generator in this crate (see
//! `subject-macros` for the small amount of boilerplate it does save).

pub mod change;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod interceptor;
pub mod lifecycle;
pub mod observability;
pub mod prelude;
pub mod property;
pub mod source;
pub mod subject;
pub mod transaction;

pub mod runtime;

pub use crate::error::{Result, SubjectError};
pub use crate::subject::Subject;

/// Reads `name` off `subject` through its interceptor chain.
pub use crate::interceptor::pipeline::read;
/// Writes `value` to `name` on `subject` through its interceptor chain,
/// publishing a [`change::ChangeRecord`] on success.
pub use crate::interceptor::pipeline::write;
/// Invokes `name` as a method on `subject` through its interceptor chain.
pub use crate::interceptor::pipeline::invoke;
