//! Structured logging facade consumed throughout the engine.
//!
//! `spec.md` §6 lists `Logger` as a capability the core *consumes* rather
//! than implements: `info|warn|error(evt, fields…)`. The default
//! implementation forwards to `tracing`, matching the convention used across
//! the retrieval pack (`Plawn-r2e`, `MystenLabs-sui`) rather than rolling a
//! bespoke logging backend.

use std::fmt;

/// A single structured field attached to a log event.
#[derive(Debug, Clone)]
pub struct Field {
    pub key: &'static str,
    pub value: String,
}

impl Field {
    pub fn new(key: &'static str, value: impl fmt::Display) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Build a field list inline: `fields!["property" => name, "source" => id]`.
#[macro_export]
macro_rules! fields {
    ($($key:literal => $value:expr),* $(,)?) => {
        vec![$($crate::observability::Field::new($key, $value)),*]
    };
}

/// Structured logging sink. Object-safe so it can be shared as
/// `Arc<dyn Logger>` across contexts and connectors.
pub trait Logger: Send + Sync {
    fn info(&self, event: &str, fields: &[Field]);
    fn warn(&self, event: &str, fields: &[Field]);
    fn error(&self, event: &str, fields: &[Field]);
}

/// Forwards every event to the `tracing` subscriber installed by the host
/// application. This is the default used by [`crate::context::Context`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, event: &str, fields: &[Field]) {
        tracing::info!(event, fields = ?format_fields(fields));
    }

    fn warn(&self, event: &str, fields: &[Field]) {
        tracing::warn!(event, fields = ?format_fields(fields));
    }

    fn error(&self, event: &str, fields: &[Field]) {
        tracing::error!(event, fields = ?format_fields(fields));
    }
}

fn format_fields(fields: &[Field]) -> Vec<(&'static str, String)> {
    fields.iter().map(|f| (f.key, f.value.clone())).collect()
}

/// Discards every event. Useful for benchmarks and tests that don't install
/// a subscriber and don't want the `tracing` no-subscriber warning noise.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _event: &str, _fields: &[Field]) {}
    fn warn(&self, _event: &str, _fields: &[Field]) {}
    fn error(&self, _event: &str, _fields: &[Field]) {}
}
