//! Source binding: external systems of record for properties.

pub mod binding;

pub use binding::{set_value_from_source, source_id, Source, SourceChange, SourceId, SourceRegistry, WriteResult};
