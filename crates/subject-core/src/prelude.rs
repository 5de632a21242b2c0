//! Convenience re-exports for consumers, following the grouping convention
//! used by `spark-core::prelude` and `r2e-core`'s top-level re-exports.

pub use crate::change::{ChangeOrigin, ChangeRecord, ChangeStream, QueueSubscription};
pub use crate::clock::{Clock, MockClock, SystemClock, Timestamp};
pub use crate::config::RuntimeConfig;
pub use crate::context::Context;
pub use crate::error::{ErrorCategory, Result, SubjectError};
pub use crate::interceptor::{InterceptContext, MethodInterceptor, ReadInterceptor, WriteInterceptor};
pub use crate::lifecycle::{HostedService, LifecycleEvent, LifecycleHandler};
pub use crate::observability::{Field, Logger, NoopLogger, TracingLogger};
pub use crate::property::{subject_id, Index, PropertyReference, PropertyValue, SubjectId};
pub use crate::source::{set_value_from_source, source_id, Source, SourceChange, SourceId, SourceRegistry, WriteResult};
pub use crate::subject::{SubjectCore, SubjectCoreBuilder};
pub use crate::transaction::{Transaction, TransactionMode, TransactionOutcome};
pub use crate::Subject;

pub use subject_macros::Subject as DeriveSubject;
