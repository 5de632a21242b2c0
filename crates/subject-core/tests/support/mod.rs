//! Shared fixtures for the integration tests: two minimal subject types and
//! a couple of interceptors useful for asserting call order.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use subject_core::error::Result;
use subject_core::interceptor::{InterceptContext, ReadInterceptor, WriteInterceptor};
use subject_core::property::PropertyValue;
use subject_core::source::{Source, SourceChange, WriteResult};
use subject_core::subject::{Subject, SubjectCore};
use subject_macros::Subject as DeriveSubject;

/// A leaf subject with a single stored `value`.
#[derive(DeriveSubject)]
pub struct Counter {
    #[subject(core)]
    core: SubjectCore,
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter").finish_non_exhaustive()
    }
}

impl Counter {
    pub fn new(initial: i64) -> Arc<Self> {
        Arc::new(Self {
            core: SubjectCore::builder("Counter").stored("value", initial).build(),
        })
    }
}

/// A subject that holds a `Counter` as a property and derives `doubled`
/// from that child's `value`, exercising cross-subject dependency discovery.
#[derive(DeriveSubject)]
pub struct Total {
    #[subject(core)]
    core: SubjectCore,
}

impl fmt::Debug for Total {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Total").finish_non_exhaustive()
    }
}

impl Total {
    pub fn new(counter: Arc<Counter>) -> Arc<Self> {
        Arc::new(Self {
            core: SubjectCore::builder("Total")
                .stored("counter", counter)
                .derived("doubled", |me| {
                    let counter_value = me.core().raw_read("counter")?;
                    let counter: Option<Arc<dyn Subject>> = counter_value.try_into()?;
                    match counter {
                        Some(counter) => {
                            let value = subject_core::read(&counter, "value")?;
                            let value: i64 = value.try_into()?;
                            Ok(PropertyValue::Int(value * 2))
                        }
                        None => Ok(PropertyValue::Int(0)),
                    }
                })
                .build(),
        })
    }
}

/// A subject with a mutable `peer` property, used to build reference cycles.
#[derive(DeriveSubject)]
pub struct Node {
    #[subject(core)]
    core: SubjectCore,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").finish_non_exhaustive()
    }
}

impl Node {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: SubjectCore::builder("Node").stored("peer", PropertyValue::Null).build(),
        })
    }
}

/// Appends `label` to a shared log every time it runs, then calls `next`.
pub struct OrderingReadInterceptor {
    pub label: &'static str,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl ReadInterceptor for OrderingReadInterceptor {
    fn around(
        &self,
        _ctx: &InterceptContext,
        next: &mut dyn FnMut() -> Result<PropertyValue>,
    ) -> Result<PropertyValue> {
        self.log.lock().unwrap().push(self.label);
        next()
    }
}

pub struct OrderingWriteInterceptor {
    pub label: &'static str,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl WriteInterceptor for OrderingWriteInterceptor {
    fn around(
        &self,
        _ctx: &InterceptContext,
        value: PropertyValue,
        next: &mut dyn FnMut(PropertyValue) -> Result<()>,
    ) -> Result<()> {
        self.log.lock().unwrap().push(self.label);
        next(value)
    }
}

/// Never calls `next`, vetoing every write it sees.
pub struct VetoingWriteInterceptor;

impl WriteInterceptor for VetoingWriteInterceptor {
    fn around(
        &self,
        _ctx: &InterceptContext,
        _value: PropertyValue,
        _next: &mut dyn FnMut(PropertyValue) -> Result<()>,
    ) -> Result<()> {
        Err(subject_core::error::SubjectError::validation_failure(
            "value",
            "rejected by test policy",
        ))
    }
}

/// Doubles an incoming integer write before passing it on.
pub struct DoublingWriteInterceptor;

impl WriteInterceptor for DoublingWriteInterceptor {
    fn around(
        &self,
        _ctx: &InterceptContext,
        value: PropertyValue,
        next: &mut dyn FnMut(PropertyValue) -> Result<()>,
    ) -> Result<()> {
        let doubled = match value {
            PropertyValue::Int(i) => PropertyValue::Int(i * 2),
            other => other,
        };
        next(doubled)
    }
}

/// Upcasts a concrete subject handle to `Arc<dyn Subject>` at a clean
/// coercion site, since `&Arc<Concrete>` doesn't coerce to `&Arc<dyn
/// Subject>` through an extra reference layer.
pub fn as_dyn<T: Subject + 'static>(subject: &Arc<T>) -> Arc<dyn Subject> {
    subject.clone()
}

/// A fake external source recording every write it receives, optionally
/// rejecting specific properties outright.
pub struct RecordingSource {
    pub name: String,
    pub calls: Mutex<Vec<(&'static str, PropertyValue)>>,
    pub rejected: Mutex<HashSet<&'static str>>,
    pub batch_size: Option<usize>,
}

impl RecordingSource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            batch_size: None,
        })
    }

    pub fn with_batch_size(name: &str, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            batch_size: Some(batch_size),
        })
    }

    /// Every subsequent write to `property` is rejected instead of applied.
    pub fn reject(&self, property: &'static str) {
        self.rejected.lock().unwrap().insert(property);
    }

    pub fn written_values(&self) -> Vec<PropertyValue> {
        self.calls.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Source for RecordingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_changes(&self, batch: &[SourceChange]) -> WriteResult {
        let mut result = WriteResult::default();
        let rejected = self.rejected.lock().unwrap();
        for change in batch {
            if rejected.contains(change.property.name) {
                result.failed.push((
                    change.property.clone(),
                    subject_core::error::SubjectError::validation_failure(
                        change.property.name,
                        "rejected by test source",
                    ),
                ));
                continue;
            }
            self.calls
                .lock()
                .unwrap()
                .push((change.property.name, change.new_value.clone()));
            result.successful.push(change.property.clone());
        }
        result
    }

    fn write_batch_size(&self) -> Option<usize> {
        self.batch_size
    }
}
