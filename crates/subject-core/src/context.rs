//! `Context`: the host-provided container a subject attaches to.
//!
//! `spec.md` §3 ties a context to three things a subject needs but can't
//! own itself: the interceptor list, a typed service bag, and the set of
//! lifecycle handlers invoked on attach/detach. §4.D adds "registrations
//! performed after the first subject attaches produce a warning, since the
//! pipeline may already be cached for attached subjects" — tracked here via
//! `first_attach`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::change::stream::ChangeStream;
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::graph::registry::GraphRegistry;
use crate::interceptor::{MethodInterceptor, ReadInterceptor, WriteInterceptor};
use crate::lifecycle::dispatch::LifecycleHandler;
use crate::observability::{Field, Logger, TracingLogger};
use crate::property::PropertyReference;
use crate::source::{Source, SourceRegistry};
use crate::subject::Subject;

#[derive(Default)]
pub(crate) struct InterceptorList {
    pub reads: Vec<Arc<dyn ReadInterceptor>>,
    pub writes: Vec<Arc<dyn WriteInterceptor>>,
    pub methods: Vec<Arc<dyn MethodInterceptor>>,
}

pub struct ContextInner {
    pub(crate) interceptors: RwLock<InterceptorList>,
    pub(crate) services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    pub(crate) lifecycle_handlers: RwLock<Vec<Arc<dyn LifecycleHandler>>>,
    pub(crate) graph: GraphRegistry,
    pub(crate) change_stream: ChangeStream,
    pub(crate) sources: SourceRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) config: RuntimeConfig,
    first_attach: AtomicBool,
}

/// A reactive container. Subjects attach to one or more contexts; a
/// context's interceptors, services and lifecycle handlers are visible to
/// every subject attached to it.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_clock_and_logger(
            config,
            Arc::new(SystemClock),
            Arc::new(TracingLogger),
        )?)
    }

    pub fn with_clock_and_logger(config: RuntimeConfig, clock: Arc<dyn Clock>, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ContextInner {
                interceptors: RwLock::new(InterceptorList::default()),
                services: RwLock::new(HashMap::new()),
                lifecycle_handlers: RwLock::new(Vec::new()),
                graph: GraphRegistry::new(),
                change_stream: ChangeStream::new(),
                sources: SourceRegistry::new(),
                clock,
                logger,
                config,
                first_attach: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.inner.logger
    }

    pub fn change_stream(&self) -> &ChangeStream {
        &self.inner.change_stream
    }

    pub fn graph(&self) -> &GraphRegistry {
        &self.inner.graph
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.inner.sources
    }

    pub fn bind_source(&self, property: &PropertyReference, source: Arc<dyn Source>) {
        self.inner.sources.bind(self, property, source);
    }

    fn warn_if_attached(&self, what: &str) {
        if self.inner.first_attach.load(Ordering::Acquire) {
            self.inner.logger.warn(
                "context.late_registration",
                &[Field::new("kind", what)],
            );
        }
    }

    pub fn add_read_interceptor(&self, interceptor: Arc<dyn ReadInterceptor>) {
        self.warn_if_attached("read_interceptor");
        self.inner.interceptors.write().reads.push(interceptor);
    }

    pub fn add_write_interceptor(&self, interceptor: Arc<dyn WriteInterceptor>) {
        self.warn_if_attached("write_interceptor");
        self.inner.interceptors.write().writes.push(interceptor);
    }

    pub fn add_method_interceptor(&self, interceptor: Arc<dyn MethodInterceptor>) {
        self.warn_if_attached("method_interceptor");
        self.inner.interceptors.write().methods.push(interceptor);
    }

    pub fn add_lifecycle_handler(&self, handler: Arc<dyn LifecycleHandler>) {
        self.warn_if_attached("lifecycle_handler");
        self.inner.lifecycle_handlers.write().push(handler);
    }

    pub fn register_service<T: Send + Sync + 'static>(&self, service: T) {
        self.warn_if_attached("service");
        self.inner
            .services
            .write()
            .insert(TypeId::of::<T>(), Arc::new(service));
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .services
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|s| s.clone().downcast::<T>().ok())
    }

    pub(crate) fn read_interceptors(&self) -> Vec<Arc<dyn ReadInterceptor>> {
        self.inner.interceptors.read().reads.clone()
    }

    pub(crate) fn write_interceptors(&self) -> Vec<Arc<dyn WriteInterceptor>> {
        self.inner.interceptors.read().writes.clone()
    }

    pub(crate) fn method_interceptors(&self) -> Vec<Arc<dyn MethodInterceptor>> {
        self.inner.interceptors.read().methods.clone()
    }

    pub(crate) fn lifecycle_handlers(&self) -> Vec<Arc<dyn LifecycleHandler>> {
        self.inner.lifecycle_handlers.read().clone()
    }

    /// Attaches `subject` to this context: registers it with the graph
    /// registry and runs lifecycle handlers. `spec.md` §4.D: "attaching the
    /// root of a previously-unattached tree walks the whole tree and fires
    /// attach handlers bottom-up... detaching does the reverse, top-down,
    /// and only for subjects whose reference count reaches zero."
    pub fn attach(&self, subject: Arc<dyn Subject>) -> Result<()> {
        self.inner.first_attach.store(true, Ordering::Release);
        crate::lifecycle::dispatch::attach_tree(self, subject)
    }

    pub fn detach(&self, subject: Arc<dyn Subject>) -> Result<()> {
        crate::lifecycle::dispatch::detach_tree(self, subject)
    }
}
