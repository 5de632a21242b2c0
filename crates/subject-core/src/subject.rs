//! The `Subject` trait and its common backing storage, `SubjectCore`.
//!
//! `spec.md` §3 describes a subject as "an identity plus a property table
//! plus a bag of arbitrary values"; §9 design note (b) resolves the "how are
//! properties represented without a source generator" question in favor of
//! an arena: every subject stores its property cells in a map rather than as
//! typed struct fields, and strongly-typed accessors are a thin layer over
//! `read`/`write`. `subject-macros::Subject` derives only the `Subject` impl
//! boilerplate for a struct that embeds a `SubjectCore` field; callers
//! declare the property table and any derived computations explicitly at
//! construction time via [`SubjectCore::builder`].

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::{ReentrantMutex, RwLock};

use crate::clock::Timestamp;
use crate::context::ContextInner;
use crate::error::{Result, SubjectError};
use crate::interceptor::{MethodInterceptor, ReadInterceptor, WriteInterceptor};
use crate::property::{PropertyReference, PropertyTable, PropertyTableBuilder, PropertyValue};

/// Implemented by every generated or hand-written subject type. Object-safe
/// so subjects are stored and passed as `Arc<dyn Subject>` throughout the
/// graph.
pub trait Subject: Send + Sync + fmt::Debug {
    fn core(&self) -> &SubjectCore;

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str {
        self.core().type_name()
    }
}

#[derive(Clone)]
struct PropertyCell {
    value: PropertyValue,
    last_write: Option<Timestamp>,
}

type DerivedFn = Arc<dyn Fn(&dyn Subject) -> Result<PropertyValue> + Send + Sync>;

/// The effective interceptor chains for one subject, precomputed by
/// concatenating every attached context's lists in attachment order
/// (`spec.md` §4.B). Cached on [`SubjectCore`] behind an `ArcSwapOption` so
/// repeated reads/writes/method calls don't rebuild it; invalidated by
/// bumping [`SubjectCore`]'s attach generation counter whenever the
/// attachment set changes.
pub(crate) struct ChainCache {
    generation: u64,
    pub(crate) reads: Vec<Arc<dyn ReadInterceptor>>,
    pub(crate) writes: Vec<Arc<dyn WriteInterceptor>>,
    pub(crate) methods: Vec<Arc<dyn MethodInterceptor>>,
}

/// Per-(subject, property) arbitrary side channel. `spec.md` §4.E stores the
/// dependency tracker's `required`/`used_by` sets here, keyed by a
/// module-private string so application code and the dependency tracker
/// don't collide.
#[derive(Default)]
pub struct SideData {
    entries: RwLock<HashMap<(&'static str, &'static str), Arc<dyn Any + Send + Sync>>>,
}

impl SideData {
    pub fn get<T: Send + Sync + 'static>(&self, scope: &'static str, key: &'static str) -> Option<Arc<T>> {
        self.entries
            .read()
            .get(&(scope, key))
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn set<T: Send + Sync + 'static>(&self, scope: &'static str, key: &'static str, value: T) {
        self.entries.write().insert((scope, key), Arc::new(value));
    }

    pub fn remove(&self, scope: &'static str, key: &'static str) {
        self.entries.write().remove(&(scope, key));
    }
}

/// Common state every subject shares: a property table, the values
/// themselves guarded by a reentrant per-subject lock, side data, and the
/// set of contexts the subject is currently attached to.
pub struct SubjectCore {
    type_name: &'static str,
    table: Arc<PropertyTable>,
    derived_fns: HashMap<&'static str, DerivedFn>,
    // ReentrantMutex<RefCell<_>> lets a write interceptor re-enter the same
    // subject's terminal write on the same thread (spec.md §5: "re-entrant
    // on the same thread; a write interceptor may itself write a different
    // property of the same subject from within `next`").
    storage: ReentrantMutex<RefCell<HashMap<&'static str, PropertyCell>>>,
    side_data: SideData,
    attachments: RwLock<Vec<Weak<ContextInner>>>,
    attach_generation: AtomicU64,
    chain_cache: ArcSwapOption<ChainCache>,
}

impl fmt::Debug for SubjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectCore").field("type_name", &self.type_name).finish()
    }
}

impl SubjectCore {
    pub fn builder(type_name: &'static str) -> SubjectCoreBuilder {
        SubjectCoreBuilder {
            type_name,
            table: PropertyTableBuilder::new(),
            initial: HashMap::new(),
            derived_fns: HashMap::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &Arc<PropertyTable> {
        &self.table
    }

    pub fn side_data(&self) -> &SideData {
        &self.side_data
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.table.is_derived(name)
    }

    pub fn derived_fn(&self, name: &str) -> Option<DerivedFn> {
        self.derived_fns.get(name).cloned()
    }

    /// Reads the current stored value without going through interceptors.
    /// Used as the terminal action of the read pipeline.
    pub fn raw_read(&self, name: &str) -> Result<PropertyValue> {
        if !self.table.contains(name) {
            return Err(SubjectError::unknown_property(name));
        }
        let guard = self.storage.lock();
        let cell = guard.borrow();
        Ok(cell
            .get(name)
            .map(|c| c.value.clone())
            .unwrap_or(PropertyValue::Null))
    }

    /// Writes the value and stamps the write time. Used as the terminal
    /// action of the write pipeline; also used by derived-property
    /// recomputation and by `Source::set_value_from_source`.
    pub fn raw_write(&self, name: &str, value: PropertyValue, stamp: Timestamp) -> Result<()> {
        if !self.table.contains(name) {
            return Err(SubjectError::unknown_property(name));
        }
        let guard = self.storage.lock();
        let mut cell = guard.borrow_mut();
        cell.insert(
            name,
            PropertyCell {
                value,
                last_write: Some(stamp),
            },
        );
        Ok(())
    }

    pub fn last_write(&self, name: &str) -> Option<Timestamp> {
        let guard = self.storage.lock();
        guard.borrow().get(name).and_then(|c| c.last_write)
    }

    pub fn attach(&self, context: Weak<ContextInner>) {
        self.attachments.write().push(context);
        self.attach_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn detach(&self, context: &Weak<ContextInner>) {
        self.attachments
            .write()
            .retain(|c| !std::ptr::eq(c.as_ptr(), context.as_ptr()));
        self.attach_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Attached contexts in attachment order, pruned of any that have since
    /// been dropped. A context disappearing without an explicit `detach`
    /// (its last strong reference simply dropped) still invalidates the
    /// cached interceptor chain, since the attachment set changed either way.
    pub fn attached_contexts(&self) -> Vec<Arc<ContextInner>> {
        let mut guard = self.attachments.write();
        let before = guard.len();
        guard.retain(|c| c.strong_count() > 0);
        if guard.len() != before {
            self.attach_generation.fetch_add(1, Ordering::AcqRel);
        }
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn is_attached(&self) -> bool {
        self.attachments.read().iter().any(|c| c.strong_count() > 0)
    }

    /// Returns the cached interceptor chains, if one was built since the
    /// last time the attachment set changed.
    pub(crate) fn cached_chain(&self) -> Option<Arc<ChainCache>> {
        let cache = self.chain_cache.load_full()?;
        (cache.generation == self.attach_generation.load(Ordering::Acquire)).then_some(cache)
    }

    /// Builds and caches the interceptor chains for the current attachment
    /// generation.
    pub(crate) fn store_chain(
        &self,
        reads: Vec<Arc<dyn ReadInterceptor>>,
        writes: Vec<Arc<dyn WriteInterceptor>>,
        methods: Vec<Arc<dyn MethodInterceptor>>,
    ) -> Arc<ChainCache> {
        let cache = Arc::new(ChainCache {
            generation: self.attach_generation.load(Ordering::Acquire),
            reads,
            writes,
            methods,
        });
        self.chain_cache.store(Some(cache.clone()));
        cache
    }
}

pub struct SubjectCoreBuilder {
    type_name: &'static str,
    table: PropertyTableBuilder,
    initial: HashMap<&'static str, PropertyValue>,
    derived_fns: HashMap<&'static str, DerivedFn>,
}

impl SubjectCoreBuilder {
    pub fn stored(mut self, name: &'static str, initial: impl Into<PropertyValue>) -> Self {
        self.table = self.table.stored(name);
        self.initial.insert(name, initial.into());
        self
    }

    pub fn derived<F>(mut self, name: &'static str, compute: F) -> Self
    where
        F: Fn(&dyn Subject) -> Result<PropertyValue> + Send + Sync + 'static,
    {
        self.table = self.table.derived(name);
        self.derived_fns.insert(name, Arc::new(compute));
        self
    }

    pub fn build(self) -> SubjectCore {
        let table = self.table.build();
        let mut cells = HashMap::new();
        for (name, value) in self.initial {
            cells.insert(
                name,
                PropertyCell {
                    value,
                    last_write: None,
                },
            );
        }
        SubjectCore {
            type_name: self.type_name,
            table,
            derived_fns: self.derived_fns,
            storage: ReentrantMutex::new(RefCell::new(cells)),
            side_data: SideData::default(),
            attachments: RwLock::new(Vec::new()),
            attach_generation: AtomicU64::new(0),
            chain_cache: ArcSwapOption::from(None),
        }
    }
}

/// Convenience: build a [`PropertyReference`] for `subject.name`.
pub fn property_ref(subject: &Arc<dyn Subject>, name: &'static str) -> PropertyReference {
    PropertyReference::new(subject.clone(), name)
}
