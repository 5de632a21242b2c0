//! Property values, references and the per-subject property table.
//!
//! `spec.md` §3 defines `PropertyReference` as "the pair `(Subject,
//! propertyName)`... two references are equal iff subject identity and
//! name match." We use the data pointer of the subject's `Arc<dyn Subject>`
//! as identity (`subject_id`), matching §9's "arena-of-properties" design
//! note: every subject is a dynamically-typed bag of named cells rather
//! than a statically generated struct.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::subject::Subject;

/// Stable identity for a subject: the data address of its `Arc<dyn Subject>`.
pub type SubjectId = usize;

pub fn subject_id(subject: &Arc<dyn Subject>) -> SubjectId {
    Arc::as_ptr(subject) as *const () as usize
}

/// Index into a parent's value that produced a graph edge: positional for
/// ordered sequences, keyed for mappings, `None` for a scalar reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    None,
    Position(usize),
    Key(String),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::None => Ok(()),
            Index::Position(i) => write!(f, "[{i}]"),
            Index::Key(k) => write!(f, "[{k}]"),
        }
    }
}

/// A dynamically-typed property value. Scalars, an ordered sequence, and a
/// keyed mapping are the three shapes `spec.md` §4.C requires the graph
/// walker to understand ("scalar subject reference, ordered sequence of
/// subjects, or keyed mapping to subjects").
#[derive(Clone)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Subject(Arc<dyn Subject>),
    List(Vec<PropertyValue>),
    Map(Vec<(String, PropertyValue)>),
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "Null"),
            PropertyValue::Bool(b) => write!(f, "Bool({b})"),
            PropertyValue::Int(i) => write!(f, "Int({i})"),
            PropertyValue::Float(v) => write!(f, "Float({v})"),
            PropertyValue::Text(s) => write!(f, "Text({s:?})"),
            PropertyValue::Subject(s) => write!(f, "Subject(#{:x})", subject_id(s)),
            PropertyValue::List(items) => f.debug_list().entries(items.iter()).finish(),
            PropertyValue::Map(entries) => f.debug_map().entries(entries.iter().cloned()).finish(),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Null, PropertyValue::Null) => true,
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a == b,
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
            (PropertyValue::Subject(a), PropertyValue::Subject(b)) => Arc::ptr_eq(a, b),
            (PropertyValue::List(a), PropertyValue::List(b)) => a == b,
            (PropertyValue::Map(a), PropertyValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

/// Walks a value for subject references, used by the graph registry (§4.C
/// step 1: `subjects_in(v)`).
pub fn subjects_in(value: &PropertyValue) -> Vec<(Arc<dyn Subject>, Index)> {
    let mut out = Vec::new();
    collect(value, Index::None, &mut out);
    return out;

    fn collect(value: &PropertyValue, index: Index, out: &mut Vec<(Arc<dyn Subject>, Index)>) {
        match value {
            PropertyValue::Subject(s) => out.push((s.clone(), index)),
            PropertyValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    collect(item, Index::Position(i), out);
                }
            }
            PropertyValue::Map(entries) => {
                for (k, v) in entries {
                    collect(v, Index::Key(k.clone()), out);
                }
            }
            _ => {}
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}
impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_owned())
    }
}
impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}
impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}
impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}
impl<T: Subject + 'static> From<Arc<T>> for PropertyValue {
    fn from(value: Arc<T>) -> Self {
        PropertyValue::Subject(value as Arc<dyn Subject>)
    }
}
impl From<Option<Arc<dyn Subject>>> for PropertyValue {
    fn from(value: Option<Arc<dyn Subject>>) -> Self {
        match value {
            Some(s) => PropertyValue::Subject(s),
            None => PropertyValue::Null,
        }
    }
}

impl TryFrom<PropertyValue> for String {
    type Error = crate::error::SubjectError;
    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Text(s) => Ok(s),
            _ => Err(crate::error::SubjectError::type_mismatch("<value>", "String")),
        }
    }
}
impl TryFrom<PropertyValue> for i64 {
    type Error = crate::error::SubjectError;
    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Int(i) => Ok(i),
            _ => Err(crate::error::SubjectError::type_mismatch("<value>", "i64")),
        }
    }
}
impl TryFrom<PropertyValue> for f64 {
    type Error = crate::error::SubjectError;
    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Float(v) => Ok(v),
            PropertyValue::Int(i) => Ok(i as f64),
            _ => Err(crate::error::SubjectError::type_mismatch("<value>", "f64")),
        }
    }
}
impl TryFrom<PropertyValue> for bool {
    type Error = crate::error::SubjectError;
    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Bool(b) => Ok(b),
            _ => Err(crate::error::SubjectError::type_mismatch("<value>", "bool")),
        }
    }
}
impl TryFrom<PropertyValue> for Option<Arc<dyn Subject>> {
    type Error = crate::error::SubjectError;
    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Subject(s) => Ok(Some(s)),
            PropertyValue::Null => Ok(None),
            _ => Err(crate::error::SubjectError::type_mismatch("<value>", "Subject")),
        }
    }
}

/// `(Subject, propertyName)` — used as a hash key by the dependency tracker
/// and the change-publication path.
#[derive(Clone)]
pub struct PropertyReference {
    pub subject: Arc<dyn Subject>,
    pub name: &'static str,
}

impl PropertyReference {
    pub fn new(subject: Arc<dyn Subject>, name: &'static str) -> Self {
        Self { subject, name }
    }
}

impl PartialEq for PropertyReference {
    fn eq(&self, other: &Self) -> bool {
        subject_id(&self.subject) == subject_id(&other.subject) && self.name == other.name
    }
}
impl Eq for PropertyReference {}
impl Hash for PropertyReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        subject_id(&self.subject).hash(state);
        self.name.hash(state);
    }
}
impl fmt::Debug for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}.{}", self.subject.type_name(), subject_id(&self.subject), self.name)
    }
}

/// Descriptor for one named property: whether it is stored or derived.
/// "The property table is immutable after construction; only values
/// mutate" (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub is_derived: bool,
}

#[derive(Debug, Default)]
pub struct PropertyTable {
    descriptors: HashMap<&'static str, PropertyDescriptor>,
}

impl PropertyTable {
    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.descriptors.get(name).is_some_and(|d| d.is_derived)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }
}

#[derive(Default)]
pub struct PropertyTableBuilder {
    descriptors: HashMap<&'static str, PropertyDescriptor>,
}

impl PropertyTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(mut self, name: &'static str) -> Self {
        self.descriptors.insert(
            name,
            PropertyDescriptor {
                name,
                is_derived: false,
            },
        );
        self
    }

    pub fn derived(mut self, name: &'static str) -> Self {
        self.descriptors.insert(
            name,
            PropertyDescriptor {
                name,
                is_derived: true,
            },
        );
        self
    }

    pub fn build(self) -> Arc<PropertyTable> {
        Arc::new(PropertyTable {
            descriptors: self.descriptors,
        })
    }
}
