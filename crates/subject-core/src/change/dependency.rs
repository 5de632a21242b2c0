//! Dependency discovery for derived properties.
//!
//! `spec.md` §4.E: "while a derived property's compute function runs, every
//! ordinary property read it performs is recorded against a thread-local
//! stack; the resulting set becomes that property's `required` set, and each
//! dependency gains the derived property in its own `used_by` set." Both
//! sets live in the side data of the respective properties.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::property::PropertyReference;

const SCOPE: &str = "dependency";
const REQUIRED_KEY: &str = "required";
const USED_BY_KEY: &str = "used_by";

thread_local! {
    static RECORDER_STACK: RefCell<Vec<HashSet<PropertyReference>>> = RefCell::new(Vec::new());
}

/// Pushes a fresh recording frame; every `record_read` call until the
/// matching `pop` lands in it.
pub(crate) fn push_frame() {
    RECORDER_STACK.with(|stack| stack.borrow_mut().push(HashSet::new()));
}

/// Pops the current frame and returns everything it recorded.
pub(crate) fn pop_frame() -> HashSet<PropertyReference> {
    RECORDER_STACK.with(|stack| stack.borrow_mut().pop().unwrap_or_default())
}

/// Called from the read pipeline's terminal action for every ordinary
/// property read, so an active recorder (if any) observes it.
pub(crate) fn record_read(reference: &PropertyReference) {
    RECORDER_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.insert(reference.clone());
        }
    });
}

/// Replaces `derived`'s required set, updating the `used_by` side data of
/// every old and new dependency accordingly.
pub fn update_dependencies(derived: &PropertyReference, new_required: HashSet<PropertyReference>) {
    let old_required: HashSet<PropertyReference> = derived
        .subject
        .core()
        .side_data()
        .get::<HashSet<PropertyReference>>(SCOPE, REQUIRED_KEY)
        .map(|s| (*s).clone())
        .unwrap_or_default();

    for stale in old_required.difference(&new_required) {
        remove_used_by(stale, derived);
    }
    for fresh in new_required.difference(&old_required) {
        add_used_by(fresh, derived);
    }

    derived
        .subject
        .core()
        .side_data()
        .set(SCOPE, REQUIRED_KEY, new_required);
}

fn add_used_by(dependency: &PropertyReference, derived: &PropertyReference) {
    let mut set = dependency
        .subject
        .core()
        .side_data()
        .get::<HashSet<PropertyReference>>(SCOPE, USED_BY_KEY)
        .map(|s| (*s).clone())
        .unwrap_or_default();
    set.insert(derived.clone());
    dependency.subject.core().side_data().set(SCOPE, USED_BY_KEY, set);
}

fn remove_used_by(dependency: &PropertyReference, derived: &PropertyReference) {
    if let Some(set) = dependency
        .subject
        .core()
        .side_data()
        .get::<HashSet<PropertyReference>>(SCOPE, USED_BY_KEY)
    {
        let mut set = (*set).clone();
        set.remove(derived);
        dependency.subject.core().side_data().set(SCOPE, USED_BY_KEY, set);
    }
}

/// Properties currently depending on `dependency` (i.e. derived properties
/// whose compute function reads it). Used to know what to recompute or
/// re-publish when `dependency` changes.
pub fn used_by(dependency: &PropertyReference) -> HashSet<PropertyReference> {
    dependency
        .subject
        .core()
        .side_data()
        .get::<HashSet<PropertyReference>>(SCOPE, USED_BY_KEY)
        .map(|s| (*s).clone())
        .unwrap_or_default()
}

pub fn required(derived: &PropertyReference) -> HashSet<PropertyReference> {
    derived
        .subject
        .core()
        .side_data()
        .get::<HashSet<PropertyReference>>(SCOPE, REQUIRED_KEY)
        .map(|s| (*s).clone())
        .unwrap_or_default()
}
