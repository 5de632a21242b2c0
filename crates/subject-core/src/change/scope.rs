//! Thread-local `change_context`, installed for the duration of a
//! source-originated write.
//!
//! `spec.md` §4.F step 1: `SetValueFromSource` "installs `source` and the
//! two timestamps into a thread-local `change_context` for the duration of
//! the write." Recomputation triggered from inside that write — derived
//! properties and their dependents — reads the active frame so it stamps
//! the source's `changed_at_utc` instead of the wall clock, without
//! inheriting `source` itself: a cascaded recompute is still a local
//! decision the engine made, not a value the source supplied directly.

use std::cell::RefCell;

use crate::clock::Timestamp;
use crate::source::SourceId;

#[derive(Clone, Copy)]
pub(crate) struct ActiveChange {
    pub source: SourceId,
    pub changed_at_utc: Timestamp,
    pub received_at_utc: Timestamp,
}

thread_local! {
    static STACK: RefCell<Vec<ActiveChange>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed by [`enter`] when dropped, including on an early
/// return via `?` out of the scope it guards.
pub(crate) struct Scope;

impl Drop for Scope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pub(crate) fn enter(change: ActiveChange) -> Scope {
    STACK.with(|stack| stack.borrow_mut().push(change));
    Scope
}

/// The innermost active source-write frame on this thread, if any.
pub(crate) fn active() -> Option<ActiveChange> {
    STACK.with(|stack| stack.borrow().last().copied())
}
