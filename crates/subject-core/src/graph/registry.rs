//! Ref-counted graph registry.
//!
//! `spec.md` §4.C: a context tracks, for every subject reachable from an
//! attached root, a reference count (how many parent edges currently point
//! to it), the multiset of parent edges themselves, and the set of
//! dot-separated paths by which it's reachable from some root. Cycles are
//! tolerated: a walk that revisits a subject it has already seen this pass
//! stops recursing but still records the edge.
//!
//! A pure refcount is not enough to collect a cycle: each member of an
//! isolated cycle still has at least one incoming edge from another member,
//! so its count never reaches zero even after every external reference is
//! gone. [`GraphRegistry::prune_unreachable`] is the fix — it recomputes
//! reachability from the roots after an edge removal and tears down
//! anything, cyclic or not, that can no longer get back to one.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::property::{subject_id, Index, SubjectId};
use crate::subject::Subject;

#[derive(Clone)]
pub struct Edge {
    pub parent: Option<SubjectId>,
    pub property: &'static str,
    pub index: Index,
}

struct Entry {
    subject: Arc<dyn Subject>,
    refcount: usize,
    parents: Vec<Edge>,
}

/// Per-context bookkeeping of every subject currently reachable from an
/// attached root.
pub struct GraphRegistry {
    entries: DashMap<SubjectId, Entry>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn is_attached(&self, id: SubjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn refcount(&self, id: SubjectId) -> usize {
        self.entries.get(&id).map(|e| e.refcount).unwrap_or(0)
    }

    /// Records one more parent edge into `child`. Returns `true` if this is
    /// the child's first edge in this registry (i.e. it just became
    /// attached and its own subtree should be walked and its attach
    /// handlers fired).
    pub fn add_edge(&self, child: Arc<dyn Subject>, edge: Edge) -> bool {
        let id = subject_id(&child);
        let mut became_new = false;
        self.entries
            .entry(id)
            .and_modify(|e| {
                e.refcount += 1;
                e.parents.push(edge.clone());
            })
            .or_insert_with(|| {
                became_new = true;
                Entry {
                    subject: child,
                    refcount: 1,
                    parents: vec![edge],
                }
            });
        became_new
    }

    /// Removes one parent edge from `child` and decrements its refcount.
    /// Does *not* decide by itself whether `child` is still attached — a
    /// cycle can keep a subject's refcount above zero after every external
    /// edge is gone, so the real answer comes from [`Self::prune_unreachable`],
    /// which callers must run after every `remove_edge`.
    pub fn remove_edge(&self, child_id: SubjectId, parent: Option<SubjectId>, property: &'static str, index: &Index) {
        if let Some(mut entry) = self.entries.get_mut(&child_id) {
            if let Some(pos) = entry
                .parents
                .iter()
                .position(|e| e.parent == parent && e.property == property && &e.index == index)
            {
                entry.parents.remove(pos);
            }
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    /// Removes and returns every currently-registered subject that can no
    /// longer reach a root (a subject attached with no parent, recorded as
    /// an edge whose `parent` is `None`). This catches both an ordinary
    /// subtree whose last edge was just removed *and* an isolated cycle
    /// whose members still point at each other but no longer at anything
    /// alive outside the cycle.
    ///
    /// The returned order fires a subject only after every other pruned
    /// subject that is its recorded parent has already been returned, so a
    /// caller that fires detach handlers in this order still sees the usual
    /// top-down behavior for an ordinary tree. A closed cycle has no such
    /// order — its members are appended last, by id, purely for
    /// determinism.
    pub fn prune_unreachable(&self) -> Vec<Arc<dyn Subject>> {
        let dead: HashSet<SubjectId> = self
            .entries
            .iter()
            .map(|e| *e.key())
            .filter(|id| self.paths(*id).is_empty())
            .collect();

        let mut remaining = dead.clone();
        let mut order = Vec::with_capacity(dead.len());
        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .copied()
                .find(|id| {
                    self.entries
                        .get(id)
                        .map(|entry| {
                            entry
                                .parents
                                .iter()
                                .all(|edge| match edge.parent {
                                    Some(p) => !remaining.contains(&p),
                                    None => true,
                                })
                        })
                        .unwrap_or(true)
                })
                .unwrap_or_else(|| *remaining.iter().min().expect("remaining is non-empty"));
            remaining.remove(&ready);
            order.push(ready);
        }

        order
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|(_, entry)| entry.subject))
            .collect()
    }

    /// All dot-separated paths by which `id` is currently reachable from a
    /// root (a subject attached with no parent). Empty means `id` has no
    /// way back to a root right now — either it was never attached, or
    /// every path from it loops back on itself without ever reaching one.
    pub fn paths(&self, id: SubjectId) -> Vec<String> {
        let mut out = Vec::new();
        let mut visiting = HashSet::new();
        self.collect_paths(id, String::new(), &mut out, &mut visiting);
        out
    }

    fn collect_paths(&self, id: SubjectId, suffix: String, out: &mut Vec<String>, visiting: &mut HashSet<SubjectId>) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if !visiting.insert(id) {
            return;
        }
        for edge in &entry.parents {
            let segment = format!("{}{}", edge.property, edge.index);
            let full = if suffix.is_empty() {
                segment
            } else {
                format!("{segment}.{suffix}")
            };
            match edge.parent {
                Some(parent_id) => self.collect_paths(parent_id, full, out, visiting),
                None => out.push(full),
            }
        }
        visiting.remove(&id);
    }

    pub fn attached_subjects(&self) -> Vec<Arc<dyn Subject>> {
        self.entries.iter().map(|e| e.subject.clone()).collect()
    }
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}
