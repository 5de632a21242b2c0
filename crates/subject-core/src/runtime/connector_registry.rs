//! Ref-counted registry mapping a connector's external identifiers to local
//! payloads (typically subjects), plus a short-lived tombstone so a
//! just-deleted entity reappearing moments later (e.g. a reconnect replaying
//! a backlog) can be told apart from one that's merely new.
//!
//! `spec.md` §5: "the connector layer keeps its own registry, reference
//! counted like the graph registry but keyed by the external system's
//! identifiers rather than subject identity, with a short
//! `was_recently_deleted` memory so a delete immediately followed by a
//! re-create isn't treated as a fresh entity."

use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Timestamp;

struct Entry<P> {
    payload: P,
    refcount: usize,
}

/// Keyed by external connector id (e.g. an OPC UA NodeId string, an MQTT
/// topic). `P` is whatever local payload the connector wants to associate
/// with that id — usually `Arc<dyn Subject>`.
pub struct ConnectorRegistry<P> {
    entries: DashMap<String, Entry<P>>,
    deleted: DashMap<String, Timestamp>,
    ttl: Duration,
}

impl<P: Clone> ConnectorRegistry<P> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            deleted: DashMap::new(),
            ttl,
        }
    }

    /// Registers a new reference to `id`, inserting `payload` if this is
    /// the first. Returns the current payload and whether this call
    /// created it.
    pub fn acquire(&self, id: &str, payload: impl FnOnce() -> P) -> (P, bool) {
        self.deleted.remove(id);
        let mut created = false;
        let entry = self
            .entries
            .entry(id.to_owned())
            .and_modify(|e| e.refcount += 1)
            .or_insert_with(|| {
                created = true;
                Entry {
                    payload: payload(),
                    refcount: 1,
                }
            });
        (entry.payload.clone(), created)
    }

    /// Releases one reference to `id`. If the reference count reaches zero
    /// the entry is removed and tombstoned until `ttl` elapses.
    pub fn release(&self, id: &str, now: Timestamp) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.refcount = entry.refcount.saturating_sub(1);
            removed = entry.refcount == 0;
        }
        if removed {
            self.entries.remove(id);
            self.deleted.insert(id.to_owned(), now);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<P> {
        self.entries.get(id).map(|e| e.payload.clone())
    }

    /// Whether `id` was deleted within the last `ttl`. Expired tombstones
    /// are purged as a side effect.
    pub fn was_recently_deleted(&self, id: &str, now: Timestamp) -> bool {
        match self.deleted.get(id) {
            Some(deleted_at) => {
                let elapsed = now.as_micros().saturating_sub(deleted_at.as_micros());
                if elapsed <= self.ttl.as_micros() as u64 {
                    true
                } else {
                    drop(deleted_at);
                    self.deleted.remove(id);
                    false
                }
            }
            None => false,
        }
    }
}
