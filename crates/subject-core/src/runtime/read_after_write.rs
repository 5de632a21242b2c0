//! Read-after-write coalescing scheduler.
//!
//! `spec.md` §5: after pushing a write out to a source, a connector
//! typically wants to read the value back shortly after to confirm it took
//! (some protocols don't echo the applied value in the write
//! acknowledgement). Several writes to the same property in quick
//! succession should produce exactly one scheduled read-back (tracked by
//! the `coalesced` counter), and when that read-back finally fires it
//! performs one batched read covering every property due at that point,
//! not one round-trip per property. A read-back response whose source
//! timestamp is already older than a later local write is stale and should
//! be discarded rather than overwrite the newer value ([`is_stale`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, Timestamp};
use crate::property::{subject_id, PropertyReference, SubjectId};

type Key = (SubjectId, &'static str);

struct PendingEntry {
    property: PropertyReference,
    written_at: Timestamp,
}

pub struct ReadAfterWriteScheduler {
    pending: Mutex<HashMap<Key, PendingEntry>>,
    last_write_timestamp: Mutex<HashMap<Key, Timestamp>>,
    delay: Duration,
    clock: Arc<dyn Clock>,
    scheduled: AtomicU64,
    coalesced: AtomicU64,
}

impl ReadAfterWriteScheduler {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            last_write_timestamp: Mutex::new(HashMap::new()),
            delay,
            clock,
            scheduled: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        })
    }

    /// Schedules a batched read-back after the configured delay. If a
    /// read-back is already pending for `property`, this call only updates
    /// the timestamp the eventual read confirms and is counted in
    /// `coalesced` — it does not spawn a second task, and its own
    /// `read_back` closure is discarded: the already-scheduled task's
    /// closure is what fires, with every property due folded into its
    /// batch.
    pub fn schedule<F>(self: &Arc<Self>, property: PropertyReference, written_at: Timestamp, read_back: F)
    where
        F: FnOnce(Vec<(PropertyReference, Timestamp)>) + Send + 'static,
    {
        let key = (subject_id(&property.subject), property.name);
        self.last_write_timestamp.lock().insert(key, written_at);

        {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(&key) {
                entry.written_at = written_at;
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                return;
            }
            pending.insert(key, PendingEntry { property, written_at });
        }
        self.scheduled.fetch_add(1, Ordering::Relaxed);

        let this = self.clone();
        let delay = self.delay;
        let clock = self.clock.clone();
        tokio::spawn(async move {
            clock.sleep(delay).await;
            this.flush_due(read_back);
        });
    }

    /// Drains every property currently due (not just the one that scheduled
    /// this task) and delivers them as a single batch.
    fn flush_due<F>(&self, read_back: F)
    where
        F: FnOnce(Vec<(PropertyReference, Timestamp)>),
    {
        let due: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, entry)| entry).collect();
        if due.is_empty() {
            return;
        }
        let batch = due.into_iter().map(|entry| (entry.property, entry.written_at)).collect();
        read_back(batch);
    }

    pub fn is_pending(&self, property: &PropertyReference) -> bool {
        self.pending
            .lock()
            .contains_key(&(subject_id(&property.subject), property.name))
    }

    /// Whether `source_timestamp` (the write time a read-back response
    /// reports) is already superseded by a local write recorded after it —
    /// in which case the response should be discarded rather than applied.
    pub fn is_stale(&self, property: &PropertyReference, source_timestamp: Timestamp) -> bool {
        self.last_write_timestamp
            .lock()
            .get(&(subject_id(&property.subject), property.name))
            .is_some_and(|last| *last > source_timestamp)
    }

    pub fn scheduled_count(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
