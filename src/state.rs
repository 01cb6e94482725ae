//! Per-replica mutable state (§3)
//!
//! Everything here lives behind the single mutex `Replica` holds
//! (§5): the log, the reordering buffers, and the conflict evidence.
//! `LogEntry::done` is the one piece that must stay reachable *after*
//! the lock is released, so a primary can await it. Grounded on the
//! `tokio::sync::Notify` idiom already used elsewhere in this workspace
//! for single-shot readiness signaling (e.g. `cancel_token.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::NodeId;

pub type SlotKey = (u64, u64);
pub type PendingKey = (u64, u64, String);

/// One `(view, seq)` slot in the replica's log.
#[derive(Debug)]
pub struct LogEntry {
    pub view: u64,
    pub seq: u64,
    pub digest: String,
    pub client_id: String,
    pub request_id: String,
    pub payload: String,

    pub prepares: HashSet<NodeId>,
    pub commits: HashSet<NodeId>,

    pub prepared: bool,
    pub committed: bool,
    pub executed: bool,

    pub result: Option<String>,
    pub error: Option<String>,

    /// Notified exactly once, when `executed` flips true.
    pub done: Arc<Notify>,
}

impl LogEntry {
    pub fn new(
        view: u64,
        seq: u64,
        digest: String,
        client_id: String,
        request_id: String,
        payload: String,
    ) -> Self {
        Self {
            view,
            seq,
            digest,
            client_id,
            request_id,
            payload,
            prepares: HashSet::new(),
            commits: HashSet::new(),
            prepared: false,
            committed: false,
            executed: false,
            result: None,
            error: None,
            done: Arc::new(Notify::new()),
        }
    }
}

/// A read-only, owned snapshot of one log entry, for observation from
/// outside the replica's lock (tests, status reporting).
#[derive(Debug, Clone)]
pub struct LogEntrySnapshot {
    pub digest: String,
    pub prepares: usize,
    pub commits: usize,
    pub prepared: bool,
    pub committed: bool,
    pub executed: bool,
    pub result: Option<String>,
}

impl From<&LogEntry> for LogEntrySnapshot {
    fn from(entry: &LogEntry) -> Self {
        Self {
            digest: entry.digest.clone(),
            prepares: entry.prepares.len(),
            commits: entry.commits.len(),
            prepared: entry.prepared,
            committed: entry.committed,
            executed: entry.executed,
            result: entry.result.clone(),
        }
    }
}

/// All mutable replica state, guarded by one mutex in `Replica`.
///
/// Invariant (per spec.md §3): `view` only increases, an entry's digest
/// is fixed at first write, and `prepared`/`committed`/`executed` form a
/// one-way latch sequence.
#[derive(Debug)]
pub struct ReplicaState {
    pub view: u64,
    pub alive: bool,
    pub byzantine: bool,
    pub next_seq: u64,

    pub log: HashMap<SlotKey, LogEntry>,
    pub pending_prepares: HashMap<PendingKey, HashSet<NodeId>>,
    pub pending_commits: HashMap<PendingKey, HashSet<NodeId>>,
    pub conflicting_prepares: HashMap<SlotKey, HashSet<NodeId>>,
}

impl ReplicaState {
    pub fn new(byzantine: bool) -> Self {
        Self {
            view: 0,
            alive: true,
            byzantine,
            next_seq: 1,
            log: HashMap::new(),
            pending_prepares: HashMap::new(),
            pending_commits: HashMap::new(),
            conflicting_prepares: HashMap::new(),
        }
    }

    /// Creates the log entry at `key` if absent, draining any buffered
    /// PREPARE/COMMIT senders recorded under `pkey` into it (§3 buffer
    /// drain, §8 property 6). Returns whether this call created it.
    pub fn get_or_create_entry(
        &mut self,
        key: SlotKey,
        pkey: &PendingKey,
        digest: String,
        client_id: String,
        request_id: String,
        payload: String,
    ) -> bool {
        if self.log.contains_key(&key) {
            return false;
        }

        let mut entry = LogEntry::new(key.0, key.1, digest, client_id, request_id, payload);
        if let Some(buffered) = self.pending_prepares.remove(pkey) {
            entry.prepares.extend(buffered);
        }
        if let Some(buffered) = self.pending_commits.remove(pkey) {
            entry.commits.extend(buffered);
        }
        self.log.insert(key, entry);
        true
    }
}
