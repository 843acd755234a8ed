//! Per-entity admission control for toggles.
//!
//! A cooperative, non-blocking lock: a key that already has a toggle in
//! flight is refused outright. Nothing waits and nothing is queued.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::EntityKey;

/// Tracks which keys have a mutation in flight.
///
/// Each admission carries a ticket. A permit only removes its own ticket
/// on release, so a forced [`OperationGate::release`] followed by a fresh
/// admission is never undone by the stale permit.
#[derive(Debug, Default)]
pub struct OperationGate {
    pending: DashMap<EntityKey, u64>,
    next_ticket: AtomicU64,
}

/// Proof of admission for one key. Releases the key when dropped.
#[derive(Debug)]
#[must_use = "dropping the permit releases the key immediately"]
pub struct GatePermit<'a> {
    gate: &'a OperationGate,
    key: EntityKey,
    ticket: u64,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let removed = self
            .gate
            .pending
            .remove_if(&self.key, |_, ticket| *ticket == self.ticket)
            .is_some();
        trace!(key = %self.key, ticket = self.ticket, removed, "gate permit released");
    }
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `key` if nothing is in flight for it.
    ///
    /// Returns `None` immediately when the key is already pending.
    pub fn try_admit(&self, key: &EntityKey) -> Option<GatePermit<'_>> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "toggle already in flight, not admitted");
                None
            }
            Entry::Vacant(entry) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                entry.insert(ticket);
                Some(GatePermit {
                    gate: self,
                    key: key.clone(),
                    ticket,
                })
            }
        }
    }

    /// Remove `key` from the pending set regardless of who holds it.
    ///
    /// Returns whether the key was pending.
    pub fn release(&self, key: &EntityKey) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every pending key.
    pub fn clear(&self) {
        self.pending.clear();
    }
}
