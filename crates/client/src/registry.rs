// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-call registry: correlates inbound responses to outbound calls.
//!
//! Each call registers a single-assignment slot under a fresh id. The socket
//! pump resolves slots from the network thread while callers insert and
//! remove from their own tasks, so slots live in a sharded concurrent map and
//! ids come from an atomic counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::codec::ResponseEnvelope;
use crate::error::{ClientError, Result};

/// What a pending slot resolves to.
pub type Outcome = Result<ResponseEnvelope>;

pub struct RequestRegistry {
    next_id: AtomicU32,
    slots: DashMap<u32, oneshot::Sender<Outcome>>,
}

impl RequestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_id: AtomicU32::new(1), slots: DashMap::new() })
    }

    /// Allocate a fresh id and its slot.
    ///
    /// The returned [`PendingCall`] removes its entry when dropped, so a
    /// cancelled caller never leaks a slot.
    pub fn register(self: &Arc<Self>) -> Result<PendingCall> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(id) {
            Entry::Occupied(_) => {
                return Err(ClientError::transport(format!("request id {id} is still pending")));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        Ok(PendingCall { id, rx, registry: Arc::clone(self) })
    }

    /// Complete the slot for `id`. Returns `false` when no such slot exists.
    pub fn resolve(&self, id: u32, outcome: Outcome) -> bool {
        match self.slots.remove(&id) {
            Some((_, tx)) => {
                // The receiver may have been dropped between remove and send; nothing to do.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every pending slot with `cause` and empty the registry.
    pub fn fail_all(&self, cause: ClientError) -> usize {
        let ids: Vec<u32> = self.slots.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.resolve(id, Err(cause.clone())) {
                failed += 1;
            }
        }
        failed
    }

    /// Drop every pending slot without failing it.
    ///
    /// Awaiting callers observe [`ClientError::Disconnected`].
    pub fn clear(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.contains_key(&id)
    }
}

/// Caller's side of a registered slot.
pub struct PendingCall {
    id: u32,
    rx: oneshot::Receiver<Outcome>,
    registry: Arc<RequestRegistry>,
}

impl PendingCall {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the slot to be resolved.
    pub async fn wait(mut self) -> Outcome {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    /// Non-blocking poll of the slot, mainly for tests.
    pub fn try_take(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ClientError::Disconnected)),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.registry.slots.remove(&self.id);
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
