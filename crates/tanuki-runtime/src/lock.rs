//! Per-issue FIFO serialization.
//!
//! Each key maps to a fair `tokio::sync::Mutex`, so waiters run in arrival
//! order and a failing holder releases the lock like any other. Slots are
//! reference counted and dropped once the last holder or waiter leaves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

struct LockSlot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

#[derive(Default)]
pub struct IssueLockTable {
    slots: Mutex<HashMap<String, LockSlot>>,
}

/// Registration in a slot; released on drop even if the waiter is cancelled.
struct SlotTicket<'a> {
    table: &'a IssueLockTable,
    key: String,
}

impl Drop for SlotTicket<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .table
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Held for the whole processing of one event.
pub struct IssueLockGuard<'a> {
    // field order matters: the mutex is released before the slot is
    // unregistered
    _guard: OwnedMutexGuard<()>,
    _ticket: SlotTicket<'a>,
}

impl IssueLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until every earlier holder of `key` has finished.
    pub async fn acquire(&self, key: &str) -> IssueLockGuard<'_> {
        let mutex = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.to_string()).or_insert_with(|| LockSlot {
                mutex: Arc::new(tokio::sync::Mutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };
        let ticket = SlotTicket {
            table: self,
            key: key.to_string(),
        };
        let guard = mutex.lock_owned().await;
        IssueLockGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of keys with a holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
