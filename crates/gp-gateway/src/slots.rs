// slots.rs — Per-workflow exclusion shared by intake runs and decisions.
//
// A slot exists only while somebody holds or waits for it. The last holder
// removes the entry on the way out, so the map never outgrows the number
// of workflows currently being worked on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

type Slot = Arc<Mutex<()>>;

#[derive(Default)]
pub struct WorkflowSlots {
    slots: Mutex<HashMap<String, Slot>>,
}

impl WorkflowSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the slot for `id`, waiting for any other holder.
    pub fn with<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let slot = self.acquire(id);
        let result = {
            let _held = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(id, slot);
        result
    }

    /// Run `f` only if nobody holds the slot for `id`.
    pub fn try_with<T>(&self, id: &str, f: impl FnOnce() -> T) -> Option<T> {
        let slot = self.acquire(id);
        let result = match slot.try_lock() {
            Ok(_held) => Some(f()),
            Err(TryLockError::Poisoned(poisoned)) => {
                let _held = poisoned.into_inner();
                Some(f())
            }
            Err(TryLockError::WouldBlock) => None,
        };
        self.release(id, slot);
        result
    }

    /// Ids with a holder or waiter right now.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn acquire(&self, id: &str) -> Slot {
        Arc::clone(self.map().entry(id.to_string()).or_default())
    }

    fn release(&self, id: &str, slot: Slot) {
        let mut map = self.map();
        // One reference is ours and one is the map's. The count only moves
        // under the map lock, so no new holder can appear in between.
        let last = Arc::strong_count(&slot) == 2
            && map.get(id).is_some_and(|current| Arc::ptr_eq(current, &slot));
        drop(slot);
        if last {
            map.remove(id);
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
