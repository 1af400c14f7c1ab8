// lock.rs — The shared workspace and its exclusive FIFO lock.
//
// There is exactly one workspace directory. Anything that touches it
// (reset, apply, checkpoint, publish, rollback, revert) must hold the
// workspace lock for its whole duration. The lock is a ticket lock: callers
// are served strictly in the order they asked, so a steady stream of short
// operations can't starve a publish.
//
// Registry reads and decision bookkeeping never take this lock.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// Result of the last successful clone.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncInfo {
    pub synced_at: DateTime<Utc>,
    /// Remote tip the clone was taken at.
    pub tip: String,
}

/// The single isolated working copy.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    tickets: Mutex<Tickets>,
    turn: Condvar,
    last_sync: Mutex<Option<SyncInfo>>,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
            last_sync: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until this caller's turn, then hold the workspace exclusively.
    pub fn lock(&self) -> WorkspaceGuard<'_> {
        let mut tickets = self.tickets();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            tickets = self
                .turn
                .wait(tickets)
                .unwrap_or_else(PoisonError::into_inner);
        }
        WorkspaceGuard { workspace: self }
    }

    /// Take the lock only if nobody holds it or is queued for it.
    pub fn try_lock(&self) -> Option<WorkspaceGuard<'_>> {
        let mut tickets = self.tickets();
        if tickets.next != tickets.serving {
            return None;
        }
        tickets.next += 1;
        Some(WorkspaceGuard { workspace: self })
    }

    /// Number of holders plus waiters.
    pub fn contention(&self) -> u64 {
        let tickets = self.tickets();
        tickets.next - tickets.serving
    }

    pub fn last_sync(&self) -> Option<SyncInfo> {
        self.last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_sync(&self, info: Option<SyncInfo>) {
        *self
            .last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = info;
    }

    fn release(&self) {
        let mut tickets = self.tickets();
        tickets.serving += 1;
        drop(tickets);
        self.turn.notify_all();
    }

    fn tickets(&self) -> MutexGuard<'_, Tickets> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of exclusive access to the workspace. Released on drop.
#[derive(Debug)]
pub struct WorkspaceGuard<'a> {
    workspace: &'a Workspace,
}

impl WorkspaceGuard<'_> {
    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    /// Whether this guard was issued by `workspace`.
    pub fn guards(&self, workspace: &Workspace) -> bool {
        std::ptr::eq(self.workspace, workspace)
    }

    /// Record a successful clone at `tip`.
    pub fn mark_synced(&self, tip: impl Into<String>) {
        self.workspace.set_last_sync(Some(SyncInfo {
            synced_at: Utc::now(),
            tip: tip.into(),
        }));
    }

    /// Forget the last sync (the clone is gone or unusable).
    pub fn mark_unsynced(&self) {
        self.workspace.set_last_sync(None);
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        self.workspace.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn wait_for_contention(ws: &Workspace, expected: u64) {
        for _ in 0..500 {
            if ws.contention() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("contention never reached {expected}");
    }

    #[test]
    fn try_lock_fails_while_held() {
        let ws = Workspace::new("/tmp/ws");
        let guard = ws.lock();
        assert!(ws.try_lock().is_none());
        drop(guard);
        assert!(ws.try_lock().is_some());
        assert_eq!(ws.contention(), 0);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let ws = Arc::new(Workspace::new("/tmp/ws"));
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = ws.lock();

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let waiter_ws = Arc::clone(&ws);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = waiter_ws.lock();
                order.lock().unwrap().push(i);
            }));
            // Make sure waiter i has its ticket before the next one starts.
            wait_for_contention(&ws, i + 2);
        }

        drop(held);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn holders_never_overlap() {
        let ws = Arc::new(Workspace::new("/tmp/ws"));
        let inside = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ws = Arc::clone(&ws);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = ws.lock();
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        thread::yield_now();
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn guard_tracks_sync_info() {
        let ws = Workspace::new("/tmp/ws");
        assert!(ws.last_sync().is_none());
        {
            let guard = ws.lock();
            assert!(guard.guards(&ws));
            guard.mark_synced("abc");
        }
        assert_eq!(ws.last_sync().unwrap().tip, "abc");

        let other = Workspace::new("/tmp/other");
        assert!(!ws.lock().guards(&other));
    }
}
