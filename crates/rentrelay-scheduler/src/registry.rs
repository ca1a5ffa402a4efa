//! Timer bookkeeping: one tokio task per armed schedule, plus a
//! firing set that keeps executions of the same schedule from
//! overlapping.
//!
//! Aborting a timer task never touches an in-flight execution; those
//! run as detached tasks and finish on their own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
    firing: Arc<Mutex<HashSet<i64>>>,
}

/// Held for the duration of one execution; releases the schedule's
/// firing slot on drop, including on panic or cancellation.
pub struct FiringGuard {
    firing: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.firing.lock() {
            set.remove(&self.id);
        }
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer task for a schedule. Arming is idempotent: an
    /// existing timer for the same id is aborted first.
    pub fn arm(&self, id: i64, handle: JoinHandle<()>) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some(old) = timers.insert(id, handle) {
                old.abort();
            }
        }
    }

    /// Abort and remove a schedule's timer. Returns false when no
    /// timer was armed.
    pub fn disarm(&self, id: i64) -> bool {
        match self.timers.lock() {
            Ok(mut timers) => match timers.remove(&id) {
                Some(handle) => {
                    handle.abort();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_armed(&self, id: i64) -> bool {
        self.timers
            .lock()
            .map(|t| t.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn armed_ids(&self) -> Vec<i64> {
        self.timers
            .lock()
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Abort every timer. Used at shutdown.
    pub fn clear(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }

    /// Claim the firing slot for a schedule. Returns None when an
    /// execution is already in flight.
    pub fn try_begin_fire(&self, id: i64) -> Option<FiringGuard> {
        let mut set = self.firing.lock().ok()?;
        if !set.insert(id) {
            return None;
        }
        Some(FiringGuard {
            firing: Arc::clone(&self.firing),
            id,
        })
    }

    pub fn is_firing(&self, id: i64) -> bool {
        self.firing
            .lock()
            .map(|s| s.contains(&id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn arm_and_disarm() {
        let registry = TimerRegistry::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        registry.arm(1, handle);
        assert!(registry.is_armed(1));
        assert_eq!(registry.armed_ids(), vec![1]);

        assert!(registry.disarm(1));
        assert!(!registry.is_armed(1));
        assert!(!registry.disarm(1));
    }

    #[tokio::test]
    async fn rearm_aborts_previous_timer() {
        let registry = TimerRegistry::new();
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        registry.arm(1, first);
        registry.arm(1, second);

        // Give the runtime a tick to process the abort.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.is_armed(1));
        assert_eq!(registry.armed_ids().len(), 1);
    }

    #[tokio::test]
    async fn firing_slot_is_exclusive_until_dropped() {
        let registry = TimerRegistry::new();

        let guard = registry.try_begin_fire(7);
        assert!(guard.is_some());
        assert!(registry.is_firing(7));
        assert!(registry.try_begin_fire(7).is_none());

        // Other schedules are unaffected.
        assert!(registry.try_begin_fire(8).is_some());

        drop(guard);
        assert!(!registry.is_firing(7));
        assert!(registry.try_begin_fire(7).is_some());
    }

    #[tokio::test]
    async fn clear_aborts_everything() {
        let registry = TimerRegistry::new();
        for id in 1..=3 {
            registry.arm(
                id,
                tokio::spawn(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }),
            );
        }
        registry.clear();
        assert!(registry.armed_ids().is_empty());
    }
}
