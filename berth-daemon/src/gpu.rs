//! GPU resource pool
//!
//! A fixed set of GPU ids, each either locked or unlocked. Ids are handed out
//! as a [`GpuLease`], which returns them to the pool exactly once: either by
//! an explicit [`GpuLease::release`] or when the lease is dropped.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug)]
struct GpuSlot {
    id: String,
    locked: bool,
}

/// Pool of GPU ids
#[derive(Debug)]
pub struct GpuPool {
    slots: Mutex<Vec<GpuSlot>>,
}

/// Orders numeric ids by value ("2" before "10"), others after them by text
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl GpuPool {
    /// Creates a pool with every id unlocked
    pub fn new(ids: Vec<String>) -> Arc<Self> {
        let mut slots: Vec<GpuSlot> = ids
            .into_iter()
            .map(|id| GpuSlot { id, locked: false })
            .collect();
        slots.sort_by(|a, b| compare_ids(&a.id, &b.id));
        slots.dedup_by(|a, b| a.id == b.id);

        Arc::new(Self {
            slots: Mutex::new(slots),
        })
    }

    fn slots(&self) -> MutexGuard<'_, Vec<GpuSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of ids in the pool
    pub fn total(&self) -> usize {
        self.slots().len()
    }

    /// Number of currently unlocked ids
    pub fn available(&self) -> usize {
        self.slots().iter().filter(|slot| !slot.locked).count()
    }

    /// Locks `count` ids, lowest first
    ///
    /// Returns `None` without locking anything if fewer than `count` ids
    /// are unlocked. A request for zero GPUs always succeeds.
    pub fn try_lock(self: &Arc<Self>, count: usize) -> Option<GpuLease> {
        let mut slots = self.slots();

        if slots.iter().filter(|slot| !slot.locked).count() < count {
            return None;
        }

        let ids: Vec<String> = slots
            .iter_mut()
            .filter(|slot| !slot.locked)
            .take(count)
            .map(|slot| {
                slot.locked = true;
                slot.id.clone()
            })
            .collect();

        if !ids.is_empty() {
            debug!("Locked GPUs {:?}", ids);
        }

        Some(GpuLease {
            pool: Arc::clone(self),
            ids,
            released: AtomicBool::new(false),
        })
    }

    /// Id and lock state of every GPU
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.slots()
            .iter()
            .map(|slot| (slot.id.clone(), slot.locked))
            .collect()
    }

    fn unlock(&self, ids: &[String]) {
        let mut slots = self.slots();

        for id in ids {
            match slots.iter_mut().find(|slot| &slot.id == id) {
                Some(slot) if slot.locked => slot.locked = false,
                Some(_) => warn!("GPU {} released while already unlocked", id),
                None => warn!("GPU {} released but is not part of the pool", id),
            }
        }

        if !ids.is_empty() {
            debug!("Released GPUs {:?}", ids);
        }
    }
}

/// GPU ids locked for one run
#[derive(Debug)]
pub struct GpuLease {
    pool: Arc<GpuPool>,
    ids: Vec<String>,
    released: AtomicBool,
}

impl GpuLease {
    /// Locked ids, lowest first
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Returns the ids to the pool
    ///
    /// Only the first call has an effect; returns whether this call released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, AtomicOrdering::AcqRel) {
            return false;
        }
        self.pool.unlock(&self.ids);
        true
    }
}

impl Drop for GpuLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(ids: &[&str]) -> Arc<GpuPool> {
        GpuPool::new(ids.iter().map(|id| id.to_string()).collect())
    }

    #[test]
    fn test_locks_lowest_ids_first() {
        let pool = pool(&["10", "2", "0"]);

        let lease = pool.try_lock(2).unwrap();
        assert_eq!(lease.ids(), &["0".to_string(), "2".to_string()]);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.total(), 3);
    }

    #[test]
    fn test_insufficient_gpus_locks_nothing() {
        let pool = pool(&["0", "1"]);
        let _held = pool.try_lock(1).unwrap();

        assert!(pool.try_lock(2).is_none());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_zero_gpus_always_succeeds() {
        let pool = pool(&[]);
        let lease = pool.try_lock(0).unwrap();
        assert!(lease.ids().is_empty());
    }

    #[test]
    fn test_release_happens_exactly_once() {
        let pool = pool(&["0", "1"]);
        let lease = pool.try_lock(2).unwrap();

        assert!(lease.release());
        assert!(!lease.release());
        assert_eq!(pool.available(), 2);

        // A later lease is not disturbed by the stale one being dropped
        let second = pool.try_lock(2).unwrap();
        drop(lease);
        assert_eq!(pool.available(), 0);
        drop(second);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_drop_releases() {
        let pool = pool(&["0"]);
        {
            let _lease = pool.try_lock(1).unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_snapshot_and_duplicate_ids() {
        let pool = pool(&["gpu-b", "1", "1", "gpu-a"]);
        let _lease = pool.try_lock(1).unwrap();

        assert_eq!(
            pool.snapshot(),
            vec![
                ("1".to_string(), true),
                ("gpu-a".to_string(), false),
                ("gpu-b".to_string(), false),
            ]
        );
    }
}
