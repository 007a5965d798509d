use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::manifest::{FileId, OwnerId};

type Key = (OwnerId, FileId);

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Per-file mutual exclusion. Operations on one file record serialize;
/// different files (and different owners) never wait on each other, and a
/// release only wakes waiters of that file. Only files currently held or
/// waited on occupy an entry.
#[derive(Default)]
pub struct FileLocks {
    slots: Mutex<HashMap<Key, Arc<Slot>>>,
}

pub struct FileGuard<'a> {
    locks: &'a FileLocks,
    key: Key,
    slot: Arc<Slot>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `(owner, file)` is free, then hold it until the guard drops.
    pub fn lock(&self, owner: &OwnerId, file: &FileId) -> FileGuard<'_> {
        let key = (owner.clone(), file.clone());
        // Slots are only cloned under the table lock, which keeps the
        // strong count an exact census of holder plus waiters.
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();
        {
            let mut held = slot.held.lock();
            while *held {
                slot.released.wait(&mut held);
            }
            *held = true;
        }
        FileGuard { locks: self, key, slot }
    }

    /// Number of files currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        *self.slot.held.lock() = false;
        self.slot.released.notify_one();
        // table + this guard: nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn owner(s: &str) -> OwnerId {
        OwnerId::new(s).unwrap()
    }

    #[test]
    fn same_file_serializes() {
        let locks = Arc::new(FileLocks::new());
        let file = FileId::generate();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (locks, file, inside, max_seen) =
                    (locks.clone(), file.clone(), inside.clone(), max_seen.clone());
                thread::spawn(move || {
                    let _g = locks.lock(&owner("a"), &file);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn different_files_do_not_block() {
        let locks = FileLocks::new();
        let _a = locks.lock(&owner("a"), &FileId::generate());
        let _b = locks.lock(&owner("a"), &FileId::generate());
        let _c = locks.lock(&owner("b"), &FileId::generate());
        assert_eq!(locks.len(), 3);
    }

    #[test]
    fn release_of_another_file_does_not_admit_a_waiter() {
        let locks = Arc::new(FileLocks::new());
        let (x, y) = (FileId::generate(), FileId::generate());
        let gx = locks.lock(&owner("a"), &x);
        let gy = locks.lock(&owner("b"), &y);
        let entered = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let (locks, x, entered) = (locks.clone(), x.clone(), entered.clone());
            thread::spawn(move || {
                let _g = locks.lock(&owner("a"), &x);
                entered.store(1, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(gy);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        assert_eq!(locks.len(), 1);
        drop(gx);
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn entries_are_dropped_after_release() {
        let locks = FileLocks::new();
        let file = FileId::generate();
        {
            let _g = locks.lock(&owner("a"), &file);
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
