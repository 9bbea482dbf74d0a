//! Connection id allocation
//!
//! Ids come from the bounded space `[1, max_id]` and are conserved: a released
//! id is queued for reuse instead of the space being treated as inexhaustible.
//!
//! The allocator keeps two arrays. `get` pops from the *active* array; released
//! ids are appended to the *recycle* array. When the active array runs dry the
//! two are swapped. A bitset marks ids sitting in the recycle array so a second
//! release of the same id is rejected instead of queuing it twice.
//!
//! Independently of the id space, a live ceiling bounds how many ids may be
//! issued and not yet released at once. `get` returns [`INVALID_ID`] when the
//! ceiling is reached.

use parking_lot::Mutex;

/// Sentinel returned by [`ConnIdAllocator::get`] when no id can be issued
pub const INVALID_ID: u32 = 0;

struct Pools {
    active: Vec<u32>,
    cursor: usize,
    recycle: Vec<u32>,
    recycled_bits: Vec<u64>,
    live: usize,
}

impl Pools {
    fn is_recycled(&self, id: u32) -> bool {
        self.recycled_bits[(id >> 6) as usize] & (1u64 << (id & 63)) != 0
    }

    fn mark_recycled(&mut self, id: u32) {
        self.recycled_bits[(id >> 6) as usize] |= 1u64 << (id & 63);
    }
}

/// Issues and recycles unique connection ids
///
/// All state sits behind one mutex; `get` and `release` are O(1) amortized.
///
/// ```rust
/// use wsrpc_server::ConnIdAllocator;
///
/// let ids = ConnIdAllocator::new(3, 2);
/// let a = ids.get();
/// let b = ids.get();
/// assert_ne!(a, b);
/// assert_eq!(ids.get(), 0); // live ceiling reached
///
/// assert!(ids.release(a));
/// assert!(!ids.release(a)); // already queued
/// assert_ne!(ids.get(), 0);
/// ```
pub struct ConnIdAllocator {
    max_id: u32,
    max_live: usize,
    pools: Mutex<Pools>,
}

impl ConnIdAllocator {
    /// Allocator over `[1, max_id]` issuing at most `max_live` ids at once
    pub fn new(max_id: u32, max_live: usize) -> Self {
        let words = (max_id as usize >> 6) + 1;
        Self {
            max_id,
            max_live,
            pools: Mutex::new(Pools {
                active: (1..=max_id).collect(),
                cursor: 0,
                recycle: Vec::new(),
                recycled_bits: vec![0; words],
                live: 0,
            }),
        }
    }

    /// Issue an id, or [`INVALID_ID`] when the live ceiling is reached or every
    /// id is in use
    pub fn get(&self) -> u32 {
        let mut pools = self.pools.lock();

        if pools.live >= self.max_live {
            return INVALID_ID;
        }

        if pools.cursor == pools.active.len() {
            let pools = &mut *pools;
            std::mem::swap(&mut pools.active, &mut pools.recycle);
            pools.recycle.clear();
            pools.cursor = 0;
            pools.recycled_bits.iter_mut().for_each(|word| *word = 0);

            if pools.active.is_empty() {
                return INVALID_ID;
            }
        }

        let id = pools.active[pools.cursor];
        pools.cursor += 1;
        pools.live += 1;
        id
    }

    /// Return `id` to the pool
    ///
    /// Returns `false` for [`INVALID_ID`], ids outside the space, and ids that
    /// are already queued for reuse.
    pub fn release(&self, id: u32) -> bool {
        if id == INVALID_ID || id > self.max_id {
            return false;
        }

        let mut pools = self.pools.lock();
        if pools.is_recycled(id) {
            return false;
        }

        pools.recycle.push(id);
        pools.mark_recycled(id);
        pools.live = pools.live.saturating_sub(1);
        true
    }

    /// Number of ids issued and not yet released
    pub fn live(&self) -> usize {
        self.pools.lock().live
    }

    /// Upper bound of the id space
    pub fn max_id(&self) -> u32 {
        self.max_id
    }
}

impl std::fmt::Debug for ConnIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnIdAllocator")
            .field("max_id", &self.max_id)
            .field("max_live", &self.max_live)
            .field("live", &self.live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one_and_are_unique() {
        let ids = ConnIdAllocator::new(100, 100);
        let issued: Vec<u32> = (0..100).map(|_| ids.get()).collect();

        assert_eq!(issued[0], 1);
        assert!(!issued.contains(&INVALID_ID));
        assert_eq!(issued.iter().collect::<HashSet<_>>().len(), 100);
        assert_eq!(ids.live(), 100);
    }

    #[test]
    fn test_live_ceiling_fails_closed() {
        let ids = ConnIdAllocator::new(1000, 5);
        for _ in 0..5 {
            assert_ne!(ids.get(), INVALID_ID);
        }
        assert_eq!(ids.get(), INVALID_ID);

        assert!(ids.release(3));
        assert_ne!(ids.get(), INVALID_ID);
    }

    #[test]
    fn test_release_rejects_invalid_and_double_release() {
        let ids = ConnIdAllocator::new(10, 10);
        let id = ids.get();

        assert!(!ids.release(INVALID_ID));
        assert!(!ids.release(11));
        assert!(ids.release(id));
        assert!(!ids.release(id));
        assert_eq!(ids.live(), 0);
    }

    #[test]
    fn test_recycled_ids_are_reissued_after_exhaustion() {
        let ids = ConnIdAllocator::new(3, 3);
        let first: Vec<u32> = (0..3).map(|_| ids.get()).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(ids.get(), INVALID_ID);

        assert!(ids.release(2));
        assert_eq!(ids.get(), 2);

        // Swap cleared the bitset, so 2 can be released again once reissued
        assert!(ids.release(2));
        assert!(ids.release(1));
        let again: HashSet<u32> = (0..2).map(|_| ids.get()).collect();
        assert_eq!(again, HashSet::from([1, 2]));
    }

    #[test]
    fn test_exhausted_space_without_recycled_ids() {
        let ids = ConnIdAllocator::new(2, 10);
        assert_eq!(ids.get(), 1);
        assert_eq!(ids.get(), 2);
        assert_eq!(ids.get(), INVALID_ID);
        assert_eq!(ids.live(), 2);
    }

    #[test]
    fn test_concurrent_get_release_never_duplicates_live_ids() {
        let ids = Arc::new(ConnIdAllocator::new(64, 32));
        let live = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                let live = live.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let id = ids.get();
                        if id == INVALID_ID {
                            continue;
                        }
                        assert!(live.lock().insert(id), "id {id} issued twice");
                        live.lock().remove(&id);
                        assert!(ids.release(id));
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(ids.live(), 0);
    }
}
