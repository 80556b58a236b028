//! Transaction ID allocator (C3).
//!
//! DNS queries are matched to responses by a 16-bit transaction ID.
//! Handing out predictable (eg sequential) ids makes off-path response
//! spoofing easier, so ids are drawn uniformly at random from the pool of
//! ids not currently in flight.
//!
//! The free space is tracked as a sorted list of disjoint, inclusive
//! ranges rather than a bitmap or a set of individual ids: under normal
//! load almost all of the 65536 possible ids are free, and representing
//! that as one giant range is both cheap to store and cheap to sample
//! from.

use std::ops::RangeInclusive;

use rand::Rng;

/// A pool of free 16-bit ids, handed out and reclaimed at random.
pub struct TransactionIdPool {
    /// Disjoint, sorted, non-adjacent ranges of free ids.
    free: Vec<RangeInclusive<u32>>,
}

impl TransactionIdPool {
    pub fn new() -> Self {
        Self {
            free: vec![0..=0xFFFF],
        }
    }

    /// Allocate a fresh id.  Returns `None` if every id is in use (all
    /// 65536 of them) -- this should not happen in practice.
    pub fn get(&mut self) -> Option<u16> {
        if self.free.is_empty() {
            return None;
        }

        let weights: Vec<u32> = self
            .free
            .iter()
            .map(|r| r.end() - r.start() + 1)
            .collect();
        let total: u32 = weights.iter().sum();

        let mut pick = rand::thread_rng().gen_range(0..total);
        let mut idx = 0;
        for (i, w) in weights.iter().enumerate() {
            if pick < *w {
                idx = i;
                break;
            }
            pick -= w;
        }

        let range = self.free.remove(idx);
        let id = rand::thread_rng().gen_range(*range.start()..=*range.end());

        if id > *range.start() {
            self.free.insert(idx, *range.start()..=(id - 1));
        }
        if id < *range.end() {
            self.free.insert(
                idx + usize::from(id > *range.start()),
                (id + 1)..=*range.end(),
            );
        }

        Some(id as u16)
    }

    /// Return an id to the pool, merging it with adjacent free ranges.
    /// Idempotent: returning an id that is already free is a no-op.
    pub fn put(&mut self, id: u16) {
        let id = u32::from(id);

        if self.free.iter().any(|r| r.contains(&id)) {
            return;
        }

        let insert_at = self
            .free
            .iter()
            .position(|r| *r.start() > id)
            .unwrap_or(self.free.len());

        let merge_prev = insert_at > 0 && *self.free[insert_at - 1].end() + 1 == id;
        let merge_next = insert_at < self.free.len() && *self.free[insert_at].start() == id + 1;

        match (merge_prev, merge_next) {
            (true, true) => {
                let start = *self.free[insert_at - 1].start();
                let end = *self.free[insert_at].end();
                self.free.splice(insert_at - 1..=insert_at, [start..=end]);
            }
            (true, false) => {
                let start = *self.free[insert_at - 1].start();
                self.free[insert_at - 1] = start..=id;
            }
            (false, true) => {
                let end = *self.free[insert_at].end();
                self.free[insert_at] = id..=end;
            }
            (false, false) => {
                self.free.insert(insert_at, id..=id);
            }
        }
    }

    /// The number of ids currently available.
    #[cfg(test)]
    fn free_count(&self) -> u32 {
        self.free.iter().map(|r| r.end() - r.start() + 1).sum()
    }
}

impl Default for TransactionIdPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn get_ids_are_unique_until_exhausted() {
        let mut pool = TransactionIdPool::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = pool.get().unwrap();
            assert!(seen.insert(id), "id {id} handed out twice");
        }
    }

    #[test]
    fn put_returns_id_to_pool() {
        let mut pool = TransactionIdPool::new();
        assert_eq!(pool.free_count(), 65536);
        let id = pool.get().unwrap();
        assert_eq!(pool.free_count(), 65535);
        pool.put(id);
        assert_eq!(pool.free_count(), 65536);
    }

    #[test]
    fn put_is_idempotent() {
        let mut pool = TransactionIdPool::new();
        let id = pool.get().unwrap();
        pool.put(id);
        pool.put(id);
        assert_eq!(pool.free_count(), 65536);
    }

    #[test]
    fn put_merges_adjacent_ranges() {
        let mut pool = TransactionIdPool {
            free: vec![0..=4, 6..=10],
        };
        pool.put(5);
        assert_eq!(pool.free, vec![0..=10]);
    }

    #[test]
    fn allocating_everything_exhausts_the_pool() {
        let mut pool = TransactionIdPool::new();
        let mut ids = Vec::new();
        for _ in 0..65536 {
            ids.push(pool.get().expect("pool should not be empty yet"));
        }
        assert!(pool.get().is_none());
        assert_eq!(pool.free_count(), 0);

        for id in ids {
            pool.put(id);
        }
        assert_eq!(pool.free_count(), 65536);
    }
}
