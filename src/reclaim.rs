// Copyright (c) 2025 RustyDB Contributors
//
// Sharded retirement queues.
//
// This is the simplification the design explicitly calls out: no
// epoch tracking, no hazard pointers. A thread that unlinks a node (or
// replaces a value behind its atomic indirection) pushes the freed
// pointer onto a uniformly-random shard; nothing is actually freed
// until the owning list is dropped. This is correct only because no
// freeing ever races with a traversal that already holds the address —
// callers must not keep operations in flight across `Drop`. An
// implementation that must reclaim under steady state would swap this
// for epoch-based reclamation or hazard pointers without touching the
// linearization argument in the insert/remove protocols.

use parking_lot::Mutex;

use crate::rand_source::random_bucket;

pub(crate) struct Reclaimer<T> {
    shards: Vec<Mutex<Vec<*mut T>>>,
}

impl<T> Reclaimer<T> {
    pub(crate) fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count >= 1);
        let shards = (0..shard_count).map(|_| Mutex::new(Vec::new())).collect();
        Self { shards }
    }

    /// Hand ownership of `ptr` to the reclaimer. `ptr` must not be
    /// dereferenced by the caller again.
    pub(crate) fn retire(&self, ptr: *mut T) {
        let shard = random_bucket(self.shards.len());
        self.shards[shard].lock().push(ptr);
    }

    #[cfg(test)]
    pub(crate) fn retired_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl<T> Drop for Reclaimer<T> {
    fn drop(&mut self) {
        for shard in &mut self.shards {
            for ptr in shard.get_mut().drain(..) {
                // Safety: every retired pointer was produced by
                // `Box::into_raw` and retired exactly once, and no
                // traversal can still be in flight once the owning
                // list (and therefore this reclaimer) is dropped.
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}

// Retired pointers are opaque to the reclaimer; it never reads
// through them, only frees them at teardown.
unsafe impl<T> Send for Reclaimer<T> {}
unsafe impl<T> Sync for Reclaimer<T> {}
