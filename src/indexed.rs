// Copyright (c) 2025 RustyDB Contributors
//
// Rank/select-indexed skip list (variant I).
//
// Same fine-grained lock-based protocol as the plain lock-based
// variant, plus a per-edge `span`: the number of real elements you
// cross by taking that edge instead of walking the bottom level node
// by node. Spans are NOT maintained incrementally on every insert or
// remove — that would mean touching O(log n) ancestors' span counts
// under lock on every mutation, for a feature most callers don't need
// on every write. Instead `compute_indices()` does a single O(n)
// sequential pass that recomputes every span from scratch; callers
// that want `rank`/`select` call it once after a batch of mutations
// and must not mutate concurrently with it or with each other while
// relying on its results — this is the indexing extension's
// documented quiescent precondition, not a bug.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::bound::{bound_eq, bound_lt, Bound};
use crate::config::SkipListConfig;
use crate::error::Result;
use crate::rand_source::random_level;
use crate::reclaim::Reclaimer;

#[repr(align(8))]
struct Node<K, V> {
    key: Bound<K>,
    value: AtomicPtr<V>,
    next: Box<[AtomicPtr<Node<K, V>>]>,
    spans: Box<[AtomicUsize]>,
    cached_count: AtomicUsize,
    mutex: Mutex<()>,
    being_deleted: AtomicBool,
    fully_linked: AtomicBool,
}

impl<K, V> Node<K, V> {
    fn new(key: Bound<K>, value: V, height: usize) -> *mut Self {
        let next = (0..height)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let spans = (0..height)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::into_raw(Box::new(Self {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next,
            spans,
            cached_count: AtomicUsize::new(0),
            mutex: Mutex::new(()),
            being_deleted: AtomicBool::new(false),
            fully_linked: AtomicBool::new(false),
        }))
    }

    fn height(&self) -> usize {
        self.next.len()
    }
}

/// A sorted map backed by a lock-based skip list augmented with
/// per-edge span counts for `O(log n)` `rank`/`select`.
pub struct IndexedSkipList<K, V> {
    head: *mut Node<K, V>,
    tail: *mut Node<K, V>,
    config: SkipListConfig,
    len: AtomicUsize,
    node_gc: Reclaimer<Node<K, V>>,
    value_gc: Reclaimer<V>,
}

unsafe impl<K: Send, V: Send> Send for IndexedSkipList<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for IndexedSkipList<K, V> {}

impl<K, V> IndexedSkipList<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Default + Send + Sync,
{
    pub fn new(p: f64, max_level: usize) -> Result<Self> {
        Self::with_config(SkipListConfig::new(p, max_level)?)
    }

    pub fn with_config(config: SkipListConfig) -> Result<Self> {
        config.validate()?;
        let head = Node::new(Bound::NegInf, V::default(), config.max_level);
        let tail = Node::new(Bound::PosInf, V::default(), config.max_level);
        unsafe {
            for slot in (*head).next.iter() {
                slot.store(tail, Ordering::Relaxed);
            }
            (*head).fully_linked.store(true, Ordering::Relaxed);
            (*tail).fully_linked.store(true, Ordering::Relaxed);
        }
        Ok(Self {
            head,
            tail,
            node_gc: Reclaimer::new(config.reclaim_shards),
            value_gc: Reclaimer::new(config.reclaim_shards),
            config,
            len: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_preds_succs(&self, key: &K) -> (Vec<*mut Node<K, V>>, Vec<*mut Node<K, V>>) {
        let mut preds = vec![ptr::null_mut(); self.config.max_level];
        let mut succs = vec![ptr::null_mut(); self.config.max_level];
        let mut pred = self.head;
        for level in (0..self.config.max_level).rev() {
            unsafe {
                let mut cur = (*pred).next[level].load(Ordering::Acquire);
                while bound_lt(&(*cur).key, key) {
                    pred = cur;
                    cur = (*pred).next[level].load(Ordering::Acquire);
                }
                preds[level] = pred;
                succs[level] = cur;
            }
        }
        (preds, succs)
    }

    fn lock_unique<'a>(nodes: &[*mut Node<K, V>]) -> Vec<parking_lot::MutexGuard<'a, ()>> {
        let mut unique = Vec::with_capacity(nodes.len());
        for &n in nodes {
            if !unique.contains(&n) {
                unique.push(n);
            }
        }
        unique
            .into_iter()
            .map(|n| unsafe { (*n).mutex.lock() })
            .collect()
    }

    pub fn insert(&self, key: K, value: V) {
        loop {
            let (preds, succs) = self.find_preds_succs(&key);
            let candidate = succs[0];
            if bound_eq(unsafe { &(*candidate).key }, &key) {
                if unsafe { (*candidate).being_deleted.load(Ordering::Acquire) } {
                    continue;
                }
                while !unsafe { (*candidate).fully_linked.load(Ordering::Acquire) } {
                    std::hint::spin_loop();
                }
                let new_box = Box::into_raw(Box::new(value));
                let old = unsafe { (*candidate).value.swap(new_box, Ordering::AcqRel) };
                self.value_gc.retire(old);
                return;
            }

            let height = random_level(self.config.probability, self.config.max_level);
            let _guards = Self::lock_unique(&preds[..height]);

            let mut valid = true;
            for level in 0..height {
                unsafe {
                    valid &= !(*preds[level]).being_deleted.load(Ordering::Acquire)
                        && !(*succs[level]).being_deleted.load(Ordering::Acquire)
                        && (*preds[level]).next[level].load(Ordering::Acquire) == succs[level];
                }
            }
            if !valid {
                continue;
            }

            let new_node = Node::new(Bound::Value(key), value, height);
            for level in 0..height {
                unsafe {
                    (*new_node).next[level].store(succs[level], Ordering::Relaxed);
                }
            }
            for level in 0..height {
                unsafe {
                    (*preds[level]).next[level].store(new_node, Ordering::Release);
                }
            }
            unsafe {
                (*new_node).fully_linked.store(true, Ordering::Release);
            }
            self.len.fetch_add(1, Ordering::Relaxed);
            trace!(height, "indexed skiplist insert");
            return;
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut victim: *mut Node<K, V> = ptr::null_mut();
        let mut claimed = false;

        loop {
            let (preds, succs) = self.find_preds_succs(key);

            if !claimed {
                let candidate = succs[0];
                if !bound_eq(unsafe { &(*candidate).key }, key) {
                    return false;
                }
                if !unsafe { (*candidate).fully_linked.load(Ordering::Acquire) } {
                    continue;
                }
                if unsafe {
                    (*candidate)
                        .being_deleted
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                } {
                    return false;
                }
                victim = candidate;
                claimed = true;
            }

            let victim_height = unsafe { (*victim).height() };
            let mut lock_targets = preds[..victim_height].to_vec();
            lock_targets.push(victim);
            let _guards = Self::lock_unique(&lock_targets);

            let mut valid = true;
            for level in 0..victim_height {
                unsafe {
                    valid &= !(*preds[level]).being_deleted.load(Ordering::Acquire)
                        && (*preds[level]).next[level].load(Ordering::Acquire) == victim;
                }
            }
            if !valid {
                continue;
            }

            for level in (0..victim_height).rev() {
                unsafe {
                    let succ = (*victim).next[level].load(Ordering::Acquire);
                    (*preds[level]).next[level].store(succ, Ordering::Release);
                }
            }
            let old_value = unsafe { (*victim).value.load(Ordering::Acquire) };
            self.value_gc.retire(old_value);
            self.node_gc.retire(victim);
            self.len.fetch_sub(1, Ordering::Relaxed);
            return true;
        }
    }

    pub fn contains(&self, key: &K) -> Option<V> {
        let mut pred = self.head;
        for level in (0..self.config.max_level).rev() {
            unsafe {
                let mut cur = (*pred).next[level].load(Ordering::Acquire);
                while bound_lt(&(*cur).key, key) {
                    pred = cur;
                    cur = (*pred).next[level].load(Ordering::Acquire);
                }
            }
        }
        unsafe {
            let candidate = (*pred).next[0].load(Ordering::Acquire);
            if bound_eq(&(*candidate).key, key)
                && (*candidate).fully_linked.load(Ordering::Acquire)
                && !(*candidate).being_deleted.load(Ordering::Acquire)
            {
                let value_ptr = (*candidate).value.load(Ordering::Acquire);
                Some((*value_ptr).clone())
            } else {
                None
            }
        }
    }

    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::new();
        let mut cur = unsafe { (*self.head).next[0].load(Ordering::Acquire) };
        while cur != self.tail {
            unsafe {
                if !(*cur).being_deleted.load(Ordering::Acquire) {
                    out.push((*cur).key.as_value().expect("live node").clone());
                }
                cur = (*cur).next[0].load(Ordering::Acquire);
            }
        }
        out
    }

    /// Rebuilds every edge's span from scratch in one sequential pass.
    /// Requires no concurrent mutation while it runs and invalidates
    /// the previous spans for any insert/remove that happened since
    /// the last call.
    pub fn compute_indices(&self) {
        unsafe {
            (*self.head).cached_count.store(0, Ordering::Relaxed);
        }
        let mut cur = unsafe { (*self.head).next[0].load(Ordering::Relaxed) };
        let mut count = 0usize;
        while cur != self.tail {
            count += 1;
            unsafe {
                (*cur).cached_count.store(count, Ordering::Relaxed);
                cur = (*cur).next[0].load(Ordering::Relaxed);
            }
        }
        unsafe {
            (*self.tail).cached_count.store(count, Ordering::Relaxed);
        }

        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                let here = (*cur).cached_count.load(Ordering::Relaxed);
                for level in 0..(*cur).height() {
                    let next = (*cur).next[level].load(Ordering::Relaxed);
                    let there = (*next).cached_count.load(Ordering::Relaxed);
                    (*cur).spans[level].store(there - here, Ordering::Relaxed);
                }
                cur = (*cur).next[0].load(Ordering::Relaxed);
            }
        }
    }

    /// 0-based position of `key` among the list's sorted elements, as
    /// of the last `compute_indices()` call.
    pub fn rank(&self, key: &K) -> Option<usize> {
        let mut pred = self.head;
        let mut idx = 0usize;
        for level in (0..self.config.max_level).rev() {
            loop {
                let next = unsafe { (*pred).next[level].load(Ordering::Acquire) };
                if bound_lt(unsafe { &(*next).key }, key) {
                    idx += unsafe { (*pred).spans[level].load(Ordering::Relaxed) };
                    pred = next;
                } else {
                    break;
                }
            }
        }
        let candidate = unsafe { (*pred).next[0].load(Ordering::Acquire) };
        if bound_eq(unsafe { &(*candidate).key }, key) {
            Some(idx)
        } else {
            None
        }
    }

    /// The value at 0-based rank `r`, as of the last
    /// `compute_indices()` call.
    pub fn select(&self, r: usize) -> Option<V> {
        if r >= self.len() {
            return None;
        }
        let mut pred = self.head;
        let mut idx = 0usize;
        for level in (0..self.config.max_level).rev() {
            loop {
                let next = unsafe { (*pred).next[level].load(Ordering::Acquire) };
                let span = unsafe { (*pred).spans[level].load(Ordering::Relaxed) };
                if next != self.tail && idx + span <= r {
                    idx += span;
                    pred = next;
                } else {
                    break;
                }
            }
        }
        let candidate = unsafe { (*pred).next[0].load(Ordering::Acquire) };
        if idx == r {
            let value_ptr = unsafe { (*candidate).value.load(Ordering::Acquire) };
            Some(unsafe { (*value_ptr).clone() })
        } else {
            None
        }
    }

    /// Checks sorted order on every level plus, when spans have been
    /// computed, that every span matches the actual level-0 distance.
    pub fn is_consistent(&self) -> bool {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                for level in 0..(*cur).height() {
                    let next = (*cur).next[level].load(Ordering::Relaxed);
                    if !((*cur).key < (*next).key) {
                        return false;
                    }
                }
                cur = (*cur).next[0].load(Ordering::Relaxed);
            }
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        counts.insert(self.head as usize, 0);
        let mut cur = unsafe { (*self.head).next[0].load(Ordering::Relaxed) };
        let mut c = 0usize;
        while cur != self.tail {
            c += 1;
            counts.insert(cur as usize, c);
            cur = unsafe { (*cur).next[0].load(Ordering::Relaxed) };
        }
        counts.insert(self.tail as usize, c);

        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                for level in 0..(*cur).height() {
                    let next = (*cur).next[level].load(Ordering::Relaxed);
                    let expected = counts[&(next as usize)] - counts[&(cur as usize)];
                    if (*cur).spans[level].load(Ordering::Relaxed) != expected {
                        return false;
                    }
                }
                cur = (*cur).next[0].load(Ordering::Relaxed);
            }
        }
        true
    }
}

impl<K, V> Drop for IndexedSkipList<K, V> {
    fn drop(&mut self) {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                let next = (*cur).next[0].load(Ordering::Relaxed);
                drop(Box::from_raw((*cur).value.load(Ordering::Relaxed)));
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
        unsafe {
            drop(Box::from_raw((*self.tail).value.load(Ordering::Relaxed)));
            drop(Box::from_raw(self.tail));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rank_and_select_after_compute_indices() {
        let list: IndexedSkipList<i32, i32> = IndexedSkipList::new(0.5, 16).unwrap();
        for k in [40, 10, 30, 20, 0] {
            list.insert(k, k * 100);
        }
        list.compute_indices();
        for (expected_rank, key) in (0..).zip([0, 10, 20, 30, 40]) {
            assert_eq!(list.rank(&key), Some(expected_rank));
            assert_eq!(list.select(expected_rank), Some(key * 100));
        }
        assert_eq!(list.rank(&15), None);
        assert_eq!(list.select(5), None);
    }

    #[test]
    fn span_consistency_holds_after_compute_indices() {
        let list: IndexedSkipList<i32, i32> = IndexedSkipList::new(0.5, 16).unwrap();
        for k in 0..50 {
            list.insert(k, k);
        }
        list.remove(&10);
        list.remove(&20);
        list.compute_indices();
        assert!(list.is_consistent());
        assert_eq!(list.rank(&30), Some(28));
    }

    #[test]
    fn concurrent_inserts_then_indexed_reads() {
        let list = Arc::new(IndexedSkipList::<i32, i32>::new(0.5, 16).unwrap());
        let mut handles = vec![];
        for t in 0..4 {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    list.insert(t * 100 + i, t * 100 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        list.compute_indices();
        assert!(list.is_consistent());
        for r in 0..400 {
            assert_eq!(list.select(r), Some(r as i32));
        }
    }
}
