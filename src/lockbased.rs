// Copyright (c) 2025 RustyDB Contributors
//
// Fine-grained lock-based skip list (variant L).
//
// Reads are wait-free: `contains`, `keys`, and the traversal portion
// of `insert`/`remove` never take a lock, only atomic loads. Writers
// use optimistic validation — find the insertion point lock-free, lock
// just the predecessors that are about to change, revalidate under the
// lock, then link. `being_deleted` is a sticky flag: once a remove
// claims a node (via a successful CAS from `false` to `true`), no
// other remove can claim it, and readers that observe it set treat the
// node as logically absent even before it's physically unlinked.

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
        Box::into_raw(Box::new(Self {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next,
            mutex: Mutex::new(()),
            being_deleted: AtomicBool::new(false),
            fully_linked: AtomicBool::new(false),
        }))
    }

    fn height(&self) -> usize {
        self.next.len()
    }
}

/// A sorted map backed by a fine-grained lock-based skip list.
///
/// Safe to share across threads behind an `Arc`; every method takes
/// `&self`.
pub struct LockSkipList<K, V> {
    head: *mut Node<K, V>,
    tail: *mut Node<K, V>,
    config: SkipListConfig,
    len: AtomicUsize,
    node_gc: Reclaimer<Node<K, V>>,
    value_gc: Reclaimer<V>,
}

unsafe impl<K: Send, V: Send> Send for LockSkipList<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for LockSkipList<K, V> {}

impl<K, V> LockSkipList<K, V>
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

    /// Lock-free descent recording, at each level, the last node
    /// strictly less than `key` (`preds`) and its current successor
    /// (`succs`). Safe to call concurrently with writers; the result
    /// is a snapshot that callers must revalidate before mutating.
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
            trace!(height, "lock skiplist insert");
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
                        .compare_exchange(
                            false,
                            true,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
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

    /// Checks sorted order on every level. Meaningful only when called
    /// with no concurrent writers in flight.
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
        true
    }
}

impl<K, V> Drop for LockSkipList<K, V> {
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
    fn insert_and_contains() {
        let list: LockSkipList<i32, i32> = LockSkipList::new(0.5, 16).unwrap();
        list.insert(1, 10);
        list.insert(2, 20);
        assert_eq!(list.contains(&1), Some(10));
        assert_eq!(list.contains(&2), Some(20));
        assert_eq!(list.contains(&3), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let list: LockSkipList<i32, &str> = LockSkipList::new(0.5, 16).unwrap();
        list.insert(1, "one");
        list.insert(1, "uno");
        assert_eq!(list.contains(&1), Some("uno"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_then_absent() {
        let list: LockSkipList<i32, i32> = LockSkipList::new(0.5, 16).unwrap();
        list.insert(5, 50);
        assert!(list.remove(&5));
        assert_eq!(list.contains(&5), None);
        assert!(!list.remove(&5));
    }

    #[test]
    fn keys_are_sorted() {
        let list: LockSkipList<i32, i32> = LockSkipList::new(0.5, 16).unwrap();
        for k in [5, 1, 4, 2, 3] {
            list.insert(k, k);
        }
        assert_eq!(list.keys(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_inserts_of_disjoint_keys_all_land() {
        let list = Arc::new(LockSkipList::<i32, i32>::new(0.5, 16).unwrap());
        let mut handles = vec![];
        for t in 0..8 {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let key = t * 200 + i;
                    list.insert(key, key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(list.len(), 1600);
        assert!(list.is_consistent());
        for k in 0..1600 {
            assert_eq!(list.contains(&k), Some(k));
        }
    }

    #[test]
    fn concurrent_insert_and_remove_on_shared_keys() {
        let list = Arc::new(LockSkipList::<i32, i32>::new(0.5, 16).unwrap());
        for k in 0..100 {
            list.insert(k, k);
        }
        let mut handles = vec![];
        for _ in 0..4 {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for k in 0..100 {
                    list.remove(&k);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(list.is_empty());
        assert!(list.is_consistent());
    }
}
