// Copyright (c) 2025 RustyDB Contributors
//
// Lock-free skip list (variant F).
//
// Every outgoing edge doubles as that node's own logical-deletion
// flag: `next[level]` is a `(successor, mark)` pair where `mark` means
// "this node is logically removed", not "the successor is removed".
// Deletion marks every level from the top down, with the bottom-level
// CAS as the linearization point — a thread that wins that CAS is the
// one that removed the key; everyone else sees `mark == true` and
// backs off. Traversal snips marked nodes it passes over via CAS, but
// only unlinks them — a node can appear on several levels, so only
// `remove`'s level-0 mark owner retires it, exactly once; a failed
// snip just restarts the whole descent from `head`.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::trace;

use crate::bound::{bound_eq, bound_lt, Bound};
use crate::config::SkipListConfig;
use crate::error::Result;
use crate::markable::MarkableAtomicPtr;
use crate::rand_source::random_level;
use crate::reclaim::Reclaimer;

#[repr(align(8))]
struct Node<K, V> {
    key: Bound<K>,
    value: AtomicPtr<V>,
    next: Box<[MarkableAtomicPtr<Node<K, V>>]>,
}

impl<K, V> Node<K, V> {
    fn new(key: Bound<K>, value: V, height: usize) -> *mut Self {
        let next = (0..height)
            .map(|_| MarkableAtomicPtr::null())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::into_raw(Box::new(Self {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next,
        }))
    }

    fn height(&self) -> usize {
        self.next.len()
    }
}

/// A sorted map backed by a lock-free skip list with marked forward
/// pointers.
pub struct LockFreeSkipList<K, V> {
    head: *mut Node<K, V>,
    tail: *mut Node<K, V>,
    config: SkipListConfig,
    len: AtomicUsize,
    node_gc: Reclaimer<Node<K, V>>,
    value_gc: Reclaimer<V>,
}

unsafe impl<K: Send, V: Send> Send for LockFreeSkipList<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for LockFreeSkipList<K, V> {}

impl<K, V> LockFreeSkipList<K, V>
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
                slot.store(tail, false, Ordering::Relaxed);
            }
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

    /// Descent that physically unlinks (but does not retire) any
    /// logically-deleted node it passes over. Restarts from `head`
    /// whenever a snip's CAS loses a race, which keeps the walk itself
    /// lock-free.
    fn find_preds_succs(&self, key: &K) -> (Vec<*mut Node<K, V>>, Vec<*mut Node<K, V>>) {
        'retry: loop {
            let mut preds = vec![ptr::null_mut(); self.config.max_level];
            let mut succs = vec![ptr::null_mut(); self.config.max_level];
            let mut pred = self.head;

            for level in (0..self.config.max_level).rev() {
                let mut cur = unsafe { (*pred).next[level].load(Ordering::Acquire).0 };

                loop {
                    let (succ, cur_marked) = unsafe { (*cur).next[level].load(Ordering::Acquire) };
                    if cur_marked {
                        match unsafe {
                            (*pred).next[level].compare_exchange(
                                (cur, false),
                                (succ, false),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                        } {
                            Ok(_) => {
                                cur = succ;
                                continue;
                            }
                            Err(_) => continue 'retry,
                        }
                    }
                    if bound_lt(unsafe { &(*cur).key }, key) {
                        pred = cur;
                        cur = succ;
                    } else {
                        break;
                    }
                }

                preds[level] = pred;
                succs[level] = cur;
            }

            return (preds, succs);
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let height = random_level(self.config.probability, self.config.max_level);
        let new_node = Node::new(Bound::Value(key.clone()), value, height);

        loop {
            let (preds, succs) = self.find_preds_succs(&key);
            let candidate = succs[0];

            if bound_eq(unsafe { &(*candidate).key }, &key) {
                let value_ptr = unsafe { (*new_node).value.load(Ordering::Acquire) };
                let old = unsafe { (*candidate).value.swap(value_ptr, Ordering::AcqRel) };
                self.value_gc.retire(old);
                unsafe {
                    drop(Box::from_raw(new_node));
                }
                return;
            }

            for level in 0..height {
                unsafe {
                    (*new_node).next[level].store(succs[level], false, Ordering::Relaxed);
                }
            }

            let linked = unsafe {
                (*preds[0]).next[0].compare_exchange(
                    (succs[0], false),
                    (new_node, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
            };
            if linked.is_err() {
                continue;
            }
            break;
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        trace!(height, "lock-free skiplist insert");

        for level in 1..height {
            loop {
                if unsafe { (*new_node).next[0].load(Ordering::Acquire).1 } {
                    // already logically removed before it finished rising
                    return;
                }
                let (preds, succs) = self.find_preds_succs(&key);
                unsafe {
                    (*new_node).next[level].store(succs[level], false, Ordering::Relaxed);
                }
                let raised = unsafe {
                    (*preds[level]).next[level].compare_exchange(
                        (succs[level], false),
                        (new_node, false),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                };
                if raised.is_ok() {
                    break;
                }
            }
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let (_, succs) = self.find_preds_succs(key);
        let candidate = succs[0];
        if !bound_eq(unsafe { &(*candidate).key }, key) {
            return false;
        }
        let height = unsafe { (*candidate).height() };

        for level in (1..height).rev() {
            loop {
                let (succ, marked) = unsafe { (*candidate).next[level].load(Ordering::Acquire) };
                if marked {
                    break;
                }
                if unsafe {
                    (*candidate).next[level]
                        .compare_exchange(
                            (succ, false),
                            (succ, true),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                } {
                    break;
                }
            }
        }

        loop {
            let (succ, marked) = unsafe { (*candidate).next[0].load(Ordering::Acquire) };
            if marked {
                return false;
            }
            if unsafe {
                (*candidate).next[0]
                    .compare_exchange(
                        (succ, false),
                        (succ, true),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            } {
                break;
            }
        }

        // Linearized: this thread is the level-0 mark owner. Physical
        // unlinking is left to the next traversal that passes over this
        // node (in `find_preds_succs`); retirement happens here, exactly
        // once, since only the owner reaches this point.
        let _ = self.find_preds_succs(key);
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.value_gc
            .retire(unsafe { (*candidate).value.load(Ordering::Acquire) });
        self.node_gc.retire(candidate);
        true
    }

    pub fn contains(&self, key: &K) -> Option<V> {
        let mut pred = self.head;
        for level in (0..self.config.max_level).rev() {
            let mut cur = unsafe { (*pred).next[level].load(Ordering::Acquire).0 };
            loop {
                let (succ, cur_marked) = unsafe { (*cur).next[level].load(Ordering::Acquire) };
                if cur_marked {
                    cur = succ;
                    continue;
                }
                if bound_lt(unsafe { &(*cur).key }, key) {
                    pred = cur;
                    cur = succ;
                } else {
                    break;
                }
            }
        }

        let candidate = unsafe { (*pred).next[0].load(Ordering::Acquire).0 };
        if bound_eq(unsafe { &(*candidate).key }, key) {
            let (_, marked) = unsafe { (*candidate).next[0].load(Ordering::Acquire) };
            if !marked {
                let value_ptr = unsafe { (*candidate).value.load(Ordering::Acquire) };
                return Some(unsafe { (*value_ptr).clone() });
            }
        }
        None
    }

    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::new();
        let mut cur = unsafe { (*self.head).next[0].load(Ordering::Acquire).0 };
        while cur != self.tail {
            unsafe {
                let (succ, marked) = (*cur).next[0].load(Ordering::Acquire);
                if !marked {
                    out.push((*cur).key.as_value().expect("live node").clone());
                }
                cur = succ;
            }
        }
        out
    }

    /// Checks sorted order on every level, treating marked nodes as
    /// already gone. Meaningful only at quiescence.
    pub fn is_consistent(&self) -> bool {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                for level in 0..(*cur).height() {
                    let (next, _) = (*cur).next[level].load(Ordering::Relaxed);
                    if !((*cur).key < (*next).key) {
                        return false;
                    }
                }
                cur = (*cur).next[0].load(Ordering::Relaxed).0;
            }
        }
        true
    }
}

impl<K, V> Drop for LockFreeSkipList<K, V> {
    fn drop(&mut self) {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                let next = (*cur).next[0].load(Ordering::Relaxed).0;
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
        let list: LockFreeSkipList<i32, i32> = LockFreeSkipList::new(0.5, 16).unwrap();
        list.insert(1, 10);
        list.insert(2, 20);
        assert_eq!(list.contains(&1), Some(10));
        assert_eq!(list.contains(&2), Some(20));
        assert_eq!(list.contains(&3), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let list: LockFreeSkipList<i32, &str> = LockFreeSkipList::new(0.5, 16).unwrap();
        list.insert(1, "one");
        list.insert(1, "uno");
        assert_eq!(list.contains(&1), Some("uno"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_then_absent() {
        let list: LockFreeSkipList<i32, i32> = LockFreeSkipList::new(0.5, 16).unwrap();
        list.insert(5, 50);
        assert!(list.remove(&5));
        assert_eq!(list.contains(&5), None);
        assert!(!list.remove(&5));
    }

    #[test]
    fn keys_are_sorted() {
        let list: LockFreeSkipList<i32, i32> = LockFreeSkipList::new(0.5, 16).unwrap();
        for k in [5, 1, 4, 2, 3] {
            list.insert(k, k);
        }
        assert_eq!(list.keys(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn concurrent_inserts_of_disjoint_keys_all_land() {
        let list = Arc::new(LockFreeSkipList::<i32, i32>::new(0.5, 16).unwrap());
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
    fn concurrent_mark_interleaving_on_shared_keys() {
        let list = Arc::new(LockFreeSkipList::<i32, i32>::new(0.5, 16).unwrap());
        for k in 0..200 {
            list.insert(k, k);
        }
        let mut handles = vec![];
        for _ in 0..4 {
            let list = Arc::clone(&list);
            handles.push(thread::spawn(move || {
                for k in 0..200 {
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
