// Copyright (c) 2025 RustyDB Contributors
//
// Sequential skip list — the single-threaded baseline (variant S).
//
// No atomics, no locks: this is the reference against which the
// concurrent variants' linearizable behavior is checked. Traversal and
// mutation both run under `&mut self`, so there's nothing to
// synchronize.

use tracing::trace;

use crate::bound::{bound_eq, bound_lt, Bound};
use crate::config::SkipListConfig;
use crate::error::Result;
use crate::rand_source::random_level;

struct Node<K, V> {
    key: Bound<K>,
    value: V,
    next: Box<[*mut Node<K, V>]>,
}

impl<K, V> Node<K, V> {
    fn height(&self) -> usize {
        self.next.len()
    }

    fn boxed(key: Bound<K>, value: V, height: usize) -> *mut Self {
        Box::into_raw(Box::new(Self {
            key,
            value,
            next: vec![std::ptr::null_mut(); height].into_boxed_slice(),
        }))
    }
}

/// A sorted map backed by a single-threaded skip list.
pub struct SeqSkipList<K, V> {
    head: *mut Node<K, V>,
    tail: *mut Node<K, V>,
    config: SkipListConfig,
    len: usize,
}

impl<K: Ord + Clone, V: Clone + Default> SeqSkipList<K, V> {
    pub fn new(p: f64, max_level: usize) -> Result<Self> {
        Self::with_config(SkipListConfig::new(p, max_level)?)
    }

    pub fn with_config(config: SkipListConfig) -> Result<Self> {
        config.validate()?;
        let head = Node::boxed(Bound::NegInf, V::default(), config.max_level);
        let tail = Node::boxed(Bound::PosInf, V::default(), config.max_level);
        unsafe {
            for slot in (*head).next.iter_mut() {
                *slot = tail;
            }
        }
        Ok(Self {
            head,
            tail,
            config,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Top-down descent recording, at each level, the rightmost node
    /// whose key is still less than `key`.
    fn find_preds(&self, key: &K) -> Vec<*mut Node<K, V>> {
        let mut preds = vec![std::ptr::null_mut(); self.config.max_level];
        let mut pred = self.head;
        for level in (0..self.config.max_level).rev() {
            unsafe {
                let mut next = (*pred).next[level];
                while bound_lt(&(*next).key, key) {
                    pred = next;
                    next = (*pred).next[level];
                }
            }
            preds[level] = pred;
        }
        preds
    }

    pub fn insert(&mut self, key: K, value: V) {
        let preds = self.find_preds(&key);
        unsafe {
            let successor = (*preds[0]).next[0];
            if bound_eq(&(*successor).key, &key) {
                (*successor).value = value;
                return;
            }
        }

        let height = random_level(self.config.probability, self.config.max_level);
        let new_node = Node::boxed(Bound::Value(key), value, height);
        for level in 0..height {
            unsafe {
                (*new_node).next[level] = (*preds[level]).next[level];
                (*preds[level]).next[level] = new_node;
            }
        }
        self.len += 1;
        trace!(height, "seq skiplist insert");
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let preds = self.find_preds(key);
        let victim = unsafe { (*preds[0]).next[0] };
        if !bound_eq(unsafe { &(*victim).key }, key) {
            return false;
        }

        let victim_height = unsafe { (*victim).height() };
        for level in 0..victim_height {
            unsafe {
                (*preds[level]).next[level] = (*victim).next[level];
            }
        }
        unsafe {
            drop(Box::from_raw(victim));
        }
        self.len -= 1;
        true
    }

    pub fn contains(&self, key: &K) -> Option<V> {
        let mut cur = self.head;
        for level in (0..self.config.max_level).rev() {
            unsafe {
                while bound_lt(&(*(*cur).next[level]).key, key) {
                    cur = (*cur).next[level];
                }
            }
        }
        unsafe {
            let candidate = (*cur).next[0];
            if bound_eq(&(*candidate).key, key) {
                Some((*candidate).value.clone())
            } else {
                None
            }
        }
    }

    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = unsafe { (*self.head).next[0] };
        while cur != self.tail {
            unsafe {
                out.push((*cur).key.as_value().expect("live node").clone());
                cur = (*cur).next[0];
            }
        }
        out
    }

    pub fn is_consistent(&self) -> bool {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                for level in 0..(*cur).height() {
                    if !((*cur).key < (*(*cur).next[level]).key) {
                        return false;
                    }
                }
                cur = (*cur).next[0];
            }
        }
        true
    }
}

impl<K, V> Drop for SeqSkipList<K, V> {
    fn drop(&mut self) {
        let mut cur = self.head;
        while cur != self.tail {
            unsafe {
                let next = (*cur).next[0];
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
        unsafe {
            drop(Box::from_raw(self.tail));
        }
    }
}
