// Copyright (c) 2025 RustyDB Contributors
//
// Concurrent ordered-map skip lists.
//
// Four variants sharing the same randomness oracle, sentinel-keyed
// traversal, and shard-at-teardown reclamation, but genuinely
// different concurrency disciplines — no trait unifies them, the same
// way their originals share no common base class:
//
// - [`SeqSkipList`]: single-threaded baseline, `&mut self`.
// - [`LockSkipList`]: fine-grained per-node locking, optimistic
//   validation, wait-free reads.
// - [`LockFreeSkipList`]: marked forward pointers, CAS-only writers.
// - [`IndexedSkipList`]: lock-based plus span-augmented `rank`/`select`.

mod bound;
mod config;
mod error;
mod indexed;
mod lockbased;
mod lockfree;
mod markable;
mod rand_source;
mod reclaim;
mod seq;

pub use config::SkipListConfig;
pub use error::{Result, SkipListError};
pub use indexed::IndexedSkipList;
pub use lockbased::LockSkipList;
pub use lockfree::LockFreeSkipList;
pub use seq::SeqSkipList;
