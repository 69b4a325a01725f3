// End-to-end scenario: lock-free mark interleaving.
//
// Two threads race to remove the same key. Exactly one of them wins
// the bottom-level mark CAS (the linearization point) and reports
// success; the other observes the mark already set and reports
// absence. Either way the key is gone once both have returned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use concurrent_skiplist::LockFreeSkipList;

#[test]
fn exactly_one_racing_remove_wins() {
    for trial in 0..200 {
        let list = Arc::new(LockFreeSkipList::<i32, i32>::new(0.5, 16).unwrap());
        list.insert(trial, trial);

        let barrier = Arc::new(Barrier::new(2));
        let successes = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..2 {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            handles.push(thread::spawn(move || {
                barrier.wait();
                if list.remove(&trial) {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(list.contains(&trial), None);
        assert!(list.is_empty());
    }
}
