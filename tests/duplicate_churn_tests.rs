// End-to-end scenario: duplicate churn.
//
// Per thread: insert k, then insert k four more times (each an
// overwrite), contains still finds the latest value, one remove
// succeeds, five subsequent removes all report absence.

use std::sync::Arc;
use std::thread;

use concurrent_skiplist::LockSkipList;

#[test]
fn duplicate_churn_per_key() {
    let list = Arc::new(LockSkipList::<i32, i32>::new(0.5, 16).unwrap());

    let mut handles = vec![];
    for t in 0..8 {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            let k = t;
            for attempt in 0..5 {
                list.insert(k, k * 10 + attempt);
            }
            assert_eq!(list.contains(&k), Some(k * 10 + 4));

            assert!(list.remove(&k));
            for _ in 0..5 {
                assert!(!list.remove(&k));
            }
            assert_eq!(list.contains(&k), None);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(list.is_empty());
    assert!(list.is_consistent());
}
