// End-to-end scenario: disjoint partitioned workload.
//
// 6 threads each own a disjoint partition of 0..100,000, insert their
// whole partition, then remove half of it. No two threads ever touch
// the same key, so there's nothing here for the locking protocol to
// arbitrate beyond proving it doesn't corrupt state under concurrent,
// non-overlapping writers.

use std::sync::Arc;
use std::thread;

use concurrent_skiplist::LockSkipList;

const KEY_COUNT: i32 = 100_000;
const THREADS: i32 = 6;

#[test]
fn disjoint_partitions_leave_exactly_the_unremoved_keys() {
    let list = Arc::new(LockSkipList::<i32, i32>::new(0.5, 32).unwrap());
    let partition_size = KEY_COUNT / THREADS;

    let mut handles = vec![];
    for t in 0..THREADS {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            let start = t * partition_size;
            let end = start + partition_size;
            for k in start..end {
                list.insert(k, k);
            }
            for k in start..end {
                if (k - start) % 2 == 0 {
                    assert!(list.remove(&k));
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert!(list.is_consistent());
    let expected: Vec<i32> = (0..THREADS)
        .flat_map(|t| {
            let start = t * partition_size;
            let end = start + partition_size;
            (start..end).filter(move |k| (k - start) % 2 != 0)
        })
        .collect();
    let mut expected_sorted = expected.clone();
    expected_sorted.sort_unstable();
    assert_eq!(list.keys(), expected_sorted);
    assert_eq!(list.len(), expected.len());
}
