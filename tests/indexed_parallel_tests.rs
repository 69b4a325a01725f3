// End-to-end scenario: indexed parallel.
//
// 6 threads insert a shuffled 0..100,000 into the indexed variant;
// once quiesced, a single `compute_indices()` call makes `rank`/
// `select` valid, then 6 threads query them concurrently (reads only,
// so no further synchronization is needed for that phase).

use std::sync::Arc;
use std::thread;

use concurrent_skiplist::IndexedSkipList;

const KEY_COUNT: i32 = 100_000;
const THREADS: i32 = 6;

fn lcg_shuffle(n: i32, seed: u64) -> Vec<i32> {
    let mut order: Vec<i32> = (0..n).collect();
    let mut state = seed;
    for i in (1..order.len()).rev() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        order.swap(i, j);
    }
    order
}

#[test]
fn indexed_parallel_rank_and_select() {
    let list = Arc::new(IndexedSkipList::<i32, i32>::new(0.5, 32).unwrap());

    let shuffled = lcg_shuffle(KEY_COUNT, 42);
    let chunk_size = shuffled.len() / THREADS as usize;
    let mut handles = vec![];
    for chunk in shuffled.chunks(chunk_size).map(|c| c.to_vec()) {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            for k in chunk {
                list.insert(k, k);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    list.compute_indices();
    assert!(list.is_consistent());

    let mut handles = vec![];
    for t in 0..THREADS {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            let start = t * (KEY_COUNT / THREADS);
            let end = start + (KEY_COUNT / THREADS);
            for k in start..end {
                assert_eq!(list.rank(&k), Some(k as usize));
                assert_eq!(list.select(k as usize), Some(k));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}
