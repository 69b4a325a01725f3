// Randomness oracle: thread-local level sampling and bucket selection.
//
// Backed by `rand`'s thread-local generator rather than a hand-rolled
// PRNG — the teacher's `concurrent/skiplist.rs` rolls its own xorshift
// for this, but `rand` is already a direct dependency of the monorepo
// and nothing else reaches for xorshift, so there's no reason to
// duplicate it here.

use rand::Rng;

/// Returns `k = 1 + (number of Bernoulli(p) successes)`, capped at
/// `max_level`. This is the standard skip-list level distribution:
/// level `k` is reached with probability `p^(k-1)`.
pub fn random_level(p: f64, max_level: usize) -> usize {
    debug_assert!(p > 0.0 && p < 1.0);
    debug_assert!(max_level >= 1);

    let mut level = 1;
    let mut rng = rand::rng();
    while level < max_level && rng.random_bool(p) {
        level += 1;
    }
    level
}

/// Uniform integer in `[0, m)`, used to pick a reclamation shard.
pub fn random_bucket(m: usize) -> usize {
    debug_assert!(m >= 1);
    rand::rng().random_range(0..m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_level_stays_in_bounds() {
        for _ in 0..10_000 {
            let level = random_level(0.5, 8);
            assert!((1..=8).contains(&level));
        }
    }

    #[test]
    fn random_level_one_cap_always_returns_one() {
        for _ in 0..100 {
            assert_eq!(random_level(0.9, 1), 1);
        }
    }

    #[test]
    fn random_bucket_stays_in_bounds() {
        for _ in 0..10_000 {
            assert!(random_bucket(12) < 12);
        }
    }
}
