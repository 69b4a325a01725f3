use thiserror::Error;

/// Errors raised while configuring a skip list.
///
/// Map operations themselves (`insert`, `remove`, `contains`, ...) are
/// infallible once a list is constructed; the only failure mode this
/// crate surfaces is an invalid configuration at construction time.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SkipListError {
    #[error("level probability must lie in (0, 1), got {0}")]
    InvalidProbability(f64),

    #[error("max_level must be at least 1, got {0}")]
    InvalidMaxLevel(usize),

    #[error("reclamation shard count must be at least 1, got {0}")]
    InvalidShardCount(usize),
}

pub type Result<T> = std::result::Result<T, SkipListError>;
