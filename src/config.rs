use crate::error::{Result, SkipListError};

/// Tuning knobs shared by every skip list variant in this crate.
///
/// `probability` and `max_level` govern the geometric level
/// distribution ([`crate::rand_source::random_level`]); `reclaim_shards`
/// sizes the retirement queue used by the concurrent variants
/// ([`crate::reclaim::Reclaimer`]). The sequential variant ignores
/// `reclaim_shards` since it frees nodes immediately on removal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipListConfig {
    pub probability: f64,
    pub max_level: usize,
    pub reclaim_shards: usize,
}

impl SkipListConfig {
    pub fn new(probability: f64, max_level: usize) -> Result<Self> {
        let cfg = Self {
            probability,
            max_level,
            ..Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_shards(mut self, reclaim_shards: usize) -> Result<Self> {
        self.reclaim_shards = reclaim_shards;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.probability > 0.0 && self.probability < 1.0) {
            return Err(SkipListError::InvalidProbability(self.probability));
        }
        if self.max_level < 1 {
            return Err(SkipListError::InvalidMaxLevel(self.max_level));
        }
        if self.reclaim_shards < 1 {
            return Err(SkipListError::InvalidShardCount(self.reclaim_shards));
        }
        Ok(())
    }
}

/// LevelDB-style defaults: 1/4 branching factor keeps the expected
/// number of levels low without sacrificing much search depth.
impl Default for SkipListConfig {
    fn default() -> Self {
        Self {
            probability: 0.25,
            max_level: 32,
            reclaim_shards: 12,
        }
    }
}
