//! Shuffle Engine
//!
//! Two-level constrained randomization of logical units: question blocks are
//! permuted inside each unit behind its fixed header/passage prefix, then the
//! units themselves are permuted. A single seeded RNG drives both levels so
//! the result is reproducible for a given seed and input order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::detection::Label;
use crate::grouping::{Component, LogicalUnit};

/// Seeded two-level shuffler
#[derive(Debug, Clone)]
pub struct ShuffleEngine {
    seed: u64,
    rng: StdRng,
}

impl ShuffleEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Drop footer units, shuffle question blocks within each unit, then
    /// shuffle the unit order.
    pub fn shuffle(&mut self, units: Vec<LogicalUnit>) -> Vec<LogicalUnit> {
        let before = units.len();
        let mut kept: Vec<LogicalUnit> = units
            .into_iter()
            .filter(|unit| *unit.first_label() != Label::Footer)
            .filter_map(|unit| self.shuffle_within(unit))
            .collect();
        kept.shuffle(&mut self.rng);

        debug!(
            "Shuffled {} units ({} footer units dropped) with seed {}",
            kept.len(),
            before - kept.len(),
            self.seed
        );
        kept
    }

    fn shuffle_within(&mut self, unit: LogicalUnit) -> Option<LogicalUnit> {
        let (mut pool, fixed_prefix): (Vec<Component>, Vec<Component>) = unit
            .into_components()
            .into_iter()
            .partition(|c| c.label == Label::QuestionBlock);
        pool.shuffle(&mut self.rng);

        let mut components = fixed_prefix;
        components.extend(pool);
        LogicalUnit::new(components)
    }
}

/// Shuffle `units` with a fresh engine seeded by `seed`
pub fn shuffle_units(units: Vec<LogicalUnit>, seed: u64) -> Vec<LogicalUnit> {
    ShuffleEngine::new(seed).shuffle(units)
}
