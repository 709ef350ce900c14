//! Planner configuration. One struct covers every knob; the planner
//! variants in older designs are just different values of this.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::NO_MENU_MASK;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Target size of the future pool.
    pub num_futures: usize,
    /// How many of the pool's futures are sampled by motif weight; the
    /// rest are uniform, to preserve exploration.
    pub num_weighted: usize,
    /// Futures dropped each round by worst accumulated total.
    pub drop_futures: usize,
    pub min_future_len: usize,
    pub max_future_len: usize,
    /// Pin a checkpoint every this many committed inputs.
    pub checkpoint_every: usize,
    /// Feed the objective observation history every this many inputs.
    pub observe_every: usize,
    /// Attempt a backtrack every this many rounds; 0 disables.
    pub backtrack_every: u64,
    /// A checkpoint must be at least this far behind the present to be
    /// a backtrack target.
    pub min_backtrack_distance: usize,
    /// Motif reweighting damping factor, in (0, 1).
    pub alpha: f64,
    /// No motif's weight may exceed this fraction of the pool total.
    pub motif_max_frac: f64,
    /// When decreasing, no motif's weight falls below this fraction.
    pub motif_min_frac: f64,
    /// Applied to every proposed input byte.
    pub input_mask: u8,
    pub cache_limit: usize,
    pub cache_slop: usize,
    /// Write movie and motif artifacts every this many rounds.
    pub save_every: u64,
    /// Replacements kept per improvement request.
    pub max_best: u32,
    /// Iteration budget per improvement request.
    pub improve_iters: u32,
    /// Seed label for the planner's own RNG.
    pub seed: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            num_futures: 34,
            num_weighted: 30,
            drop_futures: 7,
            min_future_len: 50,
            max_future_len: 800,
            checkpoint_every: 100,
            observe_every: 10,
            backtrack_every: 18,
            min_backtrack_distance: 300,
            alpha: 0.8,
            motif_max_frac: 0.1,
            motif_min_frac: 1e-5,
            input_mask: NO_MENU_MASK,
            cache_limit: 100_000,
            cache_slop: 10_000,
            save_every: 10,
            max_best: 10,
            improve_iters: 200,
            seed: "pilot".to_string(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, anyhow::Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
