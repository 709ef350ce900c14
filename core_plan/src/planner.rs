//! The round-by-round planning loop: propose, score, commit, evolve,
//! and periodically backtrack.

use std::path::PathBuf;

use plan_proto::{ScoreRequest, WorkRequest, WorkResponse};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::backtrack;
use crate::cache::StateCache;
use crate::codec;
use crate::config::PlannerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::hashing::seed_from_label;
use crate::motifs::Motifs;
use crate::movie::Movie;
use crate::objectives::WeightedObjectives;
use crate::scoring::{self, EvalContext};

/// One speculative lookahead sequence in the pool.
struct FuturePlan {
    inputs: Vec<u8>,
    /// Sampled by motif weight rather than uniformly.
    weighted: bool,
    /// Individually randomized target length; the future is re-extended
    /// back to this after each round chops its head.
    desired_len: usize,
}

pub struct Planner<E: Engine> {
    config: PlannerConfig,
    engine: E,
    cache: StateCache,
    objectives: WeightedObjectives,
    motifs: Motifs,
    movie: Movie,
    futures: Vec<FuturePlan>,
    /// Codec basis, captured from the engine's genesis state. Workers
    /// capture the same basis from their own engines.
    basis: Vec<u8>,
    dispatcher: Dispatcher,
    rng: ChaCha8Rng,
    round: u64,
    rounds_until_backtrack: u64,
    movie_path: PathBuf,
    motifs_path: PathBuf,
}

/// Append whole motifs until the future reaches its target length.
fn extend_future(
    future: &mut FuturePlan,
    motifs: &mut Motifs,
    rng: &mut ChaCha8Rng,
    mask: u8,
) {
    while future.inputs.len() < future.desired_len {
        let motif = if future.weighted {
            motifs.pick(rng)
        } else {
            motifs.random_motif_with(rng).to_vec()
        };
        future.inputs.extend(motif.iter().map(|&b| b & mask));
    }
}

impl<E: Engine> Planner<E> {
    pub fn new(
        config: PlannerConfig,
        engine: E,
        objectives: WeightedObjectives,
        motifs: Motifs,
        dispatcher: Dispatcher,
        movie_path: PathBuf,
        motifs_path: PathBuf,
    ) -> Self {
        let basis = engine.save();
        let cache = StateCache::new(config.cache_limit, config.cache_slop);
        let rng = ChaCha8Rng::seed_from_u64(seed_from_label(&config.seed));
        let rounds_until_backtrack = config.backtrack_every;
        let mut planner = Self {
            config,
            engine,
            cache,
            objectives,
            motifs,
            movie: Movie::new(),
            futures: Vec::new(),
            basis,
            dispatcher,
            rng,
            round: 0,
            rounds_until_backtrack,
            movie_path,
            motifs_path,
        };
        planner.populate_futures();
        planner
    }

    pub fn movie(&self) -> &Movie {
        &self.movie
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Replay a mandatory prefix (menu navigation and the like). Every
    /// replayed input is final: the watermark rises past it.
    pub fn warm_start(&mut self, inputs: &[u8]) {
        for &input in inputs {
            self.cache.step(&mut self.engine, input);
            self.movie.push(input, "warm");
        }
        self.movie.raise_watermark();
        let state = codec::encode(&self.engine.save(), Some(&self.basis));
        self.movie.push_checkpoint(state);
        self.objectives.observe(&self.engine.read_memory());
        log::info!("warm start replayed {} inputs", inputs.len());
    }

    /// Run planning rounds until the count is reached, or forever when
    /// none is given.
    pub fn run(&mut self, rounds: Option<u64>) -> anyhow::Result<()> {
        loop {
            if let Some(limit) = rounds {
                if self.round >= limit {
                    break;
                }
            }
            self.step_round()?;
            if self.config.save_every != 0 && self.round % self.config.save_every == 0 {
                self.save_progress()?;
            }
        }
        self.save_progress()?;
        Ok(())
    }

    fn step_round(&mut self) -> anyhow::Result<()> {
        self.round += 1;
        let mask = self.config.input_mask;
        let mut candidates = self.motifs.all_motifs();
        for candidate in &mut candidates {
            for b in candidate.iter_mut() {
                *b &= mask;
            }
        }
        candidates.shuffle(&mut self.rng);

        let annotation = format!("r{}", self.round);
        let best = self.take_best_among(&candidates, &annotation, true);
        log::info!(
            "round {}: movie {} inputs, best total {:.3}",
            self.round,
            self.movie.len(),
            best
        );

        self.maybe_backtrack()?;
        Ok(())
    }

    /// Fan work units out, computing locally when no workers exist.
    fn dispatch_units(&mut self, requests: &[WorkRequest]) -> Vec<WorkResponse> {
        let Self {
            engine,
            cache,
            objectives,
            motifs,
            basis,
            dispatcher,
            ..
        } = self;
        let mut local = |req: &WorkRequest| {
            let mut ctx = EvalContext {
                engine: &mut *engine,
                cache: &mut *cache,
                objectives: &*objectives,
                basis: Some(basis.as_slice()),
            };
            scoring::execute(&mut ctx, &*motifs, req)
                .expect("locally produced state failed to decode")
        };
        dispatcher.run(requests, &mut local)
    }

    /// Score every candidate against the future pool, commit the
    /// winner, and (unless `evolve` is off) slide the pool forward.
    /// Ties go to the earliest candidate. Returns the winner's total.
    fn take_best_among(&mut self, candidates: &[Vec<u8>], annotation: &str, evolve: bool) -> f64 {
        assert!(!candidates.is_empty(), "no candidates to choose from");
        let start_raw = self.engine.save();
        let start_encoded = codec::encode(&start_raw, Some(&self.basis));
        let pool: Vec<Vec<u8>> = self.futures.iter().map(|f| f.inputs.clone()).collect();
        let requests: Vec<WorkRequest> = candidates
            .iter()
            .map(|candidate| {
                WorkRequest::Score(ScoreRequest {
                    current_state: start_encoded.clone(),
                    candidate: candidate.clone(),
                    futures: pool.clone(),
                })
            })
            .collect();
        let responses = self.dispatch_units(&requests);

        let mut future_totals = vec![0.0f64; self.futures.len()];
        let mut best_idx = 0usize;
        let mut best_total = f64::NEG_INFINITY;
        for (i, response) in responses.iter().enumerate() {
            let WorkResponse::Score(score) = response else {
                panic!("score unit {} answered with the wrong kind", i);
            };
            for (total, s) in future_totals.iter_mut().zip(&score.future_scores) {
                *total += s;
            }
            let total = score.immediate_score + score.futures_score;
            if total > best_total {
                best_total = total;
                best_idx = i;
            }
        }

        // Workers and the local fallback both moved the engine; replay
        // the winner from the round's start state.
        self.engine.load(&start_raw);
        let start_mem = self.engine.read_memory();
        let winner = candidates[best_idx].clone();
        for &input in &winner {
            self.cache.step(&mut self.engine, input);
            self.movie.push(input, annotation);
            if self.config.checkpoint_every != 0
                && self.movie.len() % self.config.checkpoint_every == 0
            {
                let state = codec::encode(&self.engine.save(), Some(&self.basis));
                self.movie.push_checkpoint(state);
            }
            if self.config.observe_every != 0 && self.movie.len() % self.config.observe_every == 0
            {
                self.objectives.observe(&self.engine.read_memory());
            }
        }
        let new_mem = self.engine.read_memory();

        // The only online learning signal: did committing this motif
        // move us up or down the observed value distribution?
        if self.motifs.is_motif(&winner) {
            let improved = self.objectives.normalized_value(&new_mem)
                > self.objectives.normalized_value(&start_mem);
            self.motifs.reweight(
                &winner,
                improved,
                self.config.alpha,
                self.config.motif_max_frac,
                self.config.motif_min_frac,
            );
        }

        if evolve {
            self.evolve_futures(winner.len(), future_totals);
        }
        best_total
    }

    /// Slide the pool: chop the committed length off every head, drop
    /// the worst accumulated performers, replenish to the target size.
    fn evolve_futures(&mut self, committed: usize, mut totals: Vec<f64>) {
        for future in &mut self.futures {
            let n = committed.min(future.inputs.len());
            future.inputs.drain(..n);
        }
        for _ in 0..self.config.drop_futures {
            if self.futures.is_empty() {
                break;
            }
            let worst = totals
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .expect("non-empty by loop guard");
            // Remove from both in tandem so indices stay aligned.
            self.futures.remove(worst);
            totals.remove(worst);
        }
        self.populate_futures();
    }

    fn populate_futures(&mut self) {
        let Self {
            futures,
            motifs,
            rng,
            config,
            ..
        } = self;
        let mask = config.input_mask;
        for future in futures.iter_mut() {
            extend_future(future, motifs, rng, mask);
        }
        while futures.len() < config.num_futures {
            let weighted = futures.iter().filter(|f| f.weighted).count() < config.num_weighted;
            let desired_len = rng.gen_range(config.min_future_len..=config.max_future_len);
            let mut future = FuturePlan {
                inputs: Vec::new(),
                weighted,
                desired_len,
            };
            extend_future(&mut future, motifs, rng, mask);
            futures.push(future);
        }
    }

    /// Every `backtrack_every` rounds, try to retroactively replace the
    /// span since a recent checkpoint with something better.
    fn maybe_backtrack(&mut self) -> anyhow::Result<()> {
        if self.config.backtrack_every == 0 {
            return Ok(());
        }
        self.rounds_until_backtrack -= 1;
        if self.rounds_until_backtrack > 0 {
            return Ok(());
        }
        self.rounds_until_backtrack = self.config.backtrack_every;

        let Some(cp) = self
            .movie
            .recent_checkpoint(self.config.min_backtrack_distance)
        else {
            log::debug!("no eligible checkpoint to backtrack to");
            return Ok(());
        };
        let cp_state = cp.state.clone();
        let cp_len = cp.movie_len;
        let segment: Vec<u8> = self.movie.inputs()[cp_len..].to_vec();
        let end_encoded = codec::encode(&self.engine.save(), Some(&self.basis));

        let requests = backtrack::improve_requests(
            &cp_state,
            &end_encoded,
            &segment,
            cp_len,
            self.config.improve_iters,
            self.config.max_best,
        );
        let responses = self.dispatch_units(&requests);

        // The original segment competes on equal footing, first so a
        // full tie keeps the movie unchanged.
        let mut candidates: Vec<Vec<u8>> = vec![segment.clone()];
        for response in responses {
            let WorkResponse::Improve(improve) = response else {
                panic!("improve unit answered with the wrong kind");
            };
            for replacement in improve.replacements {
                if !candidates.contains(&replacement.inputs) {
                    candidates.push(replacement.inputs);
                }
            }
        }
        if candidates.len() == 1 {
            log::info!("backtrack at {}: no improvements found", cp_len);
            return Ok(());
        }

        // Snapshot before splicing so a crash mid-splice loses nothing.
        self.save_progress()?;

        let raw = codec::decode(&cp_state, Some(&self.basis))
            .expect("checkpoint state failed to decode");
        self.engine.load(&raw);
        self.movie.rewind(cp_len);
        let annotation = format!("bt{}", cp_len);
        self.take_best_among(&candidates, &annotation, false);
        log::info!(
            "backtrack at {}: segment of {} inputs respliced as {}",
            cp_len,
            segment.len(),
            self.movie.len() - cp_len
        );
        self.save_progress()
    }

    fn save_progress(&mut self) -> anyhow::Result<()> {
        self.motifs.record_weights(self.movie.len());
        self.movie.write_to_file(&self.movie_path)?;
        self.motifs.save_to_file(&self.motifs_path)?;
        self.cache.log_stats();
        self.motifs.log_stats();
        log::info!(
            "progress saved: {} inputs to {}",
            self.movie.len(),
            self.movie_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toy::ToyEngine;

    fn small_config() -> PlannerConfig {
        PlannerConfig {
            num_futures: 4,
            num_weighted: 3,
            drop_futures: 1,
            min_future_len: 4,
            max_future_len: 8,
            checkpoint_every: 5,
            observe_every: 3,
            backtrack_every: 0,
            min_backtrack_distance: 10,
            cache_limit: 200,
            cache_slop: 20,
            save_every: 0,
            improve_iters: 10,
            seed: "test".to_string(),
            ..PlannerConfig::default()
        }
    }

    fn make_planner(dir: &std::path::Path, config: PlannerConfig) -> Planner<ToyEngine> {
        let objectives = WeightedObjectives::new(vec![(1.0, vec![2]), (0.5, vec![3])]);
        let motifs = Motifs::new(vec![vec![0x80; 4], vec![0x40; 4], vec![0x00; 4]]);
        Planner::new(
            config,
            ToyEngine::new(),
            objectives,
            motifs,
            Dispatcher::new(vec![]),
            dir.join("out.movie"),
            dir.join("out.motifs"),
        )
    }

    #[test]
    fn future_pool_respects_size_and_length_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let planner = make_planner(dir.path(), small_config());
        assert_eq!(planner.futures.len(), 4);
        assert_eq!(planner.futures.iter().filter(|f| f.weighted).count(), 3);
        for future in &planner.futures {
            assert!(future.desired_len >= 4 && future.desired_len <= 8);
            assert!(future.inputs.len() >= future.desired_len);
        }
    }

    #[test]
    fn rounds_extend_the_movie_by_whole_motifs() {
        let dir = tempfile::tempdir().unwrap();
        let mut planner = make_planner(dir.path(), small_config());
        planner.run(Some(6)).unwrap();
        // Every motif is four inputs long.
        assert_eq!(planner.movie().len(), 24);
        assert!(std::fs::metadata(dir.path().join("out.movie")).is_ok());
        assert!(std::fs::metadata(dir.path().join("out.motifs")).is_ok());
        // Weighted future sampling counted its picks.
        let picks: u64 = planner
            .motifs
            .all_motifs()
            .iter()
            .map(|m| planner.motifs.times_picked(m))
            .sum();
        assert!(picks > 0);
        assert!(!planner
            .motifs
            .weight_history(&[0x80; 4])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn planning_is_deterministic_per_seed() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let mut a = make_planner(dir_a.path(), small_config());
        let mut b = make_planner(dir_b.path(), small_config());
        a.run(Some(5)).unwrap();
        b.run(Some(5)).unwrap();
        assert_eq!(a.movie().inputs(), b.movie().inputs());
    }

    #[test]
    fn warm_start_raises_the_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let mut planner = make_planner(dir.path(), small_config());
        planner.warm_start(&[0x80, 0x80, 0x00]);
        assert_eq!(planner.movie().len(), 3);
        assert_eq!(planner.movie().watermark(), 3);
        assert!(planner.movie().recent_checkpoint(0).is_some());
    }

    #[test]
    fn backtracking_never_shrinks_the_movie_past_the_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.backtrack_every = 3;
        config.min_backtrack_distance = 8;
        let mut planner = make_planner(dir.path(), config);
        planner.warm_start(&[0x00, 0x00]);
        planner.run(Some(12)).unwrap();
        assert!(planner.movie().len() >= planner.movie().watermark());
        assert_eq!(planner.movie().watermark(), 2);
    }
}
