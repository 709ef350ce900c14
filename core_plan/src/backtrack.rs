//! Segment improvement for backtracking.
//!
//! Given a committed span of the movie, each strategy perturbs it and
//! keeps perturbations that beat both the start state and the span's
//! original outcome. The strategies are independent and seeded per
//! request, so a retried request reproduces its results exactly.

use std::collections::HashSet;

use plan_proto::{ImproveApproach, ImproveRequest, ImproveResponse, Replacement, WorkRequest};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::codec::{self, CodecError};
use crate::engine::Buttons;
use crate::hashing::seed_from_label;
use crate::motifs::Motifs;
use crate::scoring::EvalContext;

/// How many requests of each kind one backtrack event generates.
const NUM_ABLATION: usize = 2;
const NUM_CHOP: usize = 2;
const NUM_RANDOM: usize = 2;

/// The three-point acceptance test. With `e_minus_s` the original
/// segment's gain over the start, `n_minus_s` the replacement's gain
/// over the start, and `n_minus_e` the replacement's gain over the
/// original outcome, a replacement counts iff it out-gains the
/// original, is a net win over the start, and beats the original
/// outcome outright. The score drops the shared `e_minus_s` component.
fn acceptance(e_minus_s: f64, n_minus_s: f64, n_minus_e: f64) -> Option<f64> {
    if e_minus_s >= n_minus_s {
        return None;
    }
    if n_minus_s <= 0.0 {
        return None;
    }
    if n_minus_e <= 0.0 {
        return None;
    }
    Some(n_minus_s + n_minus_e)
}

/// Play `inputs` from the segment's start and run the acceptance test
/// against the original outcome.
fn is_improvement(
    ctx: &mut EvalContext<'_>,
    start_raw: &[u8],
    start_mem: &[u8],
    inputs: &[u8],
    end_mem: &[u8],
) -> Option<f64> {
    ctx.engine.load(start_raw);
    for &input in inputs {
        ctx.cache.step(ctx.engine, input);
    }
    let new_mem = ctx.engine.read_memory();

    let e_minus_s = ctx.objectives.evaluate(start_mem, end_mem);
    let n_minus_s = ctx.objectives.evaluate(start_mem, &new_mem);
    let n_minus_e = ctx.objectives.evaluate(end_mem, &new_mem);
    acceptance(e_minus_s, n_minus_s, n_minus_e)
}

/// A random sub-span of a sequence. Larger exponents bias toward
/// shorter spans. May return an empty span.
fn random_span(len: usize, exponent: f64, rng: &mut impl Rng) -> (usize, usize) {
    if len == 0 {
        return (0, 0);
    }
    let start = ((rng.gen::<f64>() * len as f64) as usize).min(len - 1);
    let maxlen = len - start;
    let span = ((rng.gen::<f64>().powf(exponent)) * maxlen as f64) as usize;
    (start, span.min(maxlen))
}

/// Same-length input sequence stitched from weighted motif samples.
fn random_inputs(motifs: &Motifs, rng: &mut impl Rng, len: usize) -> Vec<u8> {
    let mut inputs = Vec::with_capacity(len);
    while inputs.len() < len {
        for &b in motifs.random_weighted_motif_with(rng) {
            inputs.push(b);
            if inputs.len() == len {
                break;
            }
        }
    }
    inputs
}

fn dualize(inputs: &mut [u8], start: usize, len: usize) {
    for b in &mut inputs[start..start + len] {
        *b = Buttons::from_bits_truncate(*b).opposite().bits();
    }
}

fn reverse_range(inputs: &mut [u8], start: usize, len: usize) {
    inputs[start..start + len].reverse();
}

/// Dualize the span in place and test; then reverse it and test again.
/// The dualization sticks for later attempts; the reversal is undone
/// unless `keep_reversed`.
#[allow(clippy::too_many_arguments)]
fn try_dualize_and_reverse(
    ctx: &mut EvalContext<'_>,
    start_raw: &[u8],
    start_mem: &[u8],
    inputs: &mut Vec<u8>,
    start: usize,
    len: usize,
    end_mem: &[u8],
    repls: &mut Vec<(f64, Vec<u8>)>,
    keep_reversed: bool,
) {
    dualize(inputs, start, len);
    if let Some(score) = is_improvement(ctx, start_raw, start_mem, inputs, end_mem) {
        repls.push((score, inputs.clone()));
    }

    reverse_range(inputs, start, len);
    if let Some(score) = is_improvement(ctx, start_raw, start_mem, inputs, end_mem) {
        repls.push((score, inputs.clone()));
    }

    if !keep_reversed {
        reverse_range(inputs, start, len);
    }
}

/// Run one improvement request: apply its strategy for its iteration
/// budget and return the accepted replacements, best first, capped at
/// `max_best`. An empty response means nothing beat the original.
pub fn try_improve(
    ctx: &mut EvalContext<'_>,
    motifs: &Motifs,
    req: &ImproveRequest,
) -> Result<ImproveResponse, CodecError> {
    let start_raw = codec::decode(&req.start_state, ctx.basis)?;
    let end_raw = codec::decode(&req.end_state, ctx.basis)?;

    ctx.engine.load(&end_raw);
    let end_mem = ctx.engine.read_memory();
    ctx.engine.load(&start_raw);
    let start_mem = ctx.engine.read_memory();

    let mut rng = ChaCha8Rng::seed_from_u64(seed_from_label(&req.seed));
    let segment = &req.segment;
    let iters = req.iters as usize;
    let mut repls: Vec<(f64, Vec<u8>)> = Vec::new();

    match req.approach {
        ImproveApproach::Random => {
            for _ in 0..iters {
                let inputs = random_inputs(motifs, &mut rng, segment.len());
                if let Some(score) =
                    is_improvement(ctx, &start_raw, &start_mem, &inputs, &end_mem)
                {
                    repls.push((score, inputs));
                }
            }
        }
        ImproveApproach::Opposites => {
            let mut inputs = segment.clone();
            let full = inputs.len();
            try_dualize_and_reverse(
                ctx, &start_raw, &start_mem, &mut inputs, 0, full, &end_mem, &mut repls, false,
            );
            try_dualize_and_reverse(
                ctx,
                &start_raw,
                &start_mem,
                &mut inputs,
                0,
                full / 2,
                &end_mem,
                &mut repls,
                false,
            );
            for _ in 0..iters {
                let (start, mut len) = random_span(inputs.len(), 1.0, &mut rng);
                if len == 0 && start != inputs.len() {
                    len = 1;
                }
                let keep_reversed = rng.gen::<bool>();
                try_dualize_and_reverse(
                    ctx,
                    &start_raw,
                    &start_mem,
                    &mut inputs,
                    start,
                    len,
                    &end_mem,
                    &mut repls,
                    keep_reversed,
                );
            }
        }
        ImproveApproach::Ablation => {
            for _ in 0..iters {
                let mut inputs = segment.clone();
                // A mask of all ones would keep everything.
                let mask = loop {
                    let m = rng.gen::<u8>();
                    if m != 255 {
                        break m;
                    }
                };
                let cutoff = rng.gen::<u32>();
                for b in &mut inputs {
                    if rng.gen::<u32>() < cutoff {
                        *b &= mask;
                    }
                }
                // The mask may touch only bits no input uses.
                if inputs != *segment {
                    if let Some(score) =
                        is_improvement(ctx, &start_raw, &start_mem, &inputs, &end_mem)
                    {
                        repls.push((score, inputs));
                    }
                }
            }
        }
        ImproveApproach::Chop => {
            let mut tried: HashSet<Vec<u8>> = HashSet::new();
            let mut i = 0;
            while i < iters {
                let mut inputs = segment.clone();
                // Spend remaining iterations chopping further into the
                // same reduced segment while it keeps improving.
                while i < iters {
                    i += 1;
                    // Exponent 2 prefers small spans; whole-span chops
                    // are too blunt.
                    let (start, mut len) = random_span(inputs.len(), 2.0, &mut rng);
                    if len == 0 && start != inputs.len() {
                        len = 1;
                    }
                    inputs.drain(start..start + len);
                    let mut improved = false;
                    if inputs != *segment {
                        if let Some(score) =
                            is_improvement(ctx, &start_raw, &start_mem, &inputs, &end_mem)
                        {
                            repls.push((score, inputs.clone()));
                            improved = true;
                        }
                    }
                    // Keep chopping this branch only while it improves
                    // and produces sequences not yet seen.
                    if !improved || !tried.insert(inputs.clone()) {
                        tried.insert(inputs);
                        break;
                    }
                }
            }
        }
    }

    repls.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    repls.truncate(req.max_best as usize);
    log::info!(
        "{}: {} improvements in {} iters",
        req.approach.name(),
        repls.len(),
        req.iters
    );

    Ok(ImproveResponse {
        replacements: repls
            .into_iter()
            .map(|(score, inputs)| Replacement { inputs, score })
            .collect(),
    })
}

/// Build the full batch of improvement requests for one backtrack
/// event. Seeds encode the movie position and the request's slot so
/// every request in the batch draws from a distinct stream.
pub fn improve_requests(
    start_state: &[u8],
    end_state: &[u8],
    segment: &[u8],
    movenum: usize,
    iters: u32,
    max_best: u32,
) -> Vec<WorkRequest> {
    let base = |approach, seed: String| {
        WorkRequest::Improve(ImproveRequest {
            start_state: start_state.to_vec(),
            end_state: end_state.to_vec(),
            segment: segment.to_vec(),
            approach,
            iters,
            max_best,
            seed,
        })
    };

    let mut requests = Vec::with_capacity(1 + NUM_ABLATION + NUM_CHOP + NUM_RANDOM);
    requests.push(base(ImproveApproach::Opposites, format!("opp{movenum}")));
    for i in 0..NUM_ABLATION {
        requests.push(base(ImproveApproach::Ablation, format!("abl{movenum}.{i}")));
    }
    for i in 0..NUM_CHOP {
        requests.push(base(ImproveApproach::Chop, format!("chop{movenum}.{i}")));
    }
    for i in 0..NUM_RANDOM {
        requests.push(base(ImproveApproach::Random, format!("rand{movenum}.{i}")));
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateCache;
    use crate::engine::Engine;
    use crate::objectives::WeightedObjectives;
    use crate::toy::ToyEngine;

    #[test]
    fn acceptance_requires_all_three_inequalities() {
        // All hold.
        assert_eq!(acceptance(1.0, 2.0, 0.5), Some(2.5));
        // Original gained at least as much.
        assert_eq!(acceptance(2.0, 2.0, 0.5), None);
        assert_eq!(acceptance(3.0, 2.0, 0.5), None);
        // Not a net win over the start.
        assert_eq!(acceptance(-1.0, 0.0, 0.5), None);
        assert_eq!(acceptance(-2.0, -1.0, 0.5), None);
        // Does not beat the original outcome.
        assert_eq!(acceptance(1.0, 2.0, 0.0), None);
        assert_eq!(acceptance(1.0, 2.0, -0.5), None);
    }

    #[test]
    fn random_span_stays_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for len in [0usize, 1, 2, 17, 100] {
            for _ in 0..200 {
                let (start, span) = random_span(len, 2.0, &mut rng);
                assert!(start + span <= len, "span out of bounds for len {len}");
            }
        }
    }

    #[test]
    fn random_inputs_concatenates_motifs_to_length() {
        let motifs = Motifs::new(vec![vec![1, 2, 3], vec![4, 5]]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for len in [1usize, 2, 3, 7, 20] {
            assert_eq!(random_inputs(&motifs, &mut rng, len).len(), len);
        }
    }

    fn improve_setup() -> (ToyEngine, StateCache, WeightedObjectives, Vec<u8>, Vec<u8>) {
        // Progress is furthest x. The committed segment walks left, so
        // nearly any perturbation toward the right is an improvement.
        let objectives = WeightedObjectives::new(vec![(1.0, vec![2])]);
        let mut engine = ToyEngine::new();
        // Establish a little progress first so left-walking does not
        // saturate at zero.
        for _ in 0..4 {
            engine.step(0x80);
        }
        let start_state = engine.save();
        let segment = vec![0x40u8; 6];
        for &b in &segment {
            engine.step(b);
        }
        let end_state = engine.save();
        (
            ToyEngine::new(),
            StateCache::new(4096, 256),
            objectives,
            start_state,
            end_state,
        )
    }

    #[test]
    fn opposites_turns_a_left_walk_into_an_improvement() {
        let (mut engine, mut cache, objectives, start_state, end_state) = improve_setup();
        let mut ctx = EvalContext {
            engine: &mut engine,
            cache: &mut cache,
            objectives: &objectives,
            basis: None,
        };
        let req = ImproveRequest {
            start_state: codec::encode(&start_state, None),
            end_state: codec::encode(&end_state, None),
            segment: vec![0x40; 6],
            approach: ImproveApproach::Opposites,
            iters: 20,
            max_best: 5,
            seed: "opp4".into(),
        };
        let motifs = Motifs::new(vec![vec![0x80; 4], vec![0x00; 2]]);
        let resp = try_improve(&mut ctx, &motifs, &req).unwrap();
        assert!(!resp.replacements.is_empty());
        assert!(resp.replacements.len() <= 5);
        // Best first.
        for pair in resp.replacements.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // The full-segment dual is six rights, a clear improvement.
        assert!(resp
            .replacements
            .iter()
            .any(|r| r.inputs == vec![0x80; 6]));
    }

    #[test]
    fn improvement_search_is_reproducible_per_seed() {
        let (mut engine, mut cache, objectives, start_state, end_state) = improve_setup();
        let req = ImproveRequest {
            start_state: codec::encode(&start_state, None),
            end_state: codec::encode(&end_state, None),
            segment: vec![0x40; 6],
            approach: ImproveApproach::Random,
            iters: 30,
            max_best: 10,
            seed: "rand4.0".into(),
        };
        let motifs = Motifs::new(vec![vec![0x80; 4], vec![0x00; 2]]);
        let mut ctx = EvalContext {
            engine: &mut engine,
            cache: &mut cache,
            objectives: &objectives,
            basis: None,
        };
        let first = try_improve(&mut ctx, &motifs, &req).unwrap();
        let second = try_improve(&mut ctx, &motifs, &req).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn chop_never_produces_the_original_segment() {
        let (mut engine, mut cache, objectives, start_state, end_state) = improve_setup();
        let mut ctx = EvalContext {
            engine: &mut engine,
            cache: &mut cache,
            objectives: &objectives,
            basis: None,
        };
        let segment = vec![0x80u8, 0x40, 0x80, 0x40, 0x80, 0x80];
        let req = ImproveRequest {
            start_state: codec::encode(&start_state, None),
            end_state: codec::encode(&end_state, None),
            segment: segment.clone(),
            approach: ImproveApproach::Chop,
            iters: 40,
            max_best: 10,
            seed: "chop4.1".into(),
        };
        let motifs = Motifs::new(vec![vec![0x80; 4]]);
        let resp = try_improve(&mut ctx, &motifs, &req).unwrap();
        for r in &resp.replacements {
            assert_ne!(r.inputs, segment);
            assert!(r.inputs.len() < segment.len());
        }
    }

    #[test]
    fn improve_requests_cover_every_approach_with_distinct_seeds() {
        let requests = improve_requests(&[1], &[2], &[3, 4], 120, 200, 10);
        assert_eq!(requests.len(), 7);
        let mut seeds = HashSet::new();
        for req in &requests {
            let WorkRequest::Improve(imp) = req else {
                panic!("unexpected request kind");
            };
            assert!(seeds.insert(imp.seed.clone()), "duplicate seed {}", imp.seed);
        }
    }
}
