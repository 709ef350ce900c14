//! Candidate scoring: immediate effect plus futures lookahead.
//!
//! This is the compute kernel both the local fallback and remote
//! workers run, so it must be a pure function of the request and the
//! deterministic engine.

use plan_proto::{ScoreRequest, ScoreResponse, WorkRequest, WorkResponse};

use crate::backtrack;
use crate::cache::StateCache;
use crate::codec::{self, CodecError};
use crate::engine::Engine;
use crate::motifs::Motifs;
use crate::objectives::WeightedObjectives;

/// Everything scoring needs to drive a game: the engine, the step
/// cache wrapped around it, the objective set, and the shared codec
/// basis for decoding states off the wire.
pub struct EvalContext<'a> {
    pub engine: &'a mut dyn Engine,
    pub cache: &'a mut StateCache,
    pub objectives: &'a WeightedObjectives,
    pub basis: Option<&'a [u8]>,
}

impl<'a> EvalContext<'a> {
    /// Replay an input sequence through the cache.
    fn play(&mut self, inputs: &[u8]) {
        for &input in inputs {
            self.cache.step(self.engine, input);
        }
    }
}

/// Score one candidate: play it from the request's state, then play
/// every future in the pool plus a synthetic hold-last-input future of
/// the pool's average length from the candidate's end state.
///
/// `immediate_score` compares memory before and after the candidate;
/// each future score compares the candidate's end memory against that
/// future's end memory. `future_scores` covers the real pool only, in
/// order; the synthetic future counts toward the totals but has no
/// pool slot to account against. Best and worst are over everything
/// scored, synthetic included.
pub fn score_candidate(
    ctx: &mut EvalContext<'_>,
    req: &ScoreRequest,
) -> Result<ScoreResponse, CodecError> {
    let start_state = codec::decode(&req.current_state, ctx.basis)?;
    ctx.engine.load(&start_state);
    let start_mem = ctx.engine.read_memory();

    ctx.play(&req.candidate);
    let after_state = ctx.engine.save();
    let after_mem = ctx.engine.read_memory();
    let immediate_score = ctx.objectives.evaluate(&start_mem, &after_mem);

    let mut futures: Vec<&[u8]> = req.futures.iter().map(Vec::as_slice).collect();
    let synthetic = hold_last_future(&req.candidate, &req.futures);
    futures.push(&synthetic);

    let mut futures_score = 0.0;
    let mut best_future_score = f64::NEG_INFINITY;
    let mut worst_future_score = f64::INFINITY;
    let mut future_scores = Vec::with_capacity(req.futures.len());
    for (i, future) in futures.iter().enumerate() {
        ctx.engine.load(&after_state);
        ctx.play(future);
        let end_mem = ctx.engine.read_memory();
        let score = ctx.objectives.evaluate(&after_mem, &end_mem);
        futures_score += score;
        best_future_score = best_future_score.max(score);
        worst_future_score = worst_future_score.min(score);
        if i < req.futures.len() {
            future_scores.push(score);
        }
    }

    Ok(ScoreResponse {
        immediate_score,
        futures_score,
        best_future_score,
        worst_future_score,
        future_scores,
    })
}

/// The synthetic future: hold the candidate's last input for the
/// average length of the real pool. Keeps a candidate honest about
/// what happens if the player just keeps doing that.
fn hold_last_future(candidate: &[u8], futures: &[Vec<u8>]) -> Vec<u8> {
    let len = if futures.is_empty() {
        0
    } else {
        futures.iter().map(Vec::len).sum::<usize>() / futures.len()
    };
    let held = candidate.last().copied().unwrap_or(0);
    vec![held; len]
}

/// Execute one work request the way a worker (or the local fallback)
/// does.
pub fn execute(
    ctx: &mut EvalContext<'_>,
    motifs: &Motifs,
    req: &WorkRequest,
) -> Result<WorkResponse, CodecError> {
    match req {
        WorkRequest::Score(score) => Ok(WorkResponse::Score(score_candidate(ctx, score)?)),
        WorkRequest::Improve(improve) => Ok(WorkResponse::Improve(backtrack::try_improve(
            ctx, motifs, improve,
        )?)),
    }
}
