//! Memoized stepping: `(input, starting state) -> resulting state`.
//!
//! Replaying a previously-seen transition becomes a table lookup
//! instead of a real emulation step. The cache must never be
//! observably distinguishable from its absence except in timing.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use crate::engine::Engine;
use crate::hashing::FnvHasher;

/// Content-addressed key: equality and hashing are over the byte
/// content of the starting state, never pointer identity, so keys
/// produced at different times or in different places coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StepKey {
    input: u8,
    state: Vec<u8>,
}

#[derive(Debug)]
struct CacheEntry {
    result: Vec<u8>,
    /// Use-sequence for batched LRU eviction; refreshed on every hit.
    sequence: u64,
}

/// State cache with a soft limit and slop.
///
/// Eviction is an O(n log n) pass over all entries, so it only runs
/// once the count exceeds `limit + slop`; the pass then evicts exactly
/// down to `limit` by cutting everything below the `(count - limit)`-th
/// smallest use-sequence. Individual inserts stay amortized O(1) at the
/// cost of occasionally holding slightly more than the strict minimum.
pub struct StateCache {
    entries: HashMap<StepKey, CacheEntry, BuildHasherDefault<FnvHasher>>,
    limit: usize,
    slop: usize,
    next_sequence: u64,
    hits: u64,
    misses: u64,
}

impl StateCache {
    pub fn new(limit: usize, slop: usize) -> Self {
        Self {
            entries: HashMap::default(),
            limit,
            slop,
            next_sequence: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Free every entry and restart counters with new capacity bounds.
    pub fn reset(&mut self, limit: usize, slop: usize) {
        self.entries = HashMap::default();
        self.limit = limit;
        self.slop = slop;
        self.next_sequence = 0;
        self.hits = 0;
        self.misses = 0;
    }

    /// Advance the engine by one step, serving the transition from the
    /// cache when the exact `(input, state)` pair has been seen before.
    pub fn step(&mut self, engine: &mut dyn Engine, input: u8) {
        let key = StepKey {
            input,
            state: engine.save(),
        };
        // The map's Eq check is full byte equality, so a hash collision
        // can never substitute a wrong result.
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.sequence = self.next_sequence;
            self.next_sequence += 1;
            self.hits += 1;
            engine.load(&entry.result);
            return;
        }

        self.misses += 1;
        engine.step(input);
        let result = engine.save();
        self.entries.insert(
            key,
            CacheEntry {
                result,
                sequence: self.next_sequence,
            },
        );
        self.next_sequence += 1;
        self.maybe_evict();
    }

    fn maybe_evict(&mut self) {
        if self.entries.len() <= self.limit + self.slop {
            return;
        }
        let excess = self.entries.len() - self.limit;
        let mut sequences: Vec<u64> = self.entries.values().map(|e| e.sequence).collect();
        sequences.sort_unstable();
        // Sequences are unique, so this drops exactly `excess` entries.
        let threshold = sequences[excess];
        self.entries.retain(|_, e| e.sequence >= threshold);
        log::debug!(
            "cache evicted {} entries, {} remain",
            excess,
            self.entries.len()
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn log_stats(&self) {
        log::info!(
            "cache: {} / {} entries, {} hits, {} misses",
            self.entries.len(),
            self.limit,
            self.hits,
            self.misses
        );
    }
}
