//! Weighted input motifs: short button sequences the planner proposes
//! from, with weights that drift toward whatever actually scores.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum MotifError {
    #[error("failed to read motifs: {0}")]
    Io(#[from] std::io::Error),
    #[error("motifs line {0} is malformed: {1:?}")]
    Parse(usize, String),
    #[error("motif set is empty")]
    Empty,
}

#[derive(Debug, Clone)]
struct MotifInfo {
    weight: f64,
    /// How many times weighted sampling has picked this motif.
    picked: u64,
    /// `(frame, weight)` samples recorded by [`Motifs::record_weights`].
    history: Vec<(usize, f64)>,
}

/// The motif pool. Keys are the input sequences themselves, so the map
/// deduplicates and iterates in a deterministic order.
pub struct Motifs {
    motifs: BTreeMap<Vec<u8>, MotifInfo>,
}

impl Motifs {
    /// Build from sequences, all starting at weight 1.0. Panics on an
    /// empty pool; there is nothing to propose without motifs.
    pub fn new(sequences: Vec<Vec<u8>>) -> Self {
        assert!(!sequences.is_empty(), "motif pool must not be empty");
        let motifs = sequences
            .into_iter()
            .map(|seq| {
                (
                    seq,
                    MotifInfo {
                        weight: 1.0,
                        picked: 0,
                        history: Vec::new(),
                    },
                )
            })
            .collect();
        Self { motifs }
    }

    /// Load the line format: a float weight followed by whitespace
    /// separated input bytes.
    pub fn load_from_file(path: &Path) -> Result<Self, MotifError> {
        let text = fs::read_to_string(path)?;
        let mut motifs = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let weight: f64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| MotifError::Parse(lineno + 1, line.to_string()))?;
            let inputs: Result<Vec<u8>, _> = tokens.map(|t| t.parse()).collect();
            let inputs = inputs.map_err(|_| MotifError::Parse(lineno + 1, line.to_string()))?;
            motifs.insert(
                inputs,
                MotifInfo {
                    weight,
                    picked: 0,
                    history: Vec::new(),
                },
            );
        }
        if motifs.is_empty() {
            return Err(MotifError::Empty);
        }
        Ok(Self { motifs })
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut out = String::new();
        for (inputs, info) in &self.motifs {
            out.push_str(&format!("{}", info.weight));
            for b in inputs {
                out.push_str(&format!(" {}", b));
            }
            out.push('\n');
        }
        fs::write(path, out)
    }

    pub fn len(&self) -> usize {
        self.motifs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motifs.is_empty()
    }

    pub fn all_motifs(&self) -> Vec<Vec<u8>> {
        self.motifs.keys().cloned().collect()
    }

    pub fn is_motif(&self, inputs: &[u8]) -> bool {
        self.motifs.contains_key(inputs)
    }

    pub fn total_weight(&self) -> f64 {
        self.motifs.values().map(|i| i.weight).sum()
    }

    /// Uniform sample, ignoring weights.
    pub fn random_motif_with(&self, rng: &mut impl Rng) -> &[u8] {
        let idx = rng.gen_range(0..self.motifs.len());
        self.motifs
            .keys()
            .nth(idx)
            .expect("index in range by construction")
    }

    /// Weight-proportional sample.
    pub fn random_weighted_motif_with(&self, rng: &mut impl Rng) -> &[u8] {
        let mut remaining = rng.gen::<f64>() * self.total_weight();
        for (inputs, info) in &self.motifs {
            if remaining < info.weight {
                return inputs;
            }
            remaining -= info.weight;
        }
        // Float rounding can walk off the end; the first motif is as
        // good a fallback as any.
        self.motifs
            .keys()
            .next()
            .expect("pool is non-empty by construction")
    }

    /// Like [`Motifs::random_weighted_motif_with`] but also counts the
    /// pick.
    pub fn pick(&mut self, rng: &mut impl Rng) -> Vec<u8> {
        let chosen = self.random_weighted_motif_with(rng).to_vec();
        if let Some(info) = self.motifs.get_mut(&chosen) {
            info.picked += 1;
        }
        chosen
    }

    /// Nudge the motif's weight multiplicatively toward performing or
    /// away from underperforming, clamped so no motif can dominate the
    /// pool or starve out of it entirely.
    pub fn reweight(
        &mut self,
        inputs: &[u8],
        increase: bool,
        alpha: f64,
        max_frac: f64,
        min_frac: f64,
    ) {
        let total = self.total_weight();
        let Some(info) = self.motifs.get_mut(inputs) else {
            return;
        };
        let old = info.weight;
        let mut new = if increase { old / alpha } else { old * alpha };
        let ceiling = total * max_frac;
        let floor = total * min_frac;
        if new > ceiling {
            new = ceiling;
        }
        if new < floor {
            new = floor;
        }
        info.weight = new;
        log::debug!(
            "motif {:?} weight {:.6} -> {:.6} ({})",
            inputs,
            old,
            new,
            if increase { "up" } else { "down" }
        );
    }

    /// Snapshot every motif's current weight against the frame number,
    /// for offline inspection of how the pool drifted.
    pub fn record_weights(&mut self, frame: usize) {
        for info in self.motifs.values_mut() {
            info.history.push((frame, info.weight));
        }
    }

    pub fn weight_history(&self, inputs: &[u8]) -> Option<&[(usize, f64)]> {
        self.motifs.get(inputs).map(|i| i.history.as_slice())
    }

    pub fn times_picked(&self, inputs: &[u8]) -> u64 {
        self.motifs.get(inputs).map_or(0, |i| i.picked)
    }

    pub fn log_stats(&self) {
        let picks: u64 = self.motifs.values().map(|i| i.picked).sum();
        log::info!(
            "motifs: {} in pool, total weight {:.4}, {} weighted picks",
            self.motifs.len(),
            self.total_weight(),
            picks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pool() -> Motifs {
        Motifs::new(vec![
            vec![0x80, 0x80, 0x80, 0x80],
            vec![0x80, 0x81, 0x81, 0x80],
            vec![0x00, 0x00],
            vec![0x40, 0x40, 0x40],
        ])
    }

    #[test]
    fn sampling_is_deterministic_under_a_fixed_seed() {
        let motifs = pool();
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(
                motifs.random_weighted_motif_with(&mut a),
                motifs.random_weighted_motif_with(&mut b)
            );
        }
    }

    #[test]
    fn weighted_sampling_favors_heavy_motifs() {
        let mut motifs = pool();
        let heavy = vec![0x80u8, 0x80, 0x80, 0x80];
        // Push one motif's weight up hard.
        for _ in 0..40 {
            motifs.reweight(&heavy, true, 0.8, 0.9, 1e-5);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut heavy_picks = 0;
        for _ in 0..1000 {
            if motifs.random_weighted_motif_with(&mut rng) == heavy.as_slice() {
                heavy_picks += 1;
            }
        }
        assert!(heavy_picks > 600, "heavy motif picked {heavy_picks}/1000");
    }

    #[test]
    fn reweight_clamps_to_pool_fractions() {
        let mut motifs = pool();
        let target = vec![0x00u8, 0x00];
        for _ in 0..100 {
            motifs.reweight(&target, true, 0.8, 0.1, 1e-5);
        }
        let total = motifs.total_weight();
        assert!(motifs.motifs[&target].weight <= total * 0.1 + 1e-9);

        for _ in 0..100 {
            motifs.reweight(&target, false, 0.8, 0.1, 1e-5);
        }
        let total = motifs.total_weight();
        assert!(motifs.motifs[&target].weight >= total * 1e-5 - 1e-12);
    }

    #[test]
    fn reweight_of_unknown_motif_is_a_no_op() {
        let mut motifs = pool();
        let before = motifs.total_weight();
        motifs.reweight(&[9, 9, 9], true, 0.8, 0.1, 1e-5);
        assert_eq!(motifs.total_weight(), before);
    }

    #[test]
    fn file_round_trip_preserves_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.motifs");
        let mut motifs = pool();
        motifs.reweight(&[0x00, 0x00], false, 0.8, 0.1, 1e-5);
        motifs.save_to_file(&path).unwrap();
        let loaded = Motifs::load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), motifs.len());
        assert!((loaded.total_weight() - motifs.total_weight()).abs() < 1e-9);
        assert!(loaded.is_motif(&[0x40, 0x40, 0x40]));
    }
}
