//! Weighted lexicographic objectives over memory snapshots.
//!
//! Each objective is an ordered list of memory offsets; two snapshots
//! compare lexicographically over the bytes at those offsets. A set of
//! weighted objectives approximates "progress" for the planner.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ObjectiveError {
    #[error("failed to read objectives: {0}")]
    Io(#[from] std::io::Error),
    #[error("objectives line {0} is malformed: {1:?}")]
    Parse(usize, String),
    #[error("objective set is empty")]
    Empty,
}

#[derive(Debug, Clone)]
struct ObjectiveInfo {
    weight: f64,
    /// Observed values for this objective, kept sorted ascending.
    observations: Vec<Vec<u8>>,
}

/// A weighted set of lexicographic orderings, plus the observation
/// history that anchors normalized values. Weights are immutable here;
/// they are learned offline.
pub struct WeightedObjectives {
    // BTreeMap keeps iteration order deterministic across runs.
    objectives: BTreeMap<Vec<usize>, ObjectiveInfo>,
}

/// -1, 0, or +1 as `a` is greater, equal, or less than `b` under the
/// lexicographic order given by `offsets`.
fn order(a: &[u8], b: &[u8], offsets: &[usize]) -> i32 {
    for &p in offsets {
        if a[p] > b[p] {
            return -1;
        }
        if a[p] < b[p] {
            return 1;
        }
    }
    0
}

impl WeightedObjectives {
    /// Build from `(weight, offsets)` pairs. Panics on an empty set;
    /// planning without objectives is a logic error, not a state to
    /// limp along in.
    pub fn new(objectives: Vec<(f64, Vec<usize>)>) -> Self {
        assert!(!objectives.is_empty(), "objective set must not be empty");
        let objectives = objectives
            .into_iter()
            .map(|(weight, offsets)| {
                (
                    offsets,
                    ObjectiveInfo {
                        weight,
                        observations: Vec::new(),
                    },
                )
            })
            .collect();
        Self { objectives }
    }

    /// Load the line format: a float weight followed by whitespace
    /// separated integer memory offsets.
    pub fn load_from_file(path: &Path) -> Result<Self, ObjectiveError> {
        let text = fs::read_to_string(path)?;
        let mut parsed = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let weight: f64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| ObjectiveError::Parse(lineno + 1, line.to_string()))?;
            let offsets: Result<Vec<usize>, _> = tokens.map(|t| t.parse()).collect();
            let offsets =
                offsets.map_err(|_| ObjectiveError::Parse(lineno + 1, line.to_string()))?;
            parsed.push((weight, offsets));
        }
        if parsed.is_empty() {
            return Err(ObjectiveError::Empty);
        }
        Ok(Self::new(parsed))
    }

    /// Write back in the same line format, skipping dead weights.
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut out = String::new();
        for (offsets, info) in &self.objectives {
            if info.weight <= 0.0 {
                continue;
            }
            out.push_str(&format!("{}", info.weight));
            for off in offsets {
                out.push_str(&format!(" {}", off));
            }
            out.push('\n');
        }
        fs::write(path, out)
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    /// Signed progress score between two snapshots: the sum over all
    /// objectives of +weight when `a < b`, -weight when `a > b`.
    /// Antisymmetric by construction: `evaluate(a, b) == -evaluate(b, a)`.
    pub fn evaluate(&self, a: &[u8], b: &[u8]) -> f64 {
        let mut score = 0.0;
        for (offsets, info) in &self.objectives {
            match order(a, b, offsets) {
                1 => score += info.weight,
                -1 => score -= info.weight,
                _ => {}
            }
        }
        score
    }

    /// Record the snapshot in every objective's observation history.
    pub fn observe(&mut self, memory: &[u8]) {
        for (offsets, info) in self.objectives.iter_mut() {
            let value: Vec<u8> = offsets.iter().map(|&p| memory[p]).collect();
            let pos = info.observations.partition_point(|v| *v < value);
            info.observations.insert(pos, value);
        }
    }

    /// Where the snapshot falls within everything observed so far, as
    /// the mean rank fraction in [0, 1] across objectives. An objective
    /// with no observations contributes zero.
    pub fn normalized_value(&self, memory: &[u8]) -> f64 {
        let mut sum = 0.0;
        for (offsets, info) in &self.objectives {
            if info.observations.is_empty() {
                continue;
            }
            let value: Vec<u8> = offsets.iter().map(|&p| memory[p]).collect();
            let idx = info.observations.partition_point(|v| *v < value);
            sum += idx as f64 / info.observations.len() as f64;
        }
        sum / self.objectives.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_set() -> WeightedObjectives {
        WeightedObjectives::new(vec![
            (1.0, vec![0]),
            (2.0, vec![2, 0]),
            (0.5, vec![3]),
        ])
    }

    #[test]
    fn evaluate_is_antisymmetric_and_zero_on_self() {
        let objs = simple_set();
        let mems = [
            vec![0u8, 0, 0, 0, 0, 0, 0, 0],
            vec![1u8, 9, 4, 2, 0, 0, 0, 0],
            vec![1u8, 9, 4, 3, 0, 0, 0, 0],
            vec![255u8; 8],
        ];
        for a in &mems {
            assert_eq!(objs.evaluate(a, a), 0.0);
            for b in &mems {
                assert_eq!(objs.evaluate(a, b), -objs.evaluate(b, a));
            }
        }
    }

    #[test]
    fn evaluate_weighs_each_ordering() {
        let objs = simple_set();
        let low = [0u8, 0, 0, 0, 0, 0, 0, 0];
        let high = [1u8, 0, 1, 1, 0, 0, 0, 0];
        // All three objectives improve: 1.0 + 2.0 + 0.5.
        assert_eq!(objs.evaluate(&low, &high), 3.5);
        // Only the x objective moves.
        let tiny = [1u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(objs.evaluate(&low, &tiny), 1.0);
    }

    #[test]
    fn lexicographic_tie_breaks_on_later_offsets() {
        let objs = WeightedObjectives::new(vec![(1.0, vec![2, 0])]);
        let a = [5u8, 0, 7, 0, 0, 0, 0, 0];
        let b = [6u8, 0, 7, 0, 0, 0, 0, 0];
        // First offset ties, second decides.
        assert_eq!(objs.evaluate(&a, &b), 1.0);
    }

    #[test]
    fn normalized_value_ranks_within_observations() {
        let mut objs = WeightedObjectives::new(vec![(1.0, vec![0])]);
        assert_eq!(objs.normalized_value(&[3, 0, 0, 0, 0, 0, 0, 0]), 0.0);
        for x in [10u8, 20, 30, 40] {
            objs.observe(&[x, 0, 0, 0, 0, 0, 0, 0]);
        }
        assert_eq!(objs.normalized_value(&[5, 0, 0, 0, 0, 0, 0, 0]), 0.0);
        assert_eq!(objs.normalized_value(&[25, 0, 0, 0, 0, 0, 0, 0]), 0.5);
        assert_eq!(objs.normalized_value(&[99, 0, 0, 0, 0, 0, 0, 0]), 1.0);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.objectives");
        simple_set().save_to_file(&path).unwrap();
        let loaded = WeightedObjectives::load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        let low = [0u8; 8];
        let high = [9u8; 8];
        assert_eq!(
            loaded.evaluate(&low, &high),
            simple_set().evaluate(&low, &high)
        );
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.objectives");
        std::fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            WeightedObjectives::load_from_file(&path),
            Err(ObjectiveError::Empty)
        ));
    }
}
