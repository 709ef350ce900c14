//! The committed input movie, with checkpoints for cheap rewinding and
//! a watermark below which the past is frozen.

use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum MovieError {
    #[error("failed to read movie: {0}")]
    Io(#[from] std::io::Error),
    #[error("movie file has a bad header: {0:?}")]
    BadHeader(String),
    #[error("movie line {0} is malformed: {1:?}")]
    Parse(usize, String),
}

const HEADER: &str = "pilot-movie v1";

/// An encoded state snapshot pinned to a movie position, so a rewind
/// can restore the engine without replaying from frame zero.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Codec-encoded engine state at `movie_len`.
    pub state: Vec<u8>,
    /// Movie length at the moment the state was captured.
    pub movie_len: usize,
}

/// The committed movie: every input played so far, a parallel
/// annotation track, and the checkpoint trail. Inputs below the
/// watermark are final and can never be rewound away.
pub struct Movie {
    inputs: Vec<u8>,
    annotations: Vec<String>,
    checkpoints: Vec<Checkpoint>,
    watermark: usize,
}

impl Movie {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            annotations: Vec::new(),
            checkpoints: Vec::new(),
            watermark: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Append one committed input with its annotation.
    pub fn push(&mut self, input: u8, annotation: &str) {
        self.inputs.push(input);
        self.annotations.push(annotation.to_string());
    }

    /// Pin a checkpoint at the current movie length.
    pub fn push_checkpoint(&mut self, state: Vec<u8>) {
        self.checkpoints.push(Checkpoint {
            state,
            movie_len: self.inputs.len(),
        });
    }

    /// Mark everything committed so far as final.
    pub fn raise_watermark(&mut self) {
        self.watermark = self.inputs.len();
    }

    /// Truncate the movie back to `len` inputs. Checkpoints taken past
    /// the cut are dropped in the same motion so the three tracks never
    /// disagree. Rewinding below the watermark is a logic error.
    pub fn rewind(&mut self, len: usize) {
        assert!(
            len >= self.watermark,
            "rewind to {} would cross watermark {}",
            len,
            self.watermark
        );
        assert!(len <= self.inputs.len());
        self.inputs.truncate(len);
        self.annotations.truncate(len);
        self.checkpoints.retain(|cp| cp.movie_len <= len);
    }

    /// Newest checkpoint at least `min_distance` inputs behind the
    /// present and not below the watermark, if any.
    pub fn recent_checkpoint(&self, min_distance: usize) -> Option<&Checkpoint> {
        let len = self.inputs.len();
        self.checkpoints
            .iter()
            .rev()
            .find(|cp| len - cp.movie_len >= min_distance && cp.movie_len >= self.watermark)
    }

    /// Write the text format: a header line, then one input per line as
    /// a decimal byte with an optional tab-separated annotation.
    pub fn write_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut out = String::with_capacity(self.inputs.len() * 6);
        out.push_str(HEADER);
        out.push('\n');
        for (input, annotation) in self.inputs.iter().zip(&self.annotations) {
            if annotation.is_empty() {
                out.push_str(&format!("{}\n", input));
            } else {
                out.push_str(&format!("{}\t{}\n", input, annotation));
            }
        }
        fs::write(path, out)
    }

    /// Read just the input track back from the text format. Checkpoints
    /// and the watermark are runtime state and are not persisted.
    pub fn read_inputs_from_file(path: &Path) -> Result<Vec<u8>, MovieError> {
        let text = fs::read_to_string(path)?;
        let mut lines = text.lines();
        match lines.next() {
            Some(h) if h.trim() == HEADER => {}
            other => return Err(MovieError::BadHeader(other.unwrap_or("").to_string())),
        }
        let mut inputs = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let token = line.split('\t').next().unwrap_or("");
            let input: u8 = token
                .parse()
                .map_err(|_| MovieError::Parse(lineno + 2, line.to_string()))?;
            inputs.push(input);
        }
        Ok(inputs)
    }
}

impl Default for Movie {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewind_truncates_all_three_tracks() {
        let mut movie = Movie::new();
        for i in 0..10u8 {
            movie.push(i, "step");
            if i % 3 == 0 {
                movie.push_checkpoint(vec![i]);
            }
        }
        assert_eq!(movie.len(), 10);
        movie.rewind(5);
        assert_eq!(movie.len(), 5);
        assert_eq!(movie.annotations.len(), 5);
        assert!(movie.checkpoints.iter().all(|cp| cp.movie_len <= 5));
        // Checkpoints at lengths 1 and 4 survive, 7 and 10 do not.
        assert_eq!(movie.checkpoints.len(), 2);
    }

    #[test]
    #[should_panic(expected = "watermark")]
    fn rewind_below_watermark_panics() {
        let mut movie = Movie::new();
        for i in 0..6u8 {
            movie.push(i, "");
        }
        movie.raise_watermark();
        movie.push(9, "");
        movie.rewind(4);
    }

    #[test]
    fn recent_checkpoint_honors_distance_and_watermark() {
        let mut movie = Movie::new();
        for i in 0..20u8 {
            movie.push(i, "");
            if i % 5 == 4 {
                movie.push_checkpoint(vec![i]);
            }
        }
        // Checkpoints at 5, 10, 15, 20.
        let cp = movie.recent_checkpoint(8).unwrap();
        assert_eq!(cp.movie_len, 10);
        assert!(movie.recent_checkpoint(100).is_none());

        movie.raise_watermark();
        assert!(movie.recent_checkpoint(8).is_none());
    }

    #[test]
    fn file_round_trip_preserves_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.movie");
        let mut movie = Movie::new();
        movie.push(128, "motif r4");
        movie.push(0, "");
        movie.push(65, "backtrack opp120");
        movie.write_to_file(&path).unwrap();
        let inputs = Movie::read_inputs_from_file(&path).unwrap();
        assert_eq!(inputs, vec![128, 0, 65]);
    }

    #[test]
    fn bad_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.movie");
        std::fs::write(&path, "not a movie\n1\n2\n").unwrap();
        assert!(matches!(
            Movie::read_inputs_from_file(&path),
            Err(MovieError::BadHeader(_))
        ));
    }
}
