//! Wire protocol between the planning coordinator and its workers.
//!
//! Every message on the wire is a frame: a 4-byte big-endian length
//! prefix followed by exactly that many bytes of bincode payload. A
//! short read is not an error; readers keep reading until the declared
//! length is satisfied or the connection fails. Declared lengths above
//! [`MAX_FRAME`] are rejected before any allocation happens.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hard ceiling on a single frame's payload. Must fit in a u32.
pub const MAX_FRAME: u32 = 1 << 30;

/// One candidate scored against the current future pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Encoded engine state the candidate starts from.
    pub current_state: Vec<u8>,
    /// Candidate action sequence to play next.
    pub candidate: Vec<u8>,
    /// Input sequences of every future in the pool.
    pub futures: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub immediate_score: f64,
    /// Sum over all futures, including the synthetic hold-last future.
    pub futures_score: f64,
    pub best_future_score: f64,
    pub worst_future_score: f64,
    /// Per-future scores, real futures only, in pool order.
    pub future_scores: Vec<f64>,
}

/// Perturbation strategy for a segment-improvement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImproveApproach {
    Random,
    Opposites,
    Ablation,
    Chop,
}

impl ImproveApproach {
    pub fn name(self) -> &'static str {
        match self {
            ImproveApproach::Random => "random",
            ImproveApproach::Opposites => "opposites",
            ImproveApproach::Ablation => "ablation",
            ImproveApproach::Chop => "chop",
        }
    }
}

/// Ask a worker to find replacements for a committed movie segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImproveRequest {
    /// Encoded engine state at the segment's start checkpoint.
    pub start_state: Vec<u8>,
    /// Encoded engine state at the end of the segment as committed.
    pub end_state: Vec<u8>,
    /// The committed actions to improve upon.
    pub segment: Vec<u8>,
    pub approach: ImproveApproach,
    pub iters: u32,
    /// Keep at most this many replacements, best first.
    pub max_best: u32,
    /// Seed label; the worker derives its RNG from this so retried
    /// requests are reproducible.
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub inputs: Vec<u8>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImproveResponse {
    /// Accepted replacements, best score first. Empty means the worker
    /// found nothing better than the original segment.
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkRequest {
    Score(ScoreRequest),
    Improve(ImproveRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkResponse {
    Score(ScoreResponse),
    Improve(ImproveResponse),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("i/o failure on frame: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed connection mid-frame")]
    Closed,
    #[error("declared frame length {0} exceeds limit {MAX_FRAME}")]
    Oversized(u32),
    #[error("malformed frame payload: {0}")]
    Payload(#[from] bincode::Error),
}

/// Put the length prefix on an already-serialized payload.
pub fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
    if payload.len() as u64 > MAX_FRAME as u64 {
        return Err(ProtoError::Oversized(payload.len().min(u32::MAX as usize) as u32));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Serialize a message into a framed byte buffer.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtoError> {
    let payload = bincode::serialize(msg)?;
    frame_payload(&payload)
}

/// Write one framed message to a blocking stream.
pub fn write_frame<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), ProtoError> {
    let frame = encode_frame(msg)?;
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// Read one frame's payload bytes from a blocking stream.
pub fn read_frame_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, ProtoError> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME {
        return Err(ProtoError::Oversized(len));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Read and decode one framed message from a blocking stream.
pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, ProtoError> {
    let payload = read_frame_bytes(r)?;
    Ok(bincode::deserialize(&payload)?)
}

/// Incremental frame reader for non-blocking streams.
///
/// `poll` consumes whatever bytes are available and returns
/// `Ok(Some(payload))` once a whole frame has arrived, `Ok(None)` when
/// the stream would block, and an error on close, oversize, or i/o
/// failure. State carries over between polls, so partial reads are
/// handled transparently.
#[derive(Debug, Default)]
pub struct FrameReader {
    header: [u8; 4],
    header_filled: usize,
    expected: Option<usize>,
    payload: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll<R: Read>(&mut self, r: &mut R) -> Result<Option<Vec<u8>>, ProtoError> {
        if self.expected.is_none() {
            while self.header_filled < 4 {
                match r.read(&mut self.header[self.header_filled..]) {
                    Ok(0) => return Err(ProtoError::Closed),
                    Ok(n) => self.header_filled += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let len = u32::from_be_bytes(self.header);
            if len > MAX_FRAME {
                return Err(ProtoError::Oversized(len));
            }
            self.expected = Some(len as usize);
            self.payload = Vec::with_capacity(len as usize);
        }

        let want = self.expected.unwrap_or(0);
        let mut chunk = [0u8; 4096];
        while self.payload.len() < want {
            let room = (want - self.payload.len()).min(chunk.len());
            match r.read(&mut chunk[..room]) {
                Ok(0) => return Err(ProtoError::Closed),
                Ok(n) => self.payload.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.header_filled = 0;
        self.expected = None;
        Ok(Some(std::mem::take(&mut self.payload)))
    }
}
