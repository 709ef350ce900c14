//! Worker process: a single-threaded request/response server that
//! owns its own engine and cache.

use std::collections::VecDeque;
use std::net::{TcpListener, TcpStream};

use plan_proto::WorkRequest;

use crate::cache::StateCache;
use crate::engine::Engine;
use crate::motifs::Motifs;
use crate::objectives::WeightedObjectives;
use crate::scoring::{self, EvalContext};

/// Exact request/response memory. Keyed on the raw request bytes, so a
/// resubmitted request (after a dropped connection) is answered without
/// recomputing.
struct RequestCache {
    entries: VecDeque<(Vec<u8>, Vec<u8>)>,
    capacity: usize,
}

impl RequestCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, request: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(req, _)| req == request)
            .map(|(_, resp)| resp.as_slice())
    }

    fn insert(&mut self, request: Vec<u8>, response: Vec<u8>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((request, response));
    }
}

pub struct Worker<E: Engine> {
    engine: E,
    cache: StateCache,
    objectives: WeightedObjectives,
    motifs: Motifs,
    /// Codec basis, captured from the engine's own genesis state so it
    /// matches every other process started from the same game.
    basis: Vec<u8>,
    recent: RequestCache,
}

impl<E: Engine> Worker<E> {
    pub fn new(
        engine: E,
        cache: StateCache,
        objectives: WeightedObjectives,
        motifs: Motifs,
    ) -> Self {
        let basis = engine.save();
        Self {
            engine,
            cache,
            objectives,
            motifs,
            basis,
            recent: RequestCache::new(8),
        }
    }

    pub fn serve(&mut self, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        log::info!("worker listening on {}", listener.local_addr()?);
        self.serve_listener(listener)
    }

    /// Accept, fully service one request, hang up, repeat. Any fault on
    /// a connection is logged and dropped; the coordinator resubmits.
    pub fn serve_listener(&mut self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.serve_one(stream) {
                log::warn!("connection dropped: {}", e);
            }
        }
    }

    fn serve_one(&mut self, mut stream: TcpStream) -> Result<(), anyhow::Error> {
        stream.set_nodelay(true)?;
        let request_bytes = plan_proto::read_frame_bytes(&mut stream)?;

        if let Some(response) = self.recent.get(&request_bytes) {
            log::debug!("request served from the recent cache");
            let frame = plan_proto::frame_payload(response)?;
            std::io::Write::write_all(&mut stream, &frame)?;
            return Ok(());
        }

        let request: WorkRequest = bincode::deserialize(&request_bytes)?;
        log::debug!("serving {}", request_name(&request));

        let mut ctx = EvalContext {
            engine: &mut self.engine,
            cache: &mut self.cache,
            objectives: &self.objectives,
            basis: Some(&self.basis),
        };
        let response = scoring::execute(&mut ctx, &self.motifs, &request)?;
        let payload = bincode::serialize(&response)?;
        let frame = plan_proto::frame_payload(&payload)?;
        std::io::Write::write_all(&mut stream, &frame)?;
        self.recent.insert(request_bytes, payload);
        Ok(())
    }
}

fn request_name(request: &WorkRequest) -> &'static str {
    match request {
        WorkRequest::Score(_) => "score",
        WorkRequest::Improve(req) => req.approach.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_cache_holds_the_most_recent_entries() {
        let mut cache = RequestCache::new(3);
        for i in 0..5u8 {
            cache.insert(vec![i], vec![i, i]);
        }
        // The first two were pushed out.
        assert!(cache.get(&[0]).is_none());
        assert!(cache.get(&[1]).is_none());
        assert_eq!(cache.get(&[2]), Some(&[2, 2][..]));
        assert_eq!(cache.get(&[4]), Some(&[4, 4][..]));
    }

    #[test]
    fn request_cache_matches_on_exact_bytes() {
        let mut cache = RequestCache::new(2);
        cache.insert(vec![1, 2, 3], vec![9]);
        assert!(cache.get(&[1, 2]).is_none());
        assert!(cache.get(&[1, 2, 3, 4]).is_none());
        assert_eq!(cache.get(&[1, 2, 3]), Some(&[9][..]));
    }
}
