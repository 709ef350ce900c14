use std::net::TcpListener;

use core_plan::{Motifs, StateCache, ToyEngine, WeightedObjectives, Worker};

/// Objectives over the toy game's memory: furthest x, then coins, then
/// raw position.
pub fn toy_objectives() -> WeightedObjectives {
    WeightedObjectives::new(vec![(1.0, vec![2]), (0.5, vec![3]), (0.1, vec![0])])
}

pub fn toy_motifs() -> Motifs {
    Motifs::new(vec![vec![0x80; 4], vec![0x00; 4]])
}

/// Start a real worker on an ephemeral port and return the port. The
/// worker thread serves until the process exits.
pub fn spawn_worker() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    std::thread::spawn(move || {
        let mut worker = Worker::new(
            ToyEngine::new(),
            StateCache::new(4096, 256),
            toy_objectives(),
            toy_motifs(),
        );
        let _ = worker.serve_listener(listener);
    });
    port
}
