//! Fan-out of independent work units across worker processes.
//!
//! Each worker services one connection per request and hangs up, so a
//! unit's lifecycle is connect, send, wait, read. The dispatcher keeps
//! one in-flight unit per worker, polls all pending responses without
//! blocking on any single one, and retries a unit on its worker after
//! any connection fault. Results always come back in unit order.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use plan_proto::{FrameReader, WorkRequest, WorkResponse};

const POLL_SLEEP: Duration = Duration::from_millis(10);
const PROGRESS_EVERY: Duration = Duration::from_secs(1);

struct Conn {
    stream: TcpStream,
    reader: FrameReader,
}

struct Slot {
    port: u16,
    /// Index of the unit this worker is responsible for, if any. A
    /// faulted connection keeps the assignment; the unit is retried on
    /// the same worker until it succeeds.
    assigned: Option<usize>,
    conn: Option<Conn>,
}

/// Dispatches work units to workers on localhost ports, falling back
/// to sequential local execution when no ports are configured.
pub struct Dispatcher {
    ports: Vec<u16>,
}

impl Dispatcher {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }

    pub fn num_workers(&self) -> usize {
        self.ports.len()
    }

    /// Complete every unit and return one response per unit, in the
    /// units' original order. `local` computes a unit in-process and is
    /// only consulted when no workers are configured.
    pub fn run(
        &self,
        requests: &[WorkRequest],
        local: &mut dyn FnMut(&WorkRequest) -> WorkResponse,
    ) -> Vec<WorkResponse> {
        if self.ports.is_empty() {
            return requests.iter().map(local).collect();
        }
        self.run_remote(requests)
    }

    fn run_remote(&self, requests: &[WorkRequest]) -> Vec<WorkResponse> {
        let mut results: Vec<Option<WorkResponse>> = vec![None; requests.len()];
        let mut pending: VecDeque<usize> = (0..requests.len()).collect();
        let mut slots: Vec<Slot> = self
            .ports
            .iter()
            .map(|&port| Slot {
                port,
                assigned: None,
                conn: None,
            })
            .collect();

        let mut done = 0usize;
        let mut last_report = Instant::now();
        while done < requests.len() {
            let mut progressed = false;

            for slot in &mut slots {
                if slot.assigned.is_none() {
                    slot.assigned = pending.pop_front();
                }
                let Some(unit) = slot.assigned else {
                    continue;
                };

                if slot.conn.is_none() {
                    match open_and_send(slot.port, &requests[unit]) {
                        Ok(conn) => {
                            slot.conn = Some(conn);
                            progressed = true;
                        }
                        Err(e) => {
                            log::warn!("worker :{} unreachable for unit {}: {}", slot.port, unit, e);
                        }
                    }
                    continue;
                }

                let conn = slot.conn.as_mut().expect("checked above");
                match conn.reader.poll(&mut conn.stream) {
                    Ok(Some(payload)) => match bincode::deserialize::<WorkResponse>(&payload) {
                        Ok(response) => {
                            results[unit] = Some(response);
                            done += 1;
                            slot.assigned = None;
                            slot.conn = None;
                            progressed = true;
                        }
                        Err(e) => {
                            log::warn!("worker :{} sent garbage for unit {}: {}", slot.port, unit, e);
                            slot.conn = None;
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("worker :{} failed on unit {}: {}", slot.port, unit, e);
                        slot.conn = None;
                    }
                }
            }

            if last_report.elapsed() >= PROGRESS_EVERY {
                log::info!("dispatch: {}/{} units done", done, requests.len());
                last_report = Instant::now();
            }
            if !progressed && done < requests.len() {
                std::thread::sleep(POLL_SLEEP);
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every unit completed by loop condition"))
            .collect()
    }
}

/// Connect, send the request while still blocking, then switch the
/// stream to non-blocking for the response poll.
fn open_and_send(port: u16, request: &WorkRequest) -> Result<Conn, plan_proto::ProtoError> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_nodelay(true)?;
    plan_proto::write_frame(&mut stream, request)?;
    stream.set_nonblocking(true)?;
    Ok(Conn {
        stream,
        reader: FrameReader::new(),
    })
}
