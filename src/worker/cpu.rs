//! CPU hash worker
//!
//! One worker owns one OS thread and one [`SearchAssignment`]. It walks its
//! nonce range in increasing order, hashing the candidate prefix with each
//! nonce, and reports back to the pool over a bounded channel.

use super::{compute_hash_rate, SearchAssignment, WorkerMessage};
use crate::crypto::{DigestPrefix, KeccakHasher, Preimage};
use crate::Target;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Hashes between two checks of the stop signal
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// How a worker's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Reported a digest below target
    Found,
    /// Walked the whole range
    Exhausted,
    /// Saw the stop signal
    Stopped,
    /// The pool stopped listening
    Disconnected,
}

/// Single-threaded nonce search over one sub-range
pub struct HashWorker {
    assignment: SearchAssignment,
    prefix: DigestPrefix,
    target: Target,
    report_interval: u64,
    cancellation: CancellationToken,
    tx: mpsc::Sender<WorkerMessage>,
}

impl HashWorker {
    /// Create a new worker
    pub fn new(
        assignment: SearchAssignment,
        prefix: DigestPrefix,
        target: Target,
        report_interval: u64,
        cancellation: CancellationToken,
        tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            assignment,
            prefix,
            target,
            report_interval,
            cancellation,
            tx,
        }
    }

    /// Run on a dedicated, named OS thread.
    ///
    /// A panic inside the search loop is caught and reported as
    /// [`WorkerMessage::Crashed`] so the pool never waits on a dead worker.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        let name = format!("hash-worker-{}", self.assignment.worker_id);
        thread::Builder::new().name(name).spawn(move || {
            let worker_id = self.assignment.worker_id;
            let tx = self.tx.clone();

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                let reason = panic_reason(payload.as_ref());
                warn!("Hash worker {} crashed: {}", worker_id, reason);
                let _ = tx.blocking_send(WorkerMessage::Crashed { worker_id, reason });
            }
        })
    }

    /// Search the assigned range on the current thread.
    ///
    /// Uses blocking sends, so it must not be called from inside an async
    /// task.
    pub fn run(self) -> WorkerExit {
        let SearchAssignment {
            worker_id,
            candidate_index,
            nonce_range_start,
            nonce_range_end,
            ..
        } = self.assignment;

        let _span = tracing::debug_span!("hash_worker", worker_id, candidate = candidate_index).entered();
        debug!("Searching nonces {}..{}", nonce_range_start, nonce_range_end);

        let started = Instant::now();
        let mut hasher = KeccakHasher::new();
        let mut preimage = Preimage::new(&self.prefix);
        let mut tried = 0u64;
        let mut reported = 0u64;

        for nonce in nonce_range_start..nonce_range_end {
            if tried % CANCEL_CHECK_INTERVAL == 0 && self.cancellation.is_cancelled() {
                debug!("Stopped after {} hashes", tried);
                return WorkerExit::Stopped;
            }

            preimage.set_nonce(nonce);
            let (meets_target, digest) = hasher.hash_and_check(preimage.as_bytes(), &self.target);
            tried += 1;

            if meets_target {
                debug!("Digest below target at nonce {}", nonce);
                let _ = self.tx.blocking_send(WorkerMessage::Found {
                    worker_id,
                    candidate_index,
                    nonce,
                    digest,
                    tried: tried - reported,
                });
                return WorkerExit::Found;
            }

            if tried % self.report_interval == 0 {
                let hash_rate = compute_hash_rate(tried, started.elapsed());
                let sent = self.tx.blocking_send(WorkerMessage::Progress {
                    worker_id,
                    tried: tried - reported,
                    hash_rate,
                });
                if sent.is_err() {
                    trace!("Pool gone, exiting");
                    return WorkerExit::Disconnected;
                }
                reported = tried;
            }
        }

        let hash_rate = compute_hash_rate(tried, started.elapsed());
        let _ = self.tx.blocking_send(WorkerMessage::Done {
            worker_id,
            tried: tried - reported,
            hash_rate,
        });
        debug!("Range exhausted after {} hashes", tried);
        WorkerExit::Exhausted
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
