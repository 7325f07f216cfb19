//! Nonce-search workers
//!
//! A solve phase fans a batch of candidate texts out over a fixed number of
//! [`HashWorker`] threads. This module holds what the pool and its workers
//! share: the search assignment, the worker-to-candidate split and the
//! messages a worker sends back.

use rand::Rng;
use std::time::Duration;

pub mod cpu;
pub mod pool;

pub use cpu::HashWorker;
pub use pool::{PoolConfig, Solution, SolveResult, SolverProgress, WorkerPool};

/// Upper bound (exclusive) of the per-candidate random start offset
pub const MAX_RANDOM_OFFSET: u64 = 2_000_000_000;

/// The nonce sub-range searched by exactly one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchAssignment {
    pub worker_id: usize,
    pub candidate_index: usize,
    /// Inclusive start
    pub nonce_range_start: u64,
    /// Exclusive end
    pub nonce_range_end: u64,
    /// Offset shared by every worker on this candidate
    pub random_offset: u64,
}

impl SearchAssignment {
    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.nonce_range_end - self.nonce_range_start
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages sent from a worker thread to its pool
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// `tried` hashes since the previous report
    Progress {
        worker_id: usize,
        tried: u64,
        hash_rate: f64,
    },
    /// A digest below target; `tried` counts hashes since the previous report,
    /// the winning one included
    Found {
        worker_id: usize,
        candidate_index: usize,
        nonce: u64,
        digest: [u8; 32],
        tried: u64,
    },
    /// Range exhausted; `tried` is the unreported remainder
    Done {
        worker_id: usize,
        tried: u64,
        hash_rate: f64,
    },
    /// The worker died unexpectedly
    Crashed { worker_id: usize, reason: String },
}

impl WorkerMessage {
    /// Id of the sending worker
    pub fn worker_id(&self) -> usize {
        match self {
            WorkerMessage::Progress { worker_id, .. }
            | WorkerMessage::Found { worker_id, .. }
            | WorkerMessage::Done { worker_id, .. }
            | WorkerMessage::Crashed { worker_id, .. } => *worker_id,
        }
    }
}

/// How many workers each candidate receives.
///
/// Worker `i` serves candidate `i % candidate_count`, so when the division is
/// uneven the first `total_workers % candidate_count` candidates get one extra
/// worker. With more candidates than workers the trailing candidates get none.
pub fn workers_per_candidate(total_workers: usize, candidate_count: usize) -> Vec<usize> {
    if candidate_count == 0 {
        return Vec::new();
    }
    let base = total_workers / candidate_count;
    let extra = total_workers % candidate_count;
    (0..candidate_count)
        .map(|c| base + usize::from(c < extra))
        .collect()
}

/// Draw one random start offset per candidate
pub fn random_offsets(candidate_count: usize) -> Vec<u64> {
    let mut rng = rand::rng();
    (0..candidate_count)
        .map(|_| rng.random_range(0..MAX_RANDOM_OFFSET))
        .collect()
}

/// Largest per-candidate nonce budget whose ranges stay inside `u64`
pub const MAX_NONCE_BUDGET: u64 = u64::MAX - MAX_RANDOM_OFFSET;

/// Split the per-candidate nonce budget among that candidate's workers.
///
/// Each of the `k` workers on a candidate gets `max_nonce / k` nonces; the
/// ranges are laid end to end starting at the candidate's offset. Budgets
/// above [`MAX_NONCE_BUDGET`] are clipped at `u64::MAX`.
pub fn plan_assignments(
    total_workers: usize,
    max_nonce: u64,
    offsets: &[u64],
) -> Vec<SearchAssignment> {
    let candidate_count = offsets.len();
    let counts = workers_per_candidate(total_workers, candidate_count);

    (0..total_workers)
        .filter(|_| candidate_count > 0)
        .map(|worker_id| {
            let candidate_index = worker_id % candidate_count;
            let sub_index = (worker_id / candidate_count) as u64;
            let span = max_nonce / counts[candidate_index] as u64;
            let random_offset = offsets[candidate_index];
            let start = random_offset.saturating_add(sub_index.saturating_mul(span));

            SearchAssignment {
                worker_id,
                candidate_index,
                nonce_range_start: start,
                nonce_range_end: start.saturating_add(span),
                random_offset,
            }
        })
        .collect()
}

/// Utility function to compute hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}
