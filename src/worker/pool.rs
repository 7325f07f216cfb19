//! Worker pool driving one solve phase
//!
//! A [`WorkerPool`] fans a batch of candidates out over `workers` OS threads,
//! collects their reports and resolves exactly once: with the first digest
//! found, when every worker has finished, or when the phase is cancelled.
//! Every solve spawns fresh threads, so no state leaks between phases.

use super::{plan_assignments, random_offsets, HashWorker, SearchAssignment, WorkerMessage};
use crate::crypto::DigestPrefix;
use crate::{CandidateText, Nonce, Seed, SolverIdentity, Target};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Messages buffered per worker before a worker blocks on send
const CHANNEL_SLOTS_PER_WORKER: usize = 16;

/// Solve-phase parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of hash threads per phase
    pub workers: usize,
    /// Nonce budget per candidate, split across that candidate's workers
    pub max_nonce: u64,
    /// Hashes between two progress reports of one worker
    pub report_interval: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().saturating_sub(1).max(1),
            max_nonce: 5_000_000,
            report_interval: 50_000,
        }
    }
}

/// A winning (candidate, nonce) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Index into the candidate slice handed to [`WorkerPool::solve`]
    pub candidate_index: usize,
    pub nonce: Nonce,
    pub digest: [u8; 32],
}

/// Result of one solve phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveResult {
    pub solution: Option<Solution>,
    /// Hashes reported by workers; a lower bound when the phase was cut short
    pub total_hashes_tried: u64,
}

impl SolveResult {
    /// Whether a digest below target was found
    pub fn found(&self) -> bool {
        self.solution.is_some()
    }
}

/// Aggregated progress, emitted whenever a worker reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverProgress {
    /// Hashes in the report that triggered this update
    pub tried_delta: u64,
    /// Hashes reported so far in this phase
    pub total_tried: u64,
    /// Sum of the latest per-worker rates
    pub hash_rate: f64,
    /// Workers that have not finished yet
    pub active_workers: usize,
}

/// Fan-out nonce solver
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    /// Create a new pool
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Search the candidates for a nonce whose digest falls below `target`.
    ///
    /// Resolves with the first solution any worker finds; the remaining
    /// workers are stopped and their later reports discarded. Cancelling
    /// `cancellation` resolves the phase as not found.
    #[instrument(skip_all, fields(challenge = challenge_number, candidates = candidates.len()))]
    #[allow(clippy::too_many_arguments)]
    pub async fn solve(
        &self,
        seed: &Seed,
        challenge_number: u64,
        solver: &SolverIdentity,
        candidates: &[CandidateText],
        target: &Target,
        progress: Option<mpsc::Sender<SolverProgress>>,
        cancellation: &CancellationToken,
    ) -> SolveResult {
        if self.config.workers == 0 || candidates.is_empty() {
            debug!("Nothing to solve");
            return SolveResult::default();
        }

        let phase = cancellation.child_token();
        let _stop_on_drop = phase.clone().drop_guard();

        let offsets = random_offsets(candidates.len());
        let assignments = plan_assignments(self.config.workers, self.config.max_nonce, &offsets);
        let (handles, mut rx) = self.spawn_workers(seed, challenge_number, solver, candidates, target, &assignments, &phase);

        let started = Instant::now();
        let worker_count = assignments.len();
        let mut rates = vec![0.0f64; worker_count];
        let mut finished = vec![false; worker_count];
        let mut finished_count = worker_count - handles.len();
        let mut total = 0u64;

        let report = |tried: u64, rates: &[f64], finished_count: usize, total: u64| {
            if let Some(progress) = &progress {
                let _ = progress.try_send(SolverProgress {
                    tried_delta: tried,
                    total_tried: total,
                    hash_rate: rates.iter().sum(),
                    active_workers: worker_count - finished_count,
                });
            }
        };

        let solution = loop {
            if finished_count == worker_count {
                break None;
            }

            tokio::select! {
                biased;

                _ = phase.cancelled() => {
                    debug!("Solve phase cancelled after {} hashes", total);
                    break None;
                }

                message = rx.recv() => {
                    let Some(message) = message else {
                        break None;
                    };
                    let worker_id = message.worker_id();

                    match message {
                        WorkerMessage::Found { candidate_index, nonce, digest, tried, .. } => {
                            total += tried;
                            report(tried, &rates, finished_count, total);
                            phase.cancel();
                            break Some(Solution {
                                candidate_index,
                                nonce: Nonce::new(nonce),
                                digest,
                            });
                        }
                        WorkerMessage::Progress { tried, hash_rate, .. } => {
                            total += tried;
                            rates[worker_id] = hash_rate;
                            report(tried, &rates, finished_count, total);
                        }
                        WorkerMessage::Done { tried, .. } => {
                            total += tried;
                            rates[worker_id] = 0.0;
                            if !std::mem::replace(&mut finished[worker_id], true) {
                                finished_count += 1;
                            }
                            report(tried, &rates, finished_count, total);
                        }
                        WorkerMessage::Crashed { reason, .. } => {
                            warn!("Worker {} lost: {}", worker_id, reason);
                            rates[worker_id] = 0.0;
                            if !std::mem::replace(&mut finished[worker_id], true) {
                                finished_count += 1;
                            }
                        }
                    }
                }
            }
        };

        phase.cancel();
        drop(rx);
        join_workers(handles).await;

        match &solution {
            Some(found) => info!(
                "Found nonce {} for candidate {} after {} hashes in {:.2?}",
                found.nonce,
                found.candidate_index,
                total,
                started.elapsed()
            ),
            None => debug!("No solution after {} hashes in {:.2?}", total, started.elapsed()),
        }

        SolveResult {
            solution,
            total_hashes_tried: total,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_workers(
        &self,
        seed: &Seed,
        challenge_number: u64,
        solver: &SolverIdentity,
        candidates: &[CandidateText],
        target: &Target,
        assignments: &[SearchAssignment],
        phase: &CancellationToken,
    ) -> (Vec<JoinHandle<()>>, mpsc::Receiver<WorkerMessage>) {
        let (tx, rx) = mpsc::channel(assignments.len() * CHANNEL_SLOTS_PER_WORKER);
        let prefixes: Vec<DigestPrefix> = candidates
            .iter()
            .map(|candidate| DigestPrefix::for_candidate(seed, challenge_number, solver, candidate))
            .collect();

        let mut handles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let worker = HashWorker::new(
                *assignment,
                prefixes[assignment.candidate_index],
                *target,
                self.config.report_interval,
                phase.clone(),
                tx.clone(),
            );
            match worker.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Failed to spawn worker {}: {}", assignment.worker_id, e),
            }
        }

        (handles, rx)
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    let joined = tokio::task::spawn_blocking(move || {
        for handle in handles {
            let _ = handle.join();
        }
    })
    .await;

    if let Err(e) = joined {
        warn!("Failed to join hash workers: {}", e);
    }
}
