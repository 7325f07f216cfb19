//! Round orchestrator
//!
//! Drives one challenge at a time through
//! fetch, local solve, AI wait, AI solve, verify and submit, and loops until
//! shut down. Foreign solves arrive as [`SolutionNotice`]s; a notice for the
//! active challenge cancels whatever phase is running and ends the round
//! without submitting.

use crate::candidates::{fallback_candidate, CandidatePipeline};
use crate::events::{MinerEvent, Phase};
use crate::ledger::{classify, Ledger, Submission, SubmissionClass, SubmissionOutcome};
use crate::preemption::SolutionNotice;
use crate::worker::{PoolConfig, Solution, SolverProgress, WorkerPool};
use crate::{CandidateText, Challenge, Error, Result, SolverIdentity, Wei};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Progress updates buffered between a pool and the orchestrator
const PROGRESS_BUFFER: usize = 256;

/// Characters of the winning candidate shown in logs
const PREVIEW_CHARS: usize = 60;

/// Round policy
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub identity: SolverIdentity,
    pub pool: PoolConfig,
    /// Protocol fee attached to every submission
    pub submission_fee: Wei,
    pub gas_limit: u64,
    /// Added on top of the network gas price
    pub gas_premium_percent: u64,
    pub pause_interval: Duration,
    pub error_backoff: Duration,
    pub miss_delay: Duration,
}

impl OrchestratorConfig {
    /// Defaults for `identity`
    pub fn new(identity: SolverIdentity) -> Self {
        Self {
            identity,
            pool: PoolConfig::default(),
            submission_fee: Wei::new(1_000_000_000_000_000),
            gas_limit: 500_000,
            gas_premium_percent: 10,
            pause_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            miss_delay: Duration::from_secs(1),
        }
    }
}

/// How a round ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Accepted { challenge_number: u64, tx_hash: String },
    RaceLost { challenge_number: u64 },
    Rejected { challenge_number: u64, reason: String },
    /// Closed before submission, or already finished by an earlier round
    Stale { challenge_number: u64 },
    /// Both waves exhausted without a solution
    Missed { challenge_number: u64, total_hashes: u64 },
    Preempted { challenge_number: u64 },
    Paused,
}

impl RoundOutcome {
    fn challenge_number(&self) -> Option<u64> {
        match self {
            RoundOutcome::Accepted { challenge_number, .. }
            | RoundOutcome::RaceLost { challenge_number }
            | RoundOutcome::Rejected { challenge_number, .. }
            | RoundOutcome::Stale { challenge_number }
            | RoundOutcome::Missed { challenge_number, .. }
            | RoundOutcome::Preempted { challenge_number } => Some(*challenge_number),
            RoundOutcome::Paused => None,
        }
    }

    /// Whether the challenge is known to have a winner
    fn closes_challenge(&self) -> bool {
        matches!(
            self,
            RoundOutcome::Accepted { .. }
                | RoundOutcome::RaceLost { .. }
                | RoundOutcome::Stale { .. }
                | RoundOutcome::Preempted { .. }
        )
    }
}

/// The challenge preemption notices are compared against.
///
/// Number and flag only ever change together in [`ActiveChallenge::activate`].
#[derive(Debug, Default)]
struct ActiveChallenge {
    number: Option<u64>,
    preempted: bool,
}

impl ActiveChallenge {
    fn activate(&mut self, number: u64) {
        *self = Self {
            number: Some(number),
            preempted: false,
        };
    }

    /// Returns true when the notice ends the active round
    fn observe(&mut self, notice: &SolutionNotice) -> bool {
        if self.number == Some(notice.challenge_number) {
            self.preempted = true;
        }
        self.preempted
    }
}

enum Watched<T> {
    Done(T),
    Preempted,
    Shutdown,
}

/// Background remote-wave request, aborted if the round ends first
struct RemoteWave(JoinHandle<Vec<CandidateText>>);

impl Drop for RemoteWave {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives challenge rounds against a ledger
pub struct RoundOrchestrator {
    ledger: Arc<dyn Ledger>,
    pipeline: CandidatePipeline,
    config: OrchestratorConfig,
    notices: mpsc::Receiver<SolutionNotice>,
    events: mpsc::Sender<MinerEvent>,
    active: ActiveChallenge,
    /// Last challenge known to be closed
    settled: Option<u64>,
}

impl RoundOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        ledger: Arc<dyn Ledger>,
        pipeline: CandidatePipeline,
        config: OrchestratorConfig,
        notices: mpsc::Receiver<SolutionNotice>,
        events: mpsc::Sender<MinerEvent>,
    ) -> Self {
        Self {
            ledger,
            pipeline,
            config,
            notices,
            events,
            active: ActiveChallenge::default(),
            settled: None,
        }
    }

    /// Run rounds until `shutdown` is cancelled. Round errors are logged and
    /// retried after a back-off; they never end the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Mining as {} with {} workers on the {} ledger",
            self.config.identity,
            self.config.pool.workers,
            self.ledger.name()
        );
        self.refresh_balances().await;

        while !shutdown.is_cancelled() {
            let delay = match self.run_round(&shutdown).await {
                Ok(RoundOutcome::Paused) => self.config.pause_interval,
                Ok(RoundOutcome::Missed { .. }) | Ok(RoundOutcome::Stale { .. }) => self.config.miss_delay,
                Ok(_) => Duration::ZERO,
                Err(_) if shutdown.is_cancelled() => break,
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Round failed, retrying in {:?}: {}", self.config.error_backoff, e);
                    } else {
                        error!("Round failed: {}", e);
                    }
                    self.emit(MinerEvent::Error {
                        category: e.category(),
                        message: e.to_string(),
                    });
                    self.config.error_backoff
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        info!("Orchestrator stopped");
    }

    /// Run a single round from fetch to outcome
    pub async fn run_round(&mut self, shutdown: &CancellationToken) -> Result<RoundOutcome> {
        if self.ledger.is_paused().await? {
            self.emit(MinerEvent::Paused);
            return Ok(RoundOutcome::Paused);
        }
        let challenge = self.ledger.current_challenge().await?;

        if self.settled == Some(challenge.number) {
            debug!("Challenge #{} already settled, waiting for the next one", challenge.number);
            return Ok(RoundOutcome::Stale {
                challenge_number: challenge.number,
            });
        }

        self.active.activate(challenge.number);

        let span = tracing::info_span!("round", id = %Uuid::new_v4(), challenge = challenge.number);
        let outcome = self.mine(&challenge, shutdown).instrument(span).await?;

        if outcome.closes_challenge() {
            self.settled = outcome.challenge_number();
        }
        Ok(outcome)
    }

    async fn mine(&mut self, challenge: &Challenge, shutdown: &CancellationToken) -> Result<RoundOutcome> {
        let number = challenge.number;
        self.emit(MinerEvent::NewChallenge {
            challenge_number: number,
            seed: challenge.seed,
            difficulty: challenge.difficulty,
            reward: challenge.reward,
        });

        let round = shutdown.child_token();
        let _cancel_round = round.clone().drop_guard();

        // started before the local solve so generation overlaps hashing
        let mut remote = RemoteWave(self.pipeline.spawn_remote_wave(challenge.seed));

        let local = self.pipeline.local_wave(&challenge.seed);
        debug!("Local wave: {} candidates", local.len());
        let mut total_hashes = match self.solve_phase(challenge, &local, Phase::Local, &round).await {
            Watched::Done((Some(solution), _)) => return self.settle(challenge, &local, solution, Phase::Local, &round).await,
            Watched::Done((None, tried)) => tried,
            Watched::Preempted => return Ok(self.preempted(number)),
            Watched::Shutdown => return Err(Error::cancelled("local solve")),
        };

        let remote_candidates = match self.watch(&mut remote.0, &round, None, Phase::Remote).await {
            Watched::Done(Ok(candidates)) => candidates,
            Watched::Done(Err(e)) => {
                warn!("Remote wave task failed, using fallback texts: {}", e);
                (0..self.pipeline.remote_wave_size())
                    .map(|i| fallback_candidate(&challenge.seed, i))
                    .collect()
            }
            Watched::Preempted => return Ok(self.preempted(number)),
            Watched::Shutdown => return Err(Error::cancelled("remote wave")),
        };
        debug!("Remote wave: {} candidates", remote_candidates.len());

        match self.solve_phase(challenge, &remote_candidates, Phase::Remote, &round).await {
            Watched::Done((Some(solution), _)) => {
                return self.settle(challenge, &remote_candidates, solution, Phase::Remote, &round).await
            }
            Watched::Done((None, tried)) => total_hashes += tried,
            Watched::Preempted => return Ok(self.preempted(number)),
            Watched::Shutdown => return Err(Error::cancelled("remote solve")),
        }

        self.emit(MinerEvent::Missed {
            challenge_number: number,
            total_tried: total_hashes,
        });
        Ok(RoundOutcome::Missed {
            challenge_number: number,
            total_hashes,
        })
    }

    /// Hash one wave on a fresh pool
    async fn solve_phase(
        &mut self,
        challenge: &Challenge,
        candidates: &[CandidateText],
        phase: Phase,
        round: &CancellationToken,
    ) -> Watched<(Option<Solution>, u64)> {
        let pool = WorkerPool::new(self.config.pool.clone());
        let identity = self.config.identity;
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);

        let solve = pool.solve(
            &challenge.seed,
            challenge.number,
            &identity,
            candidates,
            &challenge.difficulty_target,
            Some(progress_tx),
            round,
        );

        match self.watch(solve, round, Some(&mut progress_rx), phase).await {
            Watched::Done(result) => {
                while let Ok(update) = progress_rx.try_recv() {
                    self.emit_progress(phase, update);
                }
                Watched::Done((result.solution, result.total_hashes_tried))
            }
            Watched::Preempted => Watched::Preempted,
            Watched::Shutdown => Watched::Shutdown,
        }
    }

    /// Verify the challenge is still open, then submit
    async fn settle(
        &mut self,
        challenge: &Challenge,
        candidates: &[CandidateText],
        solution: Solution,
        phase: Phase,
        round: &CancellationToken,
    ) -> Result<RoundOutcome> {
        let number = challenge.number;
        let candidate = candidates
            .get(solution.candidate_index)
            .cloned()
            .ok_or_else(|| Error::worker(solution.candidate_index, "solution for unknown candidate"))?;

        self.emit(MinerEvent::Found {
            challenge_number: number,
            phase,
            nonce: solution.nonce,
            preview: candidate.preview(PREVIEW_CHARS),
        });

        let ledger = Arc::clone(&self.ledger);
        match self.watch(async move { ledger.is_open(number).await }, round, None, phase).await {
            Watched::Done(Ok(true)) => {}
            Watched::Done(Ok(false)) => {
                self.emit(MinerEvent::Stale { challenge_number: number });
                return Ok(RoundOutcome::Stale { challenge_number: number });
            }
            Watched::Done(Err(e)) => return Err(e),
            Watched::Preempted => return Ok(self.preempted(number)),
            Watched::Shutdown => return Err(Error::cancelled("verify")),
        }

        let network_price = self.ledger.gas_price().await?;
        let gas_price = network_price.with_premium_percent(self.config.gas_premium_percent);

        // last chance to notice a foreign solve before paying for a transaction
        if self.drain_notices() {
            return Ok(self.preempted(number));
        }

        let submission = Submission {
            challenge_number: number,
            solver: self.config.identity,
            candidate,
            nonce: solution.nonce,
            fee: self.config.submission_fee,
            gas_price,
            gas_limit: self.config.gas_limit,
        };
        self.emit(MinerEvent::Submitted {
            challenge_number: number,
            nonce: solution.nonce,
            gas_price,
        });

        let result = self.ledger.submit(&submission).await;
        match (classify(&result), result) {
            (SubmissionClass::Accepted, Ok(SubmissionOutcome::Accepted { tx_hash })) => {
                self.emit(MinerEvent::Accepted {
                    challenge_number: number,
                    tx_hash: tx_hash.clone(),
                });
                self.refresh_balances().await;
                Ok(RoundOutcome::Accepted {
                    challenge_number: number,
                    tx_hash,
                })
            }
            (SubmissionClass::RaceLost, _) => {
                self.emit(MinerEvent::RaceLost { challenge_number: number });
                Ok(RoundOutcome::RaceLost { challenge_number: number })
            }
            (_, result) => {
                let reason = match result {
                    Ok(SubmissionOutcome::Reverted { reason }) => reason,
                    Ok(SubmissionOutcome::Accepted { tx_hash }) => format!("unexpected outcome {}", tx_hash),
                    Err(e) => e.to_string(),
                };
                self.emit(MinerEvent::Rejected {
                    challenge_number: number,
                    reason: reason.clone(),
                });
                Ok(RoundOutcome::Rejected {
                    challenge_number: number,
                    reason,
                })
            }
        }
    }

    /// Drive `fut` while reacting to notices, progress and shutdown
    async fn watch<F: Future>(
        &mut self,
        fut: F,
        round: &CancellationToken,
        mut progress: Option<&mut mpsc::Receiver<SolverProgress>>,
        phase: Phase,
    ) -> Watched<F::Output> {
        let mut fut = pin!(fut);

        loop {
            tokio::select! {
                biased;

                Some(notice) = self.notices.recv() => {
                    if self.active.observe(&notice) {
                        info!("Challenge #{} solved by {}", notice.challenge_number, notice.solver.short());
                        round.cancel();
                        return Watched::Preempted;
                    }
                    debug!("Ignoring solve of #{} by {}", notice.challenge_number, notice.solver.short());
                }
                _ = round.cancelled() => return Watched::Shutdown,
                Some(update) = next_progress(progress.as_deref_mut()) => self.emit_progress(phase, update),
                output = &mut fut => return Watched::Done(output),
            }
        }
    }

    /// Consume queued notices without waiting; true if one preempts
    fn drain_notices(&mut self) -> bool {
        while let Ok(notice) = self.notices.try_recv() {
            if self.active.observe(&notice) {
                return true;
            }
        }
        self.active.preempted
    }

    fn preempted(&self, challenge_number: u64) -> RoundOutcome {
        self.emit(MinerEvent::Preempted { challenge_number });
        RoundOutcome::Preempted { challenge_number }
    }

    async fn refresh_balances(&self) {
        match self.ledger.balances(&self.config.identity).await {
            Ok(balances) => self.emit(MinerEvent::Balances(balances)),
            Err(e) => debug!("Failed to read balances: {}", e),
        }
    }

    fn emit_progress(&self, phase: Phase, update: SolverProgress) {
        self.emit(MinerEvent::Progress {
            phase,
            tried_delta: update.tried_delta,
            total_tried: update.total_tried,
            hash_rate: update.hash_rate,
        });
    }

    fn emit(&self, event: MinerEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropped event: {}", e);
        }
    }
}

async fn next_progress(progress: Option<&mut mpsc::Receiver<SolverProgress>>) -> Option<SolverProgress> {
    match progress {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
