//! Presentation events
//!
//! The orchestrator and the preemption monitor describe what they are doing
//! as [`MinerEvent`]s on a bounded channel. [`LogSink`] is the default
//! consumer and renders them as log lines.

use crate::ledger::MinerBalances;
use crate::utils::{format_duration, format_hash_rate};
use crate::{Nonce, Seed, SolverIdentity, Wei};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events buffered before senders start dropping them
pub const EVENT_BUFFER: usize = 1024;

/// Minimum time between two progress log lines
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Which candidate wave a solve phase is hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Local,
    Remote,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Local => write!(f, "local"),
            Phase::Remote => write!(f, "ai"),
        }
    }
}

/// Something worth showing to the operator
#[derive(Debug, Clone, PartialEq)]
pub enum MinerEvent {
    NewChallenge {
        challenge_number: u64,
        seed: Seed,
        difficulty: u64,
        reward: Wei,
    },
    Progress {
        phase: Phase,
        tried_delta: u64,
        total_tried: u64,
        hash_rate: f64,
    },
    Found {
        challenge_number: u64,
        phase: Phase,
        nonce: Nonce,
        preview: String,
    },
    Submitted {
        challenge_number: u64,
        nonce: Nonce,
        gas_price: Wei,
    },
    Accepted {
        challenge_number: u64,
        tx_hash: String,
    },
    RaceLost {
        challenge_number: u64,
    },
    Rejected {
        challenge_number: u64,
        reason: String,
    },
    Stale {
        challenge_number: u64,
    },
    Missed {
        challenge_number: u64,
        total_tried: u64,
    },
    Preempted {
        challenge_number: u64,
    },
    Paused,
    /// Any solver's accepted solution, ours included
    NetworkSolution {
        solver: SolverIdentity,
        challenge_number: u64,
    },
    Balances(MinerBalances),
    Error {
        category: &'static str,
        message: String,
    },
}

/// Counters kept by the log sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub challenges: u64,
    pub accepted: u64,
    pub race_lost: u64,
    pub rejected: u64,
    pub missed: u64,
    pub preempted: u64,
    pub errors: u64,
    pub hashes: u64,
}

/// Event consumer that writes to the tracing subscriber
pub struct LogSink {
    rx: mpsc::Receiver<MinerEvent>,
    stats: SessionStats,
    started: Instant,
    last_progress_log: Option<Instant>,
}

impl LogSink {
    /// Create a new sink
    pub fn new(rx: mpsc::Receiver<MinerEvent>) -> Self {
        Self {
            rx,
            stats: SessionStats::default(),
            started: Instant::now(),
            last_progress_log: None,
        }
    }

    /// Consume events until every sender is gone
    pub async fn run(mut self) -> SessionStats {
        while let Some(event) = self.rx.recv().await {
            self.handle(event);
        }

        info!(
            "Session over after {}: {} challenges, {} accepted, {} lost races, {} rejected, {} missed, {} preempted",
            format_duration(self.started.elapsed().as_secs()),
            self.stats.challenges,
            self.stats.accepted,
            self.stats.race_lost,
            self.stats.rejected,
            self.stats.missed,
            self.stats.preempted
        );
        self.stats
    }

    fn handle(&mut self, event: MinerEvent) {
        match event {
            MinerEvent::NewChallenge {
                challenge_number,
                seed,
                difficulty,
                reward,
            } => {
                self.stats.challenges += 1;
                info!(
                    "New challenge #{} seed={} difficulty={} reward={}",
                    challenge_number,
                    seed.short(),
                    difficulty,
                    reward.format_units()
                );
            }
            MinerEvent::Progress {
                phase,
                tried_delta,
                total_tried,
                hash_rate,
            } => {
                self.stats.hashes += tried_delta;
                let due = self
                    .last_progress_log
                    .map_or(true, |at| at.elapsed() >= PROGRESS_LOG_INTERVAL);
                if due {
                    self.last_progress_log = Some(Instant::now());
                    info!("[{}] {} hashes, {}", phase, total_tried, format_hash_rate(hash_rate));
                }
            }
            MinerEvent::Found {
                challenge_number,
                phase,
                nonce,
                preview,
            } => info!("[{}] Solution for #{} at nonce {}: {}", phase, challenge_number, nonce, preview),
            MinerEvent::Submitted {
                challenge_number,
                nonce,
                gas_price,
            } => info!("Submitting #{} nonce {} at gas price {}", challenge_number, nonce, gas_price),
            MinerEvent::Accepted {
                challenge_number,
                tx_hash,
            } => {
                self.stats.accepted += 1;
                info!("Solution for #{} accepted in {}", challenge_number, tx_hash);
            }
            MinerEvent::RaceLost { challenge_number } => {
                self.stats.race_lost += 1;
                warn!("Challenge #{} was solved first by another miner", challenge_number);
            }
            MinerEvent::Rejected {
                challenge_number,
                reason,
            } => {
                self.stats.rejected += 1;
                warn!("Solution for #{} rejected: {}", challenge_number, reason);
            }
            MinerEvent::Stale { challenge_number } => {
                info!("Challenge #{} closed before submission, skipping", challenge_number)
            }
            MinerEvent::Missed {
                challenge_number,
                total_tried,
            } => {
                self.stats.missed += 1;
                info!("No solution for #{} after {} hashes", challenge_number, total_tried);
            }
            MinerEvent::Preempted { challenge_number } => {
                self.stats.preempted += 1;
                info!("Challenge #{} solved elsewhere, abandoning round", challenge_number);
            }
            MinerEvent::Paused => warn!("Mining is paused on the ledger"),
            MinerEvent::NetworkSolution {
                solver,
                challenge_number,
            } => debug!("Challenge #{} solved by {}", challenge_number, solver.short()),
            MinerEvent::Balances(balances) => info!(
                "Balances: native={} token={} solutions={}",
                balances.native.format_units(),
                balances.token.format_units(),
                balances.solutions
            ),
            MinerEvent::Error { category, message } => {
                self.stats.errors += 1;
                error!("Round failed ({}): {}", category, message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_counts_outcomes() {
        let (tx, rx) = mpsc::channel(16);
        let sink = tokio::spawn(LogSink::new(rx).run());

        tx.send(MinerEvent::NewChallenge {
            challenge_number: 1,
            seed: Seed([0; 32]),
            difficulty: 8,
            reward: Wei::new(1),
        })
        .await
        .unwrap();
        for total in [100, 200] {
            tx.send(MinerEvent::Progress {
                phase: Phase::Local,
                tried_delta: 100,
                total_tried: total,
                hash_rate: 10.0,
            })
            .await
            .unwrap();
        }
        tx.send(MinerEvent::Accepted {
            challenge_number: 1,
            tx_hash: "0x00".into(),
        })
        .await
        .unwrap();
        tx.send(MinerEvent::Preempted { challenge_number: 2 }).await.unwrap();
        drop(tx);

        let stats = sink.await.unwrap();
        assert_eq!(stats.challenges, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.preempted, 1);
        assert_eq!(stats.hashes, 200);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Local.to_string(), "local");
        assert_eq!(Phase::Remote.to_string(), "ai");
    }
}
