//! In-process ledger
//!
//! Holds one open challenge at a time and verifies submissions the way the
//! mining contract does: fee, candidate length, open challenge and
//! `digest < target`. Every accepted solution is broadcast to subscribers and
//! opens the next challenge with a fresh random seed.

use super::{Ledger, MinerBalances, SolutionAccepted, SolutionStream, Submission, SubmissionOutcome, ALREADY_SOLVED};
use crate::crypto::{keccak256, solution_digest};
use crate::{CandidateText, Challenge, Result, Seed, SolverIdentity, Target, Wei};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// One native token in wei
const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Minimum protocol fee: 0.001 native token
pub const DEFAULT_MIN_FEE: Wei = Wei(ONE_TOKEN / 1_000);

const DEFAULT_REWARD: Wei = Wei(50 * ONE_TOKEN);
const DEFAULT_GAS_PRICE: Wei = Wei(3_000_000_000);
const STARTING_NATIVE_BALANCE: Wei = Wei(ONE_TOKEN);
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ChainState {
    challenge: Challenge,
    paused: bool,
    gas_price: Wei,
    winners: HashMap<u64, SolverIdentity>,
    balances: HashMap<SolverIdentity, MinerBalances>,
    submissions: u64,
    transactions: u64,
}

impl ChainState {
    fn open_next(&mut self) {
        self.challenge = Challenge {
            number: self.challenge.number + 1,
            seed: Seed::random(),
            ..self.challenge.clone()
        };
        debug!("Opened challenge {}", self.challenge.number);
    }

    fn account(&mut self, solver: SolverIdentity) -> &mut MinerBalances {
        self.balances.entry(solver).or_insert_with(|| MinerBalances {
            native: STARTING_NATIVE_BALANCE,
            ..MinerBalances::default()
        })
    }

    /// Record a win for the open challenge and move on
    fn record_win(&mut self, solver: SolverIdentity) -> SolutionAccepted {
        let number = self.challenge.number;
        let reward = self.challenge.reward;
        self.winners.insert(number, solver);

        let account = self.account(solver);
        account.solutions += 1;
        account.token = Wei(account.token.value() + reward.value());
        account.rewards = Wei(account.rewards.value() + reward.value());

        self.open_next();
        SolutionAccepted {
            solver,
            challenge_number: number,
            reward,
        }
    }

    fn verify(&self, submission: &Submission, min_fee: Wei) -> std::result::Result<(), &'static str> {
        if self.paused {
            return Err("EnforcedPause");
        }
        if submission.fee < min_fee {
            return Err("Insufficient protocol fee");
        }
        if submission.candidate.len() < CandidateText::MIN_LEN {
            return Err("Solution too short");
        }
        if submission.candidate.len() > CandidateText::MAX_LEN {
            return Err("Solution too long");
        }
        if submission.challenge_number != self.challenge.number
            || self.winners.contains_key(&submission.challenge_number)
        {
            return Err("Challenge already solved");
        }

        let digest = solution_digest(
            &self.challenge.seed,
            self.challenge.number,
            &submission.solver,
            &submission.candidate,
            submission.nonce,
        );
        if !self.challenge.difficulty_target.is_met_by(&digest) {
            return Err("Hash does not meet difficulty target");
        }
        Ok(())
    }
}

/// Ledger living inside the miner process
pub struct SimulatedLedger {
    state: Mutex<ChainState>,
    events: broadcast::Sender<SolutionAccepted>,
    min_fee: Wei,
}

impl SimulatedLedger {
    /// Start at challenge 1 with a target of `difficulty_bits` leading zero bits
    pub fn new(difficulty_bits: u32) -> Self {
        let challenge = Challenge {
            number: 1,
            seed: Seed::random(),
            difficulty: u64::from(difficulty_bits),
            difficulty_target: Target::from_leading_zero_bits(difficulty_bits),
            reward: DEFAULT_REWARD,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Mutex::new(ChainState {
                challenge,
                paused: false,
                gas_price: DEFAULT_GAS_PRICE,
                winners: HashMap::new(),
                balances: HashMap::new(),
                submissions: 0,
                transactions: 0,
            }),
            events,
            min_fee: DEFAULT_MIN_FEE,
        }
    }

    /// Require a different protocol fee
    pub fn with_min_fee(mut self, fee: Wei) -> Self {
        self.min_fee = fee;
        self
    }

    /// Snapshot of the open challenge
    pub fn challenge(&self) -> Challenge {
        self.state.lock().challenge.clone()
    }

    /// Suspend or resume submissions
    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Change the target of the open and all later challenges
    pub fn set_target(&self, target: Target) {
        let mut state = self.state.lock();
        state.challenge.difficulty_target = target;
        state.challenge.difficulty = u64::from(target.difficulty_level());
    }

    /// Set the network fee per gas unit
    pub fn set_gas_price(&self, price: Wei) {
        self.state.lock().gas_price = price;
    }

    /// Let another solver win the open challenge; returns its number
    pub fn inject_foreign_solve(&self, solver: SolverIdentity) -> u64 {
        let event = self.state.lock().record_win(solver);
        info!("Challenge {} solved by {}", event.challenge_number, solver.short());
        let number = event.challenge_number;
        let _ = self.events.send(event);
        number
    }

    /// Broadcast a solution event without touching chain state
    pub fn emit_event(&self, event: SolutionAccepted) {
        let _ = self.events.send(event);
    }

    /// Winner recorded for `challenge_number`
    pub fn winner(&self, challenge_number: u64) -> Option<SolverIdentity> {
        self.state.lock().winners.get(&challenge_number).copied()
    }

    /// Submissions received, accepted or not
    pub fn submission_count(&self) -> u64 {
        self.state.lock().submissions
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    async fn current_challenge(&self) -> Result<Challenge> {
        Ok(self.challenge())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().paused)
    }

    async fn is_open(&self, challenge_number: u64) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.challenge.number == challenge_number && !state.winners.contains_key(&challenge_number))
    }

    async fn gas_price(&self) -> Result<Wei> {
        Ok(self.state.lock().gas_price)
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmissionOutcome> {
        let (outcome, event) = {
            let mut state = self.state.lock();
            state.submissions += 1;
            state.transactions += 1;
            let tx_hash = format!("0x{}", hex::encode(keccak256(&state.transactions.to_be_bytes())));

            let gas_cost = submission.gas_price.value().saturating_mul(u128::from(submission.gas_limit));
            let account = state.account(submission.solver);
            account.native = Wei(account.native.value().saturating_sub(gas_cost));

            match state.verify(submission, self.min_fee) {
                Ok(()) => {
                    let account = state.account(submission.solver);
                    account.native = Wei(account.native.value().saturating_sub(submission.fee.value()));
                    let event = state.record_win(submission.solver);
                    (SubmissionOutcome::Accepted { tx_hash }, Some(event))
                }
                Err(reason) => (
                    SubmissionOutcome::Reverted {
                        reason: reason.to_string(),
                    },
                    None,
                ),
            }
        };

        match &event {
            Some(event) => info!("Challenge {} solved by {}", event.challenge_number, event.solver.short()),
            None => warn!("Submission for challenge {} reverted: {:?}", submission.challenge_number, outcome),
        }
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        Ok(outcome)
    }

    async fn subscribe(&self) -> Result<SolutionStream> {
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => warn!("Solution subscriber skipped {} events", skipped),
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn balances(&self, solver: &SolverIdentity) -> Result<MinerBalances> {
        Ok(self.state.lock().account(*solver).clone())
    }

    fn name(&self) -> &'static str {
        "simulation"
    }
}
