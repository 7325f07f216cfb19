//! Ledger collaborators
//!
//! The ledger issues challenges, records winners and verifies submitted
//! solutions. The miner only reads from it, submits to it and listens to its
//! solution events; [`Ledger`] is the seam between the two.

use crate::{CandidateText, Challenge, Error, Nonce, Result, SolverIdentity, Wei};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

pub mod http;
pub mod simulation;

pub use http::HttpLedger;
pub use simulation::SimulatedLedger;

/// Revert text the ledger uses once a challenge has a winner
pub const ALREADY_SOLVED: &str = "already solved";

/// A solution ready to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub challenge_number: u64,
    pub solver: SolverIdentity,
    #[serde(with = "candidate_hex")]
    pub candidate: CandidateText,
    pub nonce: Nonce,
    /// Protocol fee attached to the submission
    pub fee: Wei,
    pub gas_price: Wei,
    pub gas_limit: u64,
}

/// What the ledger did with a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubmissionOutcome {
    /// Included and accepted
    Accepted {
        #[serde(rename = "txHash")]
        tx_hash: String,
    },
    /// Included but reverted
    Reverted { reason: String },
}

/// How a submission attempt ended, from the round's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionClass {
    Accepted,
    /// Someone else won between our verify and our inclusion
    RaceLost,
    Rejected,
}

impl fmt::Display for SubmissionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionClass::Accepted => write!(f, "accepted"),
            SubmissionClass::RaceLost => write!(f, "race lost"),
            SubmissionClass::Rejected => write!(f, "rejected"),
        }
    }
}

/// Classify a revert reason or submit error message
pub fn classify_failure(message: &str) -> SubmissionClass {
    if message.to_ascii_lowercase().contains(ALREADY_SOLVED) {
        SubmissionClass::RaceLost
    } else {
        SubmissionClass::Rejected
    }
}

/// Classify the result of [`Ledger::submit`]
pub fn classify(result: &Result<SubmissionOutcome>) -> SubmissionClass {
    match result {
        Ok(SubmissionOutcome::Accepted { .. }) => SubmissionClass::Accepted,
        Ok(SubmissionOutcome::Reverted { reason }) => classify_failure(reason),
        Err(e) => classify_failure(&e.to_string()),
    }
}

/// An accepted solution from any solver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionAccepted {
    pub solver: SolverIdentity,
    pub challenge_number: u64,
    #[serde(default)]
    pub reward: Wei,
}

/// Balances and totals of one solver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerBalances {
    /// Native currency for fees
    pub native: Wei,
    /// Reward token
    pub token: Wei,
    pub solutions: u64,
    pub rewards: Wei,
}

/// Stream of accepted solutions; ends only when the ledger goes away
pub type SolutionStream = Pin<Box<dyn Stream<Item = SolutionAccepted> + Send>>;

/// Source of challenges and judge of solutions
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Challenge currently open for solving
    async fn current_challenge(&self) -> Result<Challenge>;

    /// Whether submissions are currently suspended
    async fn is_paused(&self) -> Result<bool>;

    /// Whether `challenge_number` has no recorded winner yet
    async fn is_open(&self, challenge_number: u64) -> Result<bool>;

    /// Current network fee per gas unit
    async fn gas_price(&self) -> Result<Wei>;

    /// Send a solution and wait for its inclusion
    async fn submit(&self, submission: &Submission) -> Result<SubmissionOutcome>;

    /// Subscribe to accepted solutions from every solver
    async fn subscribe(&self) -> Result<SolutionStream>;

    /// Balances of `solver`
    async fn balances(&self, solver: &SolverIdentity) -> Result<MinerBalances>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

mod candidate_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(candidate: &CandidateText, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(candidate.as_bytes())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<CandidateText, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        CandidateText::new(bytes).map_err(|e: Error| serde::de::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_outcomes() {
        let accepted = Ok(SubmissionOutcome::Accepted { tx_hash: "0x01".into() });
        assert_eq!(classify(&accepted), SubmissionClass::Accepted);

        let raced = Ok(SubmissionOutcome::Reverted {
            reason: "Challenge already solved".into(),
        });
        assert_eq!(classify(&raced), SubmissionClass::RaceLost);

        let short = Ok(SubmissionOutcome::Reverted {
            reason: "Solution too short".into(),
        });
        assert_eq!(classify(&short), SubmissionClass::Rejected);
    }

    #[test]
    fn test_classify_errors() {
        let raced: Result<SubmissionOutcome> = Err(Error::submission("execution reverted: Already Solved"));
        assert_eq!(classify(&raced), SubmissionClass::RaceLost);

        let fee: Result<SubmissionOutcome> = Err(Error::submission("Insufficient protocol fee"));
        assert_eq!(classify(&fee), SubmissionClass::Rejected);
    }

    #[test]
    fn test_submission_json() {
        let submission = Submission {
            challenge_number: 7,
            solver: SolverIdentity([0x11; 20]),
            candidate: CandidateText::new(vec![b'z'; 100]).unwrap(),
            nonce: Nonce::new(99),
            fee: Wei::new(1_000),
            gas_price: Wei::new(5),
            gas_limit: 500_000,
        };

        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["challengeNumber"], 7);
        assert_eq!(json["gasLimit"], 500_000);
        assert!(json["candidate"].as_str().unwrap().starts_with("0x7a7a"));

        let back: Submission = serde_json::from_value(json).unwrap();
        assert_eq!(back, submission);
    }

    #[test]
    fn test_outcome_json() {
        let outcome: SubmissionOutcome =
            serde_json::from_str(r#"{"status":"reverted","reason":"Solution too long"}"#).unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Reverted {
                reason: "Solution too long".into()
            }
        );

        let outcome: SubmissionOutcome = serde_json::from_str(r#"{"status":"accepted","txHash":"0xab"}"#).unwrap();
        assert_eq!(outcome, SubmissionOutcome::Accepted { tx_hash: "0xab".into() });
    }
}
