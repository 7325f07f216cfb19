//! AI Mine Client
//!
//! A Proof-of-AI-Work mining client:
//! - Multi-threaded keccak nonce search over many candidate texts at once
//! - Instant local candidates followed by an AI-generated wave
//! - Preemption as soon as another miner solves the active challenge
//! - Race-aware submission with structured outcomes
//! - Simulated ledger for dry runs and tests

pub mod candidates;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod generator;
pub mod ledger;
pub mod orchestrator;
pub mod preemption;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "aimine-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
