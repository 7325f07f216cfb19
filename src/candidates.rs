//! Candidate text pipeline
//!
//! Every round searches two waves of candidates. The local wave is built
//! in-process and is available immediately; the remote wave comes from a
//! [`TextGenerator`] and is fetched in the background while the local wave is
//! being hashed. Both waves always contain exactly the requested number of
//! valid-length texts.

use crate::generator::TextGenerator;
use crate::utils::current_timestamp_millis;
use crate::{CandidateText, Seed};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Characters of random filler mixed into each generated text
const ENTROPY_LEN: usize = 24;

/// Supplies the local and remote candidate waves of a round
#[derive(Clone)]
pub struct CandidatePipeline {
    generator: Arc<dyn TextGenerator>,
    workers: usize,
    remote_batch_size: usize,
}

impl CandidatePipeline {
    /// Create a new pipeline
    pub fn new(generator: Arc<dyn TextGenerator>, workers: usize, remote_batch_size: usize) -> Self {
        Self {
            generator,
            workers,
            remote_batch_size,
        }
    }

    /// Candidates in the local wave: half the workers, at least two
    pub fn local_wave_size(&self) -> usize {
        (self.workers / 2).max(2)
    }

    /// Candidates in the remote wave
    pub fn remote_wave_size(&self) -> usize {
        self.remote_batch_size
    }

    /// Build the local wave; never fails and never waits
    pub fn local_wave(&self, seed: &Seed) -> Vec<CandidateText> {
        (0..self.local_wave_size())
            .map(|index| local_candidate(seed, index))
            .collect()
    }

    /// Start fetching the remote wave in the background
    pub fn spawn_remote_wave(&self, seed: Seed) -> JoinHandle<Vec<CandidateText>> {
        let generator = Arc::clone(&self.generator);
        let count = self.remote_batch_size;
        tokio::spawn(async move { remote_wave(generator.as_ref(), &seed, count).await })
    }
}

/// Fetch `count` remote candidates, filling any shortfall with fallbacks
pub async fn remote_wave(generator: &dyn TextGenerator, seed: &Seed, count: usize) -> Vec<CandidateText> {
    let mut candidates = match generator.generate(seed, count).await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Text generation via {} failed, using fallback texts: {}", generator.name(), e);
            Vec::new()
        }
    };

    candidates.truncate(count);
    let generated = candidates.len();
    while candidates.len() < count {
        candidates.push(fallback_candidate(seed, candidates.len()));
    }

    debug!("Remote wave ready: {} generated, {} fallback", generated, count - generated);
    candidates
}

/// Local-wave text for slot `index`
pub fn local_candidate(seed: &Seed, index: usize) -> CandidateText {
    fit_to_bounds(format!(
        "PoAIW mining candidate {} seed:{} ts:{} entropy:{} \
         Proof of AI Work combines artificial intelligence with cryptographic computation \
         to create a novel mining paradigm where intelligence is the new hashrate.",
        index,
        seed.short(),
        current_timestamp_millis(),
        entropy()
    ))
}

/// Remote-wave stand-in for slot `index`
pub fn fallback_candidate(seed: &Seed, index: usize) -> CandidateText {
    fit_to_bounds(format!(
        "Mining candidate {} for seed {}. Timestamp: {}. Random entropy: {}. \
         The quick brown fox jumps over the lazy dog. \
         Proof of AI Work requires both intelligence and computation. \
         Exploring the boundaries of decentralized mining with artificial intelligence.",
        index,
        seed.short(),
        current_timestamp_millis(),
        entropy()
    ))
}

fn entropy() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ENTROPY_LEN)
        .map(char::from)
        .collect()
}

fn fit_to_bounds(text: String) -> CandidateText {
    CandidateText::clamped(text.into_bytes(), b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;

    struct FixedGenerator(usize);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _seed: &Seed, _count: usize) -> Result<Vec<CandidateText>> {
            Ok((0..self.0)
                .map(|i| CandidateText::new(format!("{:A>150}", i).into_bytes()).unwrap())
                .collect())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _seed: &Seed, _count: usize) -> Result<Vec<CandidateText>> {
            Err(Error::timeout("chat/completions"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn pipeline(generator: impl TextGenerator + 'static, workers: usize, batch: usize) -> CandidatePipeline {
        CandidatePipeline::new(Arc::new(generator), workers, batch)
    }

    #[test]
    fn test_local_wave_size() {
        assert_eq!(pipeline(FailingGenerator, 1, 8).local_wave_size(), 2);
        assert_eq!(pipeline(FailingGenerator, 4, 8).local_wave_size(), 2);
        assert_eq!(pipeline(FailingGenerator, 7, 8).local_wave_size(), 3);
        assert_eq!(pipeline(FailingGenerator, 16, 8).local_wave_size(), 8);
    }

    #[test]
    fn test_local_wave_shape() {
        let seed = Seed([0xab; 32]);
        let wave = pipeline(FailingGenerator, 6, 8).local_wave(&seed);
        assert_eq!(wave.len(), 3);

        for (i, candidate) in wave.iter().enumerate() {
            assert!(CandidateText::is_valid_len(candidate.len()));
            let text = String::from_utf8(candidate.as_bytes().to_vec()).unwrap();
            assert!(text.starts_with(&format!("PoAIW mining candidate {} seed:0xabababababababab", i)));
        }
        assert_ne!(wave[0], wave[1]);
    }

    #[test]
    fn test_fit_to_bounds() {
        assert_eq!(fit_to_bounds("short".into()).len(), CandidateText::MIN_LEN);
        assert_eq!(fit_to_bounds("x".repeat(4000)).len(), CandidateText::MAX_LEN);
        assert_eq!(fit_to_bounds("y".repeat(500)).len(), 500);
    }

    #[tokio::test]
    async fn test_remote_failure_filled_with_fallbacks() {
        let wave = pipeline(FailingGenerator, 4, 5).spawn_remote_wave(Seed([1; 32])).await.unwrap();
        assert_eq!(wave.len(), 5);
        assert!(wave
            .iter()
            .all(|c| c.as_bytes().starts_with(b"Mining candidate ")));
    }

    #[tokio::test]
    async fn test_remote_shortfall_filled() {
        let wave = remote_wave(&FixedGenerator(2), &Seed([1; 32]), 5).await;
        assert_eq!(wave.len(), 5);
        assert!(wave[..2].iter().all(|c| c.as_bytes().starts_with(b"AAA")));
        assert!(wave[2].as_bytes().starts_with(b"Mining candidate 2 "));
    }

    #[tokio::test]
    async fn test_remote_surplus_truncated() {
        let wave = remote_wave(&FixedGenerator(9), &Seed([1; 32]), 4).await;
        assert_eq!(wave.len(), 4);
    }
}
