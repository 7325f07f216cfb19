//! Keyed hashing for challenge mining
//!
//! The digest of a solution is keccak-256 over the packed preimage
//! `seed(32) ‖ challengeNumber(32, BE) ‖ solver(20) ‖ keccak(candidate)(32) ‖ nonce(32, BE)`.
//! Everything but the nonce is fixed for a candidate, so workers build the
//! 116-byte prefix once and only rewrite the trailing 32 bytes per attempt.

use crate::{CandidateText, Nonce, Seed, SolverIdentity, Target};
use byteorder::{BigEndian, ByteOrder};
use sha3::{Digest, Keccak256};

/// Length of the fixed prefix
pub const PREFIX_LEN: usize = 32 + 32 + 20 + 32;

/// Length of the full hash input
pub const PREIMAGE_LEN: usize = PREFIX_LEN + 32;

/// One-shot keccak-256
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Reusable keccak-256 hasher for mining loops
pub struct KeccakHasher {
    hasher: Keccak256,
}

impl KeccakHasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    /// Hash data and return the result
    #[inline]
    pub fn hash(&mut self, data: &[u8]) -> [u8; 32] {
        self.hasher.update(data);
        self.hasher.finalize_reset().into()
    }

    /// Hash data and check against target
    #[inline]
    pub fn hash_and_check(&mut self, data: &[u8], target: &Target) -> (bool, [u8; 32]) {
        let hash = self.hash(data);
        (target.is_met_by(&hash), hash)
    }
}

impl Default for KeccakHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-candidate fixed part of the hash input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestPrefix([u8; PREFIX_LEN]);

impl DigestPrefix {
    /// Pack seed, challenge number, solver identity and candidate digest
    pub fn new(
        seed: &Seed,
        challenge_number: u64,
        solver: &SolverIdentity,
        candidate_digest: &[u8; 32],
    ) -> Self {
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[..32].copy_from_slice(seed.as_bytes());
        BigEndian::write_u64(&mut bytes[56..64], challenge_number);
        bytes[64..84].copy_from_slice(solver.as_bytes());
        bytes[84..].copy_from_slice(candidate_digest);
        Self(bytes)
    }

    /// Prefix for a candidate text
    pub fn for_candidate(
        seed: &Seed,
        challenge_number: u64,
        solver: &SolverIdentity,
        candidate: &CandidateText,
    ) -> Self {
        Self::new(seed, challenge_number, solver, &candidate.digest())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; PREFIX_LEN] {
        &self.0
    }
}

/// Full hash input with a rewritable nonce tail
#[derive(Debug, Clone)]
pub struct Preimage {
    bytes: [u8; PREIMAGE_LEN],
}

impl Preimage {
    /// Start from a prefix with a zero nonce
    pub fn new(prefix: &DigestPrefix) -> Self {
        let mut bytes = [0u8; PREIMAGE_LEN];
        bytes[..PREFIX_LEN].copy_from_slice(prefix.as_bytes());
        Self { bytes }
    }

    /// Write the nonce as a 256-bit big-endian integer; the upper 24 bytes stay zero
    #[inline]
    pub fn set_nonce(&mut self, nonce: u64) {
        BigEndian::write_u64(&mut self.bytes[PREIMAGE_LEN - 8..], nonce);
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Digest of a complete solution, as the ledger recomputes it
pub fn solution_digest(
    seed: &Seed,
    challenge_number: u64,
    solver: &SolverIdentity,
    candidate: &CandidateText,
    nonce: Nonce,
) -> [u8; 32] {
    let prefix = DigestPrefix::for_candidate(seed, challenge_number, solver, candidate);
    let mut preimage = Preimage::new(&prefix);
    preimage.set_nonce(nonce.value());
    keccak256(preimage.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateText {
        CandidateText::new(vec![b'A'; 200]).unwrap()
    }

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("") as used by Ethereum
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hasher_reuse_matches_one_shot() {
        let mut hasher = KeccakHasher::new();
        let a = hasher.hash(b"first");
        let b = hasher.hash(b"second");
        assert_eq!(a, keccak256(b"first"));
        assert_eq!(b, keccak256(b"second"));
    }

    #[test]
    fn test_prefix_layout() {
        let seed = Seed([0x11; 32]);
        let solver = SolverIdentity([0x22; 20]);
        let digest = [0x33; 32];
        let prefix = DigestPrefix::new(&seed, 0x0102, &solver, &digest);
        let bytes = prefix.as_bytes();

        assert_eq!(bytes.len(), 116);
        assert!(bytes[..32].iter().all(|b| *b == 0x11));
        assert!(bytes[32..62].iter().all(|b| *b == 0));
        assert_eq!(&bytes[62..64], &[0x01, 0x02]);
        assert!(bytes[64..84].iter().all(|b| *b == 0x22));
        assert!(bytes[84..].iter().all(|b| *b == 0x33));
    }

    #[test]
    fn test_preimage_nonce_tail() {
        let prefix = DigestPrefix::new(&Seed([1; 32]), 9, &SolverIdentity([2; 20]), &[3; 32]);
        let mut preimage = Preimage::new(&prefix);
        preimage.set_nonce(0xdead_beef);

        let bytes = preimage.as_bytes();
        assert_eq!(bytes.len(), PREIMAGE_LEN);
        assert_eq!(&bytes[..PREFIX_LEN], prefix.as_bytes());
        assert!(bytes[PREFIX_LEN..PREIMAGE_LEN - 4].iter().all(|b| *b == 0));
        assert_eq!(&bytes[PREIMAGE_LEN - 4..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_solution_digest_is_deterministic() {
        let seed = Seed([7; 32]);
        let solver = SolverIdentity([8; 20]);
        let first = solution_digest(&seed, 5, &solver, &candidate(), Nonce::new(42));
        let second = solution_digest(&seed, 5, &solver, &candidate(), Nonce::new(42));
        assert_eq!(first, second);

        let other_solver = solution_digest(&seed, 5, &SolverIdentity([9; 20]), &candidate(), Nonce::new(42));
        assert_ne!(first, other_solver);
    }

    #[test]
    fn test_preimage_matches_packed_encoding() {
        let seed = Seed([0xaa; 32]);
        let solver = SolverIdentity([0xbb; 20]);
        let text = candidate();

        let mut packed = Vec::new();
        packed.extend_from_slice(seed.as_bytes());
        packed.extend_from_slice(&[0u8; 24]);
        packed.extend_from_slice(&3u64.to_be_bytes());
        packed.extend_from_slice(solver.as_bytes());
        packed.extend_from_slice(&keccak256(text.as_bytes()));
        packed.extend_from_slice(&Nonce::new(77).to_be_bytes32());
        assert_eq!(packed.len(), 148);

        assert_eq!(
            solution_digest(&seed, 3, &solver, &text, Nonce::new(77)),
            keccak256(&packed)
        );
    }
}
