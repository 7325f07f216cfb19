//! Core types for challenge mining
//!
//! Fundamental values shared by the solver, the ledger collaborators and the
//! round orchestrator, with validation, fixed-width encodings and JSON
//! serialization.

use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Difficulty target: a digest qualifies when it is strictly below this value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// 256-bit target value stored as 4 64-bit words, least significant first
    words: [u64; 4],
}

impl Target {
    /// Create a new target from a 256-bit value
    pub fn new(words: [u64; 4]) -> Self {
        Self { words }
    }

    /// Target from a small integer
    pub fn from_u64(value: u64) -> Self {
        Self::new([value, 0, 0, 0])
    }

    /// Create target from 32 big-endian bytes
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = (3 - i) * 8;
            *word = BigEndian::read_u64(&bytes[start..start + 8]);
        }
        Self::new(words)
    }

    /// Convert target to 32 big-endian bytes
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.words.iter().enumerate() {
            let start = (3 - i) * 8;
            BigEndian::write_u64(&mut bytes[start..start + 8], *word);
        }
        bytes
    }

    /// Maximum possible target, 2^256 - 1 (easiest difficulty)
    pub fn max() -> Self {
        Self::new([u64::MAX; 4])
    }

    /// Zero target; no digest can be below it
    pub fn min() -> Self {
        Self::new([0; 4])
    }

    /// Target requiring `bits` leading zero bits: 2^(256 - bits) - 1
    pub fn from_leading_zero_bits(bits: u32) -> Self {
        if bits >= 256 {
            return Self::min();
        }
        let free = 256 - bits;
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let low = (i as u32) * 64;
            if free >= low + 64 {
                *word = u64::MAX;
            } else if free > low {
                *word = (1u64 << (free - low)) - 1;
            }
        }
        Self::new(words)
    }

    /// Strict `digest < target` comparison, digest read as a big-endian integer
    #[inline]
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        for i in (0..4).rev() {
            let start = (3 - i) * 8;
            let digest_word = BigEndian::read_u64(&digest[start..start + 8]);

            if digest_word < self.words[i] {
                return true;
            } else if digest_word > self.words[i] {
                return false;
            }
        }
        false
    }

    /// Get difficulty level (number of leading zero bits required)
    pub fn difficulty_level(&self) -> u32 {
        for i in (0..4).rev() {
            if self.words[i] != 0 {
                return (3 - i as u32) * 64 + self.words[i].leading_zeros();
            }
        }
        256
    }

    /// Convert to `0x`-prefixed big-endian hexadecimal
    pub fn to_hex(&self) -> String {
        format!(
            "0x{:016x}{:016x}{:016x}{:016x}",
            self.words[3], self.words[2], self.words[1], self.words[0]
        )
    }

    fn from_biguint(value: &BigUint) -> Result<Self> {
        let bytes = value.to_bytes_be();
        if bytes.len() > 32 {
            return Err(Error::target(format!(
                "value exceeds 256 bits ({} bytes)",
                bytes.len()
            )));
        }
        let mut padded = [0u8; 32];
        padded[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self::from_be_bytes(&padded))
    }
}

impl FromStr for Target {
    type Err = Error;

    /// Parse a decimal integer or a `0x`-prefixed hexadecimal integer
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let value = if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            BigUint::parse_bytes(hex_digits.as_bytes(), 16)
        } else {
            BigUint::parse_bytes(s.as_bytes(), 10)
        }
        .ok_or_else(|| Error::target(format!("cannot parse '{}'", s)))?;

        Self::from_biguint(&value)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Search nonce; encoded as a 256-bit big-endian integer in the preimage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 32-byte big-endian encoding
    pub fn to_be_bytes32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        BigEndian::write_u64(&mut bytes[24..], self.0);
        bytes
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn decode_fixed_hex<const N: usize>(what: &str, s: &str) -> Result<[u8; N]> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    let bytes = hex::decode(digits)
        .map_err(|e| Error::config(format!("Invalid hex in {}: {}", what, e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::config(format!(
            "Invalid {} length: expected {} bytes, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

/// Challenge seed (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed(pub [u8; 32]);

impl Seed {
    /// Random seed, used by the simulated ledger
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x` plus the first 8 bytes, for log lines and candidate texts
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..8]))
    }
}

impl FromStr for Seed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed_hex::<32>("seed", s).map(Self)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Seed {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Seed::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Solver identity: the 20-byte account address mixed into every digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolverIdentity(pub [u8; 20]);

impl SolverIdentity {
    /// The all-zero address, used by the ledger to mean "no winner"
    pub const ZERO: Self = Self([0u8; 20]);

    /// Random identity, used by the simulated ledger and tests
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..3]))
    }
}

impl FromStr for SolverIdentity {
    type Err = Error;

    /// Case-insensitive, with or without `0x`
    fn from_str(s: &str) -> Result<Self> {
        decode_fixed_hex::<20>("solver address", s).map(Self)
    }
}

impl fmt::Display for SolverIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for SolverIdentity {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SolverIdentity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SolverIdentity::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Native-token amount in the smallest unit (18 decimals)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(pub u128);

impl Wei {
    const DECIMALS: u32 = 18;

    /// Create a new amount
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u128 {
        self.0
    }

    /// `value * (100 + percent) / 100`, saturating
    pub fn with_premium_percent(&self, percent: u64) -> Self {
        Self(self.0.saturating_mul(100 + percent as u128) / 100)
    }

    /// Whole-token rendering, e.g. `0.001` for 10^15 wei
    pub fn format_units(&self) -> String {
        let unit = 10u128.pow(Self::DECIMALS);
        let whole = self.0 / unit;
        let frac = self.0 % unit;
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{:018}", frac);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl FromStr for Wei {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u128>()
            .map(Self)
            .map_err(|e| Error::config(format!("Invalid amount '{}': {}", s, e)))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Wei {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Wei::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// One externally issued unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Monotonically increasing challenge number
    #[serde(rename = "challengeNumber")]
    pub number: u64,
    pub seed: Seed,
    pub difficulty: u64,
    pub difficulty_target: Target,
    pub reward: Wei,
}

/// Opaque candidate bytes anchoring one nonce-search subspace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateText(Vec<u8>);

impl CandidateText {
    /// Minimum accepted length in bytes
    pub const MIN_LEN: usize = 100;
    /// Maximum accepted length in bytes
    pub const MAX_LEN: usize = 1000;

    /// Create a candidate, enforcing the byte-length bounds
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if !Self::is_valid_len(bytes.len()) {
            return Err(Error::invalid_candidate(format!(
                "length {} outside [{}, {}] bytes",
                bytes.len(),
                Self::MIN_LEN,
                Self::MAX_LEN
            )));
        }
        Ok(Self(bytes))
    }

    /// Create a candidate, cutting it or padding it with `pad` to fit the bounds
    pub fn clamped(mut bytes: Vec<u8>, pad: u8) -> Self {
        bytes.truncate(Self::MAX_LEN);
        if bytes.len() < Self::MIN_LEN {
            bytes.resize(Self::MIN_LEN, pad);
        }
        Self(bytes)
    }

    /// Whether a byte length falls inside the accepted bounds
    pub fn is_valid_len(len: usize) -> bool {
        (Self::MIN_LEN..=Self::MAX_LEN).contains(&len)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; the minimum length is positive
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keccak-256 of the candidate bytes
    pub fn digest(&self) -> [u8; 32] {
        crate::crypto::keccak256(&self.0)
    }

    /// First `chars` characters, lossy UTF-8, for log lines
    pub fn preview(&self, chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.0);
        let mut preview: String = text.chars().take(chars).collect();
        if text.chars().count() > chars {
            preview.push_str("...");
        }
        preview
    }
}

impl TryFrom<String> for CandidateText {
    type Error = Error;

    fn try_from(text: String) -> Result<Self> {
        Self::new(text.into_bytes())
    }
}

/// Hash rate in hashes per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct HashRate(pub f64);

impl HashRate {
    /// Create new hash rate
    pub fn new(rate: f64) -> Self {
        Self(rate)
    }

    /// Get the rate value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::utils::format_hash_rate(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_be_bytes() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x01;
        bytes[0] = 0x80;
        let target = Target::from_be_bytes(&bytes);
        assert_eq!(target.to_be_bytes(), bytes);
        assert_eq!(target.difficulty_level(), 0);
    }

    #[test]
    fn test_target_strict_comparison() {
        let target = Target::from_u64(0x100);

        let mut digest = [0u8; 32];
        digest[30] = 0x01; // exactly 0x100
        assert!(!target.is_met_by(&digest));

        digest[30] = 0x00;
        digest[31] = 0xff;
        assert!(target.is_met_by(&digest));

        digest[0] = 0x01;
        assert!(!target.is_met_by(&digest));
    }

    #[test]
    fn test_target_extremes() {
        let zero = [0u8; 32];
        let ones = [0xffu8; 32];

        assert!(Target::max().is_met_by(&zero));
        assert!(!Target::max().is_met_by(&ones));
        assert!(Target::from_u64(1).is_met_by(&zero));
        assert!(!Target::min().is_met_by(&zero));
    }

    #[test]
    fn test_target_parsing() {
        let hex = Target::from_str("0x0100").unwrap();
        let dec = Target::from_str("256").unwrap();
        assert_eq!(hex, dec);
        assert_eq!(hex, Target::from_u64(256));

        let max_dec = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(Target::from_str(max_dec).unwrap(), Target::max());

        let too_big = "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(Target::from_str(too_big).is_err());
        assert!(Target::from_str("0xzz").is_err());
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(Target::from_leading_zero_bits(0), Target::max());
        assert_eq!(Target::from_leading_zero_bits(256), Target::min());
        assert_eq!(Target::from_leading_zero_bits(255), Target::from_u64(1));
        assert_eq!(Target::from_leading_zero_bits(192), Target::from_u64(u64::MAX));
        assert_eq!(Target::from_leading_zero_bits(20).difficulty_level(), 20);
        assert_eq!(Target::from_leading_zero_bits(70).difficulty_level(), 70);
    }

    #[test]
    fn test_nonce_encoding() {
        let bytes = Nonce::new(0x0102).to_be_bytes32();
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_identity_parsing() {
        let lower = SolverIdentity::from_str("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd").unwrap();
        let upper = SolverIdentity::from_str("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.to_string(), "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd");
        assert!(SolverIdentity::from_str("0xabcd").is_err());
    }

    #[test]
    fn test_wei() {
        let fee = Wei::new(1_000_000_000_000_000);
        assert_eq!(fee.format_units(), "0.001");
        assert_eq!(Wei::new(3 * 10u128.pow(18)).format_units(), "3");
        assert_eq!(Wei::new(5_000_000_000).with_premium_percent(10), Wei::new(5_500_000_000));
    }

    #[test]
    fn test_candidate_bounds() {
        assert!(CandidateText::new(vec![b'a'; 99]).is_err());
        assert!(CandidateText::new(vec![b'a'; 100]).is_ok());
        assert!(CandidateText::new(vec![b'a'; 1000]).is_ok());
        assert!(CandidateText::new(vec![b'a'; 1001]).is_err());
    }

    #[test]
    fn test_challenge_json() {
        let json = r#"{
            "challengeNumber": 7,
            "seed": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "difficulty": 1000,
            "difficultyTarget": "0x00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            "reward": "50000000000000000000"
        }"#;
        let challenge: Challenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.number, 7);
        assert_eq!(challenge.difficulty_target.difficulty_level(), 20);
        assert_eq!(challenge.reward.format_units(), "50");
    }
}
