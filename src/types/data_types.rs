/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
    time::{Duration, SystemTime},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::{SignatureError, VerifyingKey};

/// Height of a block in the chain.
///
/// Starts at 0 for the genesis block, and increases by 1 for every subsequent block. The height
/// "before" genesis is [`PRE_GENESIS`](Self::PRE_GENESIS), which is why the inner value is signed.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(i64);

impl Height {
    /// The height a replica is at before it has stored the genesis block.
    pub const PRE_GENESIS: Height = Height(-1);

    /// The height of the genesis block.
    pub const GENESIS: Height = Height(0);

    /// Create a new `Height` with an `int` inner value.
    pub const fn new(int: i64) -> Self {
        Self(int)
    }

    /// Get the inner `i64` value of this `Height`.
    pub const fn int(&self) -> i64 {
        self.0
    }

    /// Whether this height can be used outside of bootstrapping, i.e., is non-negative.
    pub const fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Get the little-endian representation of the inner `i64` value of this `Height`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// Arithmetic on heights and rounds saturates at the bounds of the inner integer.

impl Add<i64> for Height {
    type Output = Height;
    fn add(self, rhs: i64) -> Self::Output {
        Height::new(self.0.saturating_add(rhs))
    }
}

impl AddAssign<i64> for Height {
    fn add_assign(&mut self, rhs: i64) {
        self.0 = self.0.saturating_add(rhs)
    }
}

impl Sub<i64> for Height {
    type Output = Height;
    fn sub(self, rhs: i64) -> Self::Output {
        Height::new(self.0.saturating_sub(rhs))
    }
}

impl Sub<Height> for Height {
    type Output = i64;
    fn sub(self, rhs: Height) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// One attempt at agreeing on a block at a given [`Height`]. Starts at 0 and increments every time an
/// attempt fails.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Round {
    type Output = Round;
    fn add(self, rhs: u64) -> Self::Output {
        Round::new(self.0.saturating_add(rhs))
    }
}

/// The stage a ballot belongs to.
///
/// `Init`, `Sign`, and `Accept` are voting stages. `Proposal` is a ballot type, but proposals are never
/// voted on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub enum Stage {
    Init,
    Sign,
    Accept,
    Proposal,
}

impl Stage {
    /// Whether ballots of this stage are collected by the ballot box.
    pub const fn can_vote(&self) -> bool {
        matches!(self, Stage::Init | Stage::Sign | Stage::Accept)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::Sign => "SIGN",
            Stage::Accept => "ACCEPT",
            Stage::Proposal => "PROPOSAL",
        };
        f.write_str(name)
    }
}

/// Opaque identifier of a node. Addresses are totally ordered by their string form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

/// Bytes that uniquely identify a network.
///
/// Every signature produced by a replica is made over a digest followed by these bytes, so ballots
/// signed for one network can never be replayed on another. All replicas of the same network must be
/// configured with the same `NetworkID`.
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct NetworkID(Vec<u8>);

impl NetworkID {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 32-byte cryptographic hash. Within this crate, always a SHA256 hash.
///
/// The canonical string form of a `CryptoHash` is its unpadded base64 encoding.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Whether every byte of this hash is zero. The genesis block's `previous_block` is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", self)
    }
}

/// Ed25519 digital signature.
///
/// These are produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported from
/// the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", STANDARD_NO_PAD.encode(self.0))
    }
}

/// The 32-byte encoding of an Ed25519 [`VerifyingKey`].
///
/// [`VerifyingKey`] does not implement borsh's traits, so ballots and voteproofs carry signers in this
/// form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct PublicKeyBytes([u8; 32]);

impl PublicKeyBytes {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Decompress the inner bytes into a [`VerifyingKey`].
    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }
}

impl From<&VerifyingKey> for PublicKeyBytes {
    fn from(verifying_key: &VerifyingKey) -> Self {
        PublicKeyBytes(verifying_key.to_bytes())
    }
}

impl From<VerifyingKey> for PublicKeyBytes {
    fn from(verifying_key: VerifyingKey) -> Self {
        PublicKeyBytes(verifying_key.to_bytes())
    }
}

impl Display for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", self)
    }
}

/// Milliseconds since the Unix Epoch.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time. Clocks set before the Unix Epoch read as zero.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whether this timestamp lies within `span` of `now`, in either direction.
    pub fn is_within(&self, now: Timestamp, span: Duration) -> bool {
        let span = span.as_millis() as u64;
        self.0.abs_diff(now.0) <= span
    }

    /// Convert into a [`SystemTime`], e.g., for event timestamps.
    pub fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
