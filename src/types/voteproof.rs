/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Voteproofs: self-contained, independently re-verifiable evidence of the outcome of one stage of one
//! round.
//!
//! A `Voteproof` is produced by the [ballot box](crate::ballot_box) once a stage collects enough votes.
//! It is quoted in later INIT and ACCEPT ballots and attached to committed blocks, so any replica can
//! check it with nothing but the network ID: [`validate`](Voteproof::validate) recomputes every fact
//! hash, checks every voter's fact signature, and reruns the majority rule.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::verify_digest,
    data_types::{
        Address, CryptoHash, Height, NetworkID, PublicKeyBytes, Round, SignatureBytes, Stage,
        Timestamp,
    },
    facts::Fact,
    threshold::{Threshold, ThresholdError},
};

/// Outcome of a stage. `NotYet` is not an error: it means the threshold has not been decided either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum VoteResult {
    NotYet,
    Draw,
    Majority,
}

/// One node's vote in a stage.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteRecord {
    pub node: Address,
    pub fact_hash: CryptoHash,
    pub fact_signature: SignatureBytes,
    pub signer: PublicKeyBytes,
    pub voted_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Voteproof {
    pub height: Height,
    pub round: Round,
    pub stage: Stage,
    pub threshold: Threshold,
    pub result: VoteResult,
    /// Present if and only if `result` is [`VoteResult::Majority`].
    pub majority: Option<Fact>,
    pub facts: BTreeMap<CryptoHash, Fact>,
    /// Hash of the ballot each voter cast.
    pub ballots: BTreeMap<Address, CryptoHash>,
    pub votes: BTreeMap<Address, VoteRecord>,
    /// When the result stopped being `NotYet`. Zero while it is still `NotYet`.
    pub finished_at: Timestamp,
}

#[derive(Debug, Error, PartialEq)]
pub enum VoteproofError {
    #[error("voteproof height {0} is negative")]
    InvalidHeight(Height),
    #[error("stage {0} is not a voting stage")]
    InvalidStage(Stage),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(#[from] ThresholdError),
    #[error("voteproof has no facts, ballots, or votes")]
    Empty,
    #[error("voteproof has {ballots} ballots but {votes} votes")]
    MismatchedBallotsAndVotes { ballots: usize, votes: usize },
    #[error("voteproof has {votes} votes, more than the {total} voters of its threshold")]
    TooManyVotes { votes: usize, total: u32 },
    #[error("ballot of {0} has no matching vote")]
    MissingVote(Address),
    #[error("vote keyed by {key} was cast by {node}")]
    VoteNodeMismatch { key: Address, node: Address },
    #[error("vote of {node} refers to unknown fact {fact_hash}")]
    UnknownFact { node: Address, fact_hash: CryptoHash },
    #[error("fact keyed by {key} hashes to {recomputed}")]
    FactHashMismatch {
        key: CryptoHash,
        recomputed: CryptoHash,
    },
    #[error("fact {0} does not belong to the voteproof's height, round, and stage")]
    FactOutOfPlace(CryptoHash),
    #[error("fact {0} is not voted for by anybody")]
    UnusedFact(CryptoHash),
    #[error("fact signature of {node} does not verify under signer {signer}")]
    InvalidSignature {
        node: Address,
        signer: PublicKeyBytes,
    },
    #[error("stored result {stored:?} differs from recomputed result {computed:?}")]
    ResultMismatch {
        stored: VoteResult,
        computed: VoteResult,
    },
    #[error("majority fact does not match the fact with the most votes")]
    MajorityMismatch,
    #[error("majority result without majority fact")]
    MissingMajority,
    #[error("majority fact present on a {0:?} result")]
    UnexpectedMajority(VoteResult),
}

impl Voteproof {
    /// Whether the stage has been decided, i.e., the result is `Draw` or `Majority`.
    pub fn is_finished(&self) -> bool {
        self.result != VoteResult::NotYet
    }

    /// Canonical byte serialization.
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap_or_default()
    }

    /// Independently re-verify this voteproof on the network identified by `network_id`.
    pub fn validate(&self, network_id: &NetworkID) -> Result<(), VoteproofError> {
        self.validate_shape(network_id)?;
        self.validate_signatures(network_id)?;
        self.validate_result(network_id)
    }

    fn validate_shape(&self, network_id: &NetworkID) -> Result<(), VoteproofError> {
        if !self.height.is_valid() {
            return Err(VoteproofError::InvalidHeight(self.height));
        }
        if !self.stage.can_vote() {
            return Err(VoteproofError::InvalidStage(self.stage));
        }
        self.threshold.validate()?;

        if self.facts.is_empty() || self.ballots.is_empty() || self.votes.is_empty() {
            return Err(VoteproofError::Empty);
        }
        if self.ballots.len() != self.votes.len() {
            return Err(VoteproofError::MismatchedBallotsAndVotes {
                ballots: self.ballots.len(),
                votes: self.votes.len(),
            });
        }
        if self.votes.len() > self.threshold.total as usize {
            return Err(VoteproofError::TooManyVotes {
                votes: self.votes.len(),
                total: self.threshold.total,
            });
        }
        if let Some(node) = self.ballots.keys().find(|node| !self.votes.contains_key(node)) {
            return Err(VoteproofError::MissingVote(node.clone()));
        }

        for (key, fact) in &self.facts {
            let recomputed = fact.hash(network_id);
            if recomputed != *key {
                return Err(VoteproofError::FactHashMismatch {
                    key: *key,
                    recomputed,
                });
            }
            if fact.stage() != self.stage
                || fact.height() != self.height
                || fact.round() != self.round
            {
                return Err(VoteproofError::FactOutOfPlace(*key));
            }
        }

        let mut used = BTreeSet::new();
        for (key, vote) in &self.votes {
            if vote.node != *key {
                return Err(VoteproofError::VoteNodeMismatch {
                    key: key.clone(),
                    node: vote.node.clone(),
                });
            }
            if !self.facts.contains_key(&vote.fact_hash) {
                return Err(VoteproofError::UnknownFact {
                    node: vote.node.clone(),
                    fact_hash: vote.fact_hash,
                });
            }
            used.insert(vote.fact_hash);
        }
        if let Some(unused) = self.facts.keys().find(|hash| !used.contains(hash)) {
            return Err(VoteproofError::UnusedFact(*unused));
        }

        Ok(())
    }

    fn validate_signatures(&self, network_id: &NetworkID) -> Result<(), VoteproofError> {
        for vote in self.votes.values() {
            if !verify_digest(&vote.signer, &vote.fact_hash, network_id, &vote.fact_signature) {
                return Err(VoteproofError::InvalidSignature {
                    node: vote.node.clone(),
                    signer: vote.signer,
                });
            }
        }
        Ok(())
    }

    fn validate_result(&self, network_id: &NetworkID) -> Result<(), VoteproofError> {
        let (computed, winner) = self.threshold.check(&self.tally());
        if computed != self.result {
            return Err(VoteproofError::ResultMismatch {
                stored: self.result,
                computed,
            });
        }

        match (self.result, &self.majority) {
            (VoteResult::Majority, Some(fact)) => {
                if Some(fact.hash(network_id)) != winner {
                    return Err(VoteproofError::MajorityMismatch);
                }
                Ok(())
            }
            (VoteResult::Majority, None) => Err(VoteproofError::MissingMajority),
            (result, Some(_)) => Err(VoteproofError::UnexpectedMajority(result)),
            (_, None) => Ok(()),
        }
    }

    /// Number of votes per fact hash, in fact hash order.
    pub fn tally(&self) -> Vec<(CryptoHash, u32)> {
        let mut counts: BTreeMap<CryptoHash, u32> = BTreeMap::new();
        for vote in self.votes.values() {
            *counts.entry(vote.fact_hash).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}
