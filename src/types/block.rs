/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the `Block` type, and the `Manifest` that identifies it.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::hash_all,
    data_types::{CryptoHash, Height, NetworkID, Round, Stage},
    facts::Fact,
    voteproof::{VoteResult, Voteproof, VoteproofError},
};

/// The part of a block that its hash commits to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Manifest {
    pub height: Height,
    pub round: Round,
    pub proposal: CryptoHash,
    pub previous_block: CryptoHash,
    pub operations_hash: CryptoHash,
}

impl Manifest {
    pub fn hash(&self) -> CryptoHash {
        hash_all(&[&self.try_to_vec().unwrap_or_default()])
    }
}

/// A block, with the consensus evidence that finalized it once it has been committed.
///
/// `init_voteproof` and `accept_voteproof` are attached at commit time and are not part of `hash`, so
/// every replica that derives the same manifest from a proposal derives the same block hash.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub hash: CryptoHash,
    pub manifest: Manifest,
    pub seals: Vec<CryptoHash>,
    pub init_voteproof: Option<Voteproof>,
    pub accept_voteproof: Option<Voteproof>,
}

#[derive(Debug, Error, PartialEq)]
pub enum BlockError {
    #[error("block hash does not match its manifest")]
    HashMismatch,
    #[error("operations hash does not match the block's seals")]
    OperationsHashMismatch,
    #[error("block has no {0} voteproof")]
    MissingVoteproof(Stage),
    #[error("{0} voteproof is not a majority for this block")]
    VoteproofMismatch(Stage),
    #[error("invalid voteproof: {0}")]
    InvalidVoteproof(#[from] VoteproofError),
}

impl Block {
    pub fn new(manifest: Manifest, seals: Vec<CryptoHash>) -> Block {
        Block {
            hash: manifest.hash(),
            manifest,
            seals,
            init_voteproof: None,
            accept_voteproof: None,
        }
    }

    pub fn with_voteproofs(mut self, init: Voteproof, accept: Voteproof) -> Block {
        self.init_voteproof = Some(init);
        self.accept_voteproof = Some(accept);
        self
    }

    pub fn height(&self) -> Height {
        self.manifest.height
    }

    pub fn round(&self) -> Round {
        self.manifest.round
    }

    pub fn previous_block(&self) -> CryptoHash {
        self.manifest.previous_block
    }

    /// Check the block's hashes and, if present, that its voteproofs are valid majorities that agree
    /// with the manifest.
    pub fn is_correct(&self, network_id: &NetworkID) -> Result<(), BlockError> {
        if self.manifest.hash() != self.hash {
            return Err(BlockError::HashMismatch);
        }
        if operations_hash(&self.seals) != self.manifest.operations_hash {
            return Err(BlockError::OperationsHashMismatch);
        }

        if let Some(voteproof) = &self.init_voteproof {
            voteproof.validate(network_id)?;
            match (&voteproof.result, &voteproof.majority) {
                (VoteResult::Majority, Some(Fact::Init(fact)))
                    if fact.height == self.height()
                        && fact.previous_block == self.manifest.previous_block => {}
                _ => return Err(BlockError::VoteproofMismatch(Stage::Init)),
            }
        }

        if let Some(voteproof) = &self.accept_voteproof {
            voteproof.validate(network_id)?;
            self.check_accept_voteproof(voteproof)?;
        }

        Ok(())
    }

    /// Like [`is_correct`](Self::is_correct), but also require the ACCEPT voteproof. Blocks received
    /// from peers while syncing must carry it.
    pub fn is_committed(&self, network_id: &NetworkID) -> Result<(), BlockError> {
        if self.accept_voteproof.is_none() {
            return Err(BlockError::MissingVoteproof(Stage::Accept));
        }
        self.is_correct(network_id)
    }

    fn check_accept_voteproof(&self, voteproof: &Voteproof) -> Result<(), BlockError> {
        match (&voteproof.result, &voteproof.majority) {
            (VoteResult::Majority, Some(Fact::Accept(fact)))
                if fact.height == self.height()
                    && fact.new_block == self.hash
                    && fact.proposal == self.manifest.proposal =>
            {
                Ok(())
            }
            _ => Err(BlockError::VoteproofMismatch(Stage::Accept)),
        }
    }
}

/// Digest over an ordered list of seal hashes.
pub fn operations_hash(seals: &[CryptoHash]) -> CryptoHash {
    let parts: Vec<[u8; 32]> = seals.iter().map(|seal| seal.bytes()).collect();
    let parts: Vec<&[u8]> = parts.iter().map(|part| part.as_slice()).collect();
    hash_all(&parts)
}
