/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Facts: the hashable, signable content of a ballot, distinct from the envelope that signs it.
//!
//! A fact is identified by its hash, `SHA256(borsh(fact) ‖ network_id)`. Since [`Fact`] is a tagged
//! enum, a SIGN fact and an ACCEPT fact with identical fields still have different hashes.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::hash_all,
    data_types::{CryptoHash, Height, NetworkID, Round, Stage},
};

/// The content of an INIT ballot: the replica's view of the last block when it enters `(height, round)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct InitFact {
    pub height: Height,
    pub round: Round,
    pub previous_block: CryptoHash,
    pub previous_round: Round,
}

/// The content of a SIGN ballot: the block a replica derived from a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct SignFact {
    pub height: Height,
    pub round: Round,
    pub proposal: CryptoHash,
    pub new_block: CryptoHash,
}

/// The content of an ACCEPT ballot. Same fields as [`SignFact`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct AcceptFact {
    pub height: Height,
    pub round: Round,
    pub proposal: CryptoHash,
    pub new_block: CryptoHash,
}

/// The content of a proposal: the operation seals the proposer wants included in the next block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ProposalFact {
    pub height: Height,
    pub round: Round,
    pub seals: Vec<CryptoHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Fact {
    Init(InitFact),
    Sign(SignFact),
    Accept(AcceptFact),
    Proposal(ProposalFact),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactError {
    #[error("fact height {0} is negative")]
    InvalidHeight(Height),
    #[error("fact at {0} refers to an empty hash")]
    EmptyHash(Stage),
}

impl Fact {
    pub fn stage(&self) -> Stage {
        match self {
            Fact::Init(_) => Stage::Init,
            Fact::Sign(_) => Stage::Sign,
            Fact::Accept(_) => Stage::Accept,
            Fact::Proposal(_) => Stage::Proposal,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            Fact::Init(fact) => fact.height,
            Fact::Sign(fact) => fact.height,
            Fact::Accept(fact) => fact.height,
            Fact::Proposal(fact) => fact.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            Fact::Init(fact) => fact.round,
            Fact::Sign(fact) => fact.round,
            Fact::Accept(fact) => fact.round,
            Fact::Proposal(fact) => fact.round,
        }
    }

    /// The canonical byte serialization of this fact.
    pub fn bytes(&self) -> Vec<u8> {
        // Serializing into a `Vec` cannot fail for these types.
        self.try_to_vec().unwrap_or_default()
    }

    /// `SHA256(bytes ‖ network_id)`.
    pub fn hash(&self, network_id: &NetworkID) -> CryptoHash {
        hash_all(&[&self.bytes(), network_id.bytes()])
    }

    /// Check the structural invariants of this fact.
    pub fn is_valid(&self) -> Result<(), FactError> {
        if !self.height().is_valid() {
            return Err(FactError::InvalidHeight(self.height()));
        }
        match self {
            Fact::Init(fact) if fact.height > Height::GENESIS && fact.previous_block.is_zero() => {
                Err(FactError::EmptyHash(Stage::Init))
            }
            Fact::Sign(SignFact {
                proposal,
                new_block,
                ..
            })
            | Fact::Accept(AcceptFact {
                proposal,
                new_block,
                ..
            }) if proposal.is_zero() || new_block.is_zero() => Err(FactError::EmptyHash(self.stage())),
            _ => Ok(()),
        }
    }
}

impl From<InitFact> for Fact {
    fn from(fact: InitFact) -> Self {
        Fact::Init(fact)
    }
}

impl From<SignFact> for Fact {
    fn from(fact: SignFact) -> Self {
        Fact::Sign(fact)
    }
}

impl From<AcceptFact> for Fact {
    fn from(fact: AcceptFact) -> Self {
        Fact::Accept(fact)
    }
}

impl From<ProposalFact> for Fact {
    fn from(fact: ProposalFact) -> Self {
        Fact::Proposal(fact)
    }
}
