/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ballots: signed envelopes around a [`Fact`].
//!
//! ## Digests and signatures
//!
//! Every ballot carries three digests in its [`BallotHeader`]:
//! 1. `fact_hash = SHA256(borsh(fact) ‖ network_id)`, signed by `fact_signature`. Voteproofs quote this
//!    pair, so a vote can be checked without the rest of the ballot.
//! 2. `body_hash = SHA256(borsh(fact) ‖ borsh(voteproof))`, signed (followed by the network ID) by
//!    `signature`.
//! 3. `hash`, the digest of the remaining envelope fields followed by `body_hash`. This identifies the
//!    ballot in a voteproof's `ballots` map.
//!
//! ## Ballot types
//!
//! INIT and ACCEPT ballots carry a [`Voteproof`]: an INIT ballot cites the voteproof that made its
//! sender enter the round (the ACCEPT voteproof of the previous height for round 0, or the outcome of
//! the previous round otherwise), and an ACCEPT ballot cites the INIT voteproof of its own round. SIGN
//! ballots and proposals carry none.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::{hash_all, verify_digest, Keypair},
    data_types::{
        Address, CryptoHash, Height, NetworkID, PublicKeyBytes, Round, SignatureBytes, Stage,
        Timestamp,
    },
    facts::{AcceptFact, Fact, FactError, InitFact, ProposalFact, SignFact},
    voteproof::{Voteproof, VoteproofError},
};

/// The signing envelope shared by every ballot type.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BallotHeader {
    pub node: Address,
    pub signer: PublicKeyBytes,
    pub signature: SignatureBytes,
    pub signed_at: Timestamp,
    pub hash: CryptoHash,
    pub body_hash: CryptoHash,
    pub fact_hash: CryptoHash,
    pub fact_signature: SignatureBytes,
}

impl BallotHeader {
    /// Sign `fact` (and `voteproof`, if any) as `node`.
    fn sign(
        keypair: &Keypair,
        node: Address,
        fact: &Fact,
        voteproof: Option<&Voteproof>,
        network_id: &NetworkID,
    ) -> BallotHeader {
        let fact_hash = fact.hash(network_id);
        let fact_signature = keypair.sign_digest(&fact_hash, network_id);
        let body_hash = body_hash(fact, voteproof);
        let signature = keypair.sign_digest(&body_hash, network_id);

        let mut header = BallotHeader {
            node,
            signer: keypair.public_bytes(),
            signature,
            signed_at: Timestamp::now(),
            hash: CryptoHash::default(),
            body_hash,
            fact_hash,
            fact_signature,
        };
        header.hash = header.envelope_hash();
        header
    }

    fn envelope_hash(&self) -> CryptoHash {
        hash_all(&[&self.envelope_bytes(), &self.body_hash.bytes()])
    }

    fn envelope_bytes(&self) -> Vec<u8> {
        (
            self.node.clone(),
            self.signer,
            self.signature,
            self.signed_at,
            self.fact_hash,
            self.fact_signature,
        )
            .try_to_vec()
            .unwrap_or_default()
    }
}

fn body_hash(fact: &Fact, voteproof: Option<&Voteproof>) -> CryptoHash {
    let voteproof_bytes = voteproof.cloned().try_to_vec().unwrap_or_default();
    hash_all(&[&fact.bytes(), &voteproof_bytes])
}

#[derive(Debug, Error, PartialEq)]
pub enum BallotError {
    #[error("ballot height {0} is negative")]
    InvalidHeight(Height),
    #[error("invalid fact: {0}")]
    InvalidFact(#[from] FactError),
    #[error("{0} ballot requires a voteproof")]
    MissingVoteproof(Stage),
    #[error("{stage} ballot at height {height} cannot cite a voteproof for {voteproof_stage} at height {voteproof_height}")]
    VoteproofOutOfPlace {
        stage: Stage,
        height: Height,
        voteproof_stage: Stage,
        voteproof_height: Height,
    },
    #[error("cited voteproof is not finished")]
    UnfinishedVoteproof,
    #[error("invalid voteproof: {0}")]
    InvalidVoteproof(#[from] VoteproofError),
    #[error("fact hash does not match the fact")]
    FactHashMismatch,
    #[error("body hash does not match the body")]
    BodyHashMismatch,
    #[error("ballot hash does not match the envelope")]
    HashMismatch,
    #[error("signature of {0} does not verify")]
    InvalidSignature(Address),
    #[error("fact signature of {0} does not verify")]
    InvalidFactSignature(Address),
}

/// Accessors and verification shared by every ballot type.
pub trait SignedBallot {
    fn header(&self) -> &BallotHeader;

    fn fact(&self) -> Fact;

    fn voteproof(&self) -> Option<&Voteproof>;

    fn height(&self) -> Height;

    fn round(&self) -> Round;

    fn stage(&self) -> Stage;

    fn node(&self) -> &Address {
        &self.header().node
    }

    fn signer(&self) -> &PublicKeyBytes {
        &self.header().signer
    }

    fn signature(&self) -> &SignatureBytes {
        &self.header().signature
    }

    fn signed_at(&self) -> Timestamp {
        self.header().signed_at
    }

    fn hash(&self) -> CryptoHash {
        self.header().hash
    }

    fn body_hash(&self) -> CryptoHash {
        self.header().body_hash
    }

    fn fact_hash(&self) -> CryptoHash {
        self.header().fact_hash
    }

    fn fact_signature(&self) -> &SignatureBytes {
        &self.header().fact_signature
    }

    /// Check every digest and both signatures of this ballot, and validate the voteproof it cites.
    fn verify(&self, network_id: &NetworkID) -> Result<(), BallotError> {
        if !self.height().is_valid() {
            return Err(BallotError::InvalidHeight(self.height()));
        }

        let fact = self.fact();
        fact.is_valid()?;
        self.check_voteproof_placement()?;

        let header = self.header();
        if fact.hash(network_id) != header.fact_hash {
            return Err(BallotError::FactHashMismatch);
        }
        if body_hash(&fact, self.voteproof()) != header.body_hash {
            return Err(BallotError::BodyHashMismatch);
        }
        if header.envelope_hash() != header.hash {
            return Err(BallotError::HashMismatch);
        }
        if !verify_digest(&header.signer, &header.body_hash, network_id, &header.signature) {
            return Err(BallotError::InvalidSignature(header.node.clone()));
        }
        if !verify_digest(
            &header.signer,
            &header.fact_hash,
            network_id,
            &header.fact_signature,
        ) {
            return Err(BallotError::InvalidFactSignature(header.node.clone()));
        }

        if let Some(voteproof) = self.voteproof() {
            if !voteproof.is_finished() {
                return Err(BallotError::UnfinishedVoteproof);
            }
            voteproof.validate(network_id)?;
        }

        Ok(())
    }

    /// Check that the voteproof this ballot cites (if any) could have led to this ballot.
    fn check_voteproof_placement(&self) -> Result<(), BallotError> {
        let out_of_place = |voteproof: &Voteproof| BallotError::VoteproofOutOfPlace {
            stage: self.stage(),
            height: self.height(),
            voteproof_stage: voteproof.stage,
            voteproof_height: voteproof.height,
        };

        match (self.stage(), self.voteproof()) {
            (Stage::Init, None) if self.height() == Height::GENESIS => Ok(()),
            (Stage::Init, None) | (Stage::Accept, None) => {
                Err(BallotError::MissingVoteproof(self.stage()))
            }
            (Stage::Init, Some(voteproof)) => {
                let cites_previous_height =
                    voteproof.stage == Stage::Accept && voteproof.height + 1 == self.height();
                let cites_same_height = voteproof.height == self.height();
                if cites_previous_height || cites_same_height {
                    Ok(())
                } else {
                    Err(out_of_place(voteproof))
                }
            }
            (Stage::Accept, Some(voteproof)) => {
                if voteproof.stage == Stage::Init
                    && voteproof.height == self.height()
                    && voteproof.round == self.round()
                {
                    Ok(())
                } else {
                    Err(out_of_place(voteproof))
                }
            }
            (_, _) => Ok(()),
        }
    }
}

/// A replica's announcement that it enters `(height, round)`.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct InitBallot {
    pub header: BallotHeader,
    pub fact: InitFact,
    /// Absent only for the genesis INIT ballot.
    pub voteproof: Option<Voteproof>,
}

impl InitBallot {
    pub fn new(
        keypair: &Keypair,
        node: Address,
        fact: InitFact,
        voteproof: Option<Voteproof>,
        network_id: &NetworkID,
    ) -> InitBallot {
        let header = BallotHeader::sign(
            keypair,
            node,
            &Fact::Init(fact.clone()),
            voteproof.as_ref(),
            network_id,
        );
        InitBallot {
            header,
            fact,
            voteproof,
        }
    }
}

impl SignedBallot for InitBallot {
    fn header(&self) -> &BallotHeader {
        &self.header
    }

    fn fact(&self) -> Fact {
        Fact::Init(self.fact.clone())
    }

    fn voteproof(&self) -> Option<&Voteproof> {
        self.voteproof.as_ref()
    }

    fn height(&self) -> Height {
        self.fact.height
    }

    fn round(&self) -> Round {
        self.fact.round
    }

    fn stage(&self) -> Stage {
        Stage::Init
    }
}

/// A replica's statement of the block it derived from a proposal.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct SignBallot {
    pub header: BallotHeader,
    pub fact: SignFact,
}

impl SignBallot {
    pub fn new(
        keypair: &Keypair,
        node: Address,
        fact: SignFact,
        network_id: &NetworkID,
    ) -> SignBallot {
        let header = BallotHeader::sign(keypair, node, &Fact::Sign(fact.clone()), None, network_id);
        SignBallot { header, fact }
    }
}

impl SignedBallot for SignBallot {
    fn header(&self) -> &BallotHeader {
        &self.header
    }

    fn fact(&self) -> Fact {
        Fact::Sign(self.fact.clone())
    }

    fn voteproof(&self) -> Option<&Voteproof> {
        None
    }

    fn height(&self) -> Height {
        self.fact.height
    }

    fn round(&self) -> Round {
        self.fact.round
    }

    fn stage(&self) -> Stage {
        Stage::Sign
    }
}

/// A replica's agreement to commit a block.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct AcceptBallot {
    pub header: BallotHeader,
    pub fact: AcceptFact,
    /// The INIT voteproof of the same height and round.
    pub voteproof: Voteproof,
}

impl AcceptBallot {
    pub fn new(
        keypair: &Keypair,
        node: Address,
        fact: AcceptFact,
        voteproof: Voteproof,
        network_id: &NetworkID,
    ) -> AcceptBallot {
        let header = BallotHeader::sign(
            keypair,
            node,
            &Fact::Accept(fact.clone()),
            Some(&voteproof),
            network_id,
        );
        AcceptBallot {
            header,
            fact,
            voteproof,
        }
    }
}

impl SignedBallot for AcceptBallot {
    fn header(&self) -> &BallotHeader {
        &self.header
    }

    fn fact(&self) -> Fact {
        Fact::Accept(self.fact.clone())
    }

    fn voteproof(&self) -> Option<&Voteproof> {
        Some(&self.voteproof)
    }

    fn height(&self) -> Height {
        self.fact.height
    }

    fn round(&self) -> Round {
        self.fact.round
    }

    fn stage(&self) -> Stage {
        Stage::Accept
    }
}

/// The proposer's suggestion of operation seals to include in the next block.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub header: BallotHeader,
    pub fact: ProposalFact,
}

impl Proposal {
    pub fn new(
        keypair: &Keypair,
        node: Address,
        fact: ProposalFact,
        network_id: &NetworkID,
    ) -> Proposal {
        let header =
            BallotHeader::sign(keypair, node, &Fact::Proposal(fact.clone()), None, network_id);
        Proposal { header, fact }
    }
}

impl SignedBallot for Proposal {
    fn header(&self) -> &BallotHeader {
        &self.header
    }

    fn fact(&self) -> Fact {
        Fact::Proposal(self.fact.clone())
    }

    fn voteproof(&self) -> Option<&Voteproof> {
        None
    }

    fn height(&self) -> Height {
        self.fact.height
    }

    fn round(&self) -> Round {
        self.fact.round
    }

    fn stage(&self) -> Stage {
        Stage::Proposal
    }
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Ballot {
    Init(InitBallot),
    Sign(SignBallot),
    Accept(AcceptBallot),
    Proposal(Proposal),
}

impl Ballot {
    /// Alias of [`SignedBallot::verify`].
    pub fn is_valid(&self, network_id: &NetworkID) -> Result<(), BallotError> {
        self.verify(network_id)
    }

    fn inner(&self) -> &dyn SignedBallot {
        match self {
            Ballot::Init(ballot) => ballot,
            Ballot::Sign(ballot) => ballot,
            Ballot::Accept(ballot) => ballot,
            Ballot::Proposal(ballot) => ballot,
        }
    }
}

impl SignedBallot for Ballot {
    fn header(&self) -> &BallotHeader {
        self.inner().header()
    }

    fn fact(&self) -> Fact {
        self.inner().fact()
    }

    fn voteproof(&self) -> Option<&Voteproof> {
        self.inner().voteproof()
    }

    fn height(&self) -> Height {
        self.inner().height()
    }

    fn round(&self) -> Round {
        self.inner().round()
    }

    fn stage(&self) -> Stage {
        self.inner().stage()
    }
}

impl From<InitBallot> for Ballot {
    fn from(ballot: InitBallot) -> Self {
        Ballot::Init(ballot)
    }
}

impl From<SignBallot> for Ballot {
    fn from(ballot: SignBallot) -> Self {
        Ballot::Sign(ballot)
    }
}

impl From<AcceptBallot> for Ballot {
    fn from(ballot: AcceptBallot) -> Self {
        Ballot::Accept(ballot)
    }
}

impl From<Proposal> for Ballot {
    fn from(ballot: Proposal) -> Self {
        Ballot::Proposal(ballot)
    }
}
