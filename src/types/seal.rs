/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Seals: everything a replica sends to or receives from its peers.
//!
//! ## Wire format
//!
//! A seal is encoded as `[type tag: u16 LE][version: u8][borsh body]`. Every ballot type has its own
//! tag, so a decoder picks the body type with a single match and never has to guess. Decoding rejects
//! unknown tags, unknown versions, and bodies with trailing bytes.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    ballots::{AcceptBallot, Ballot, BallotError, InitBallot, Proposal, SignBallot, SignedBallot},
    crypto_primitives::{hash_all, verify_digest, Keypair},
    data_types::{Address, CryptoHash, NetworkID, PublicKeyBytes, SignatureBytes, Timestamp},
};

pub const INIT_BALLOT_TAG: u16 = 0x0101;
pub const SIGN_BALLOT_TAG: u16 = 0x0102;
pub const ACCEPT_BALLOT_TAG: u16 = 0x0103;
pub const PROPOSAL_TAG: u16 = 0x0104;
pub const OPERATION_SEAL_TAG: u16 = 0x0201;

pub const SEAL_VERSION: u8 = 1;

/// A signed bundle of opaque operations submitted to the network. Proposals reference these by hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OperationSeal {
    pub node: Address,
    pub signer: PublicKeyBytes,
    pub signature: SignatureBytes,
    pub signed_at: Timestamp,
    pub hash: CryptoHash,
    pub operations: Vec<Vec<u8>>,
}

impl OperationSeal {
    pub fn new(
        keypair: &Keypair,
        node: Address,
        operations: Vec<Vec<u8>>,
        network_id: &NetworkID,
    ) -> OperationSeal {
        let signed_at = Timestamp::now();
        let signer = keypair.public_bytes();
        let hash = Self::body_hash(&node, &signer, signed_at, &operations);
        OperationSeal {
            signature: keypair.sign_digest(&hash, network_id),
            node,
            signer,
            signed_at,
            hash,
            operations,
        }
    }

    fn body_hash(
        node: &Address,
        signer: &PublicKeyBytes,
        signed_at: Timestamp,
        operations: &Vec<Vec<u8>>,
    ) -> CryptoHash {
        let bytes = (node.clone(), *signer, signed_at, operations.clone())
            .try_to_vec()
            .unwrap_or_default();
        hash_all(&[&bytes])
    }

    pub fn is_valid(&self, network_id: &NetworkID) -> Result<(), SealError> {
        if self.operations.is_empty() {
            return Err(SealError::EmptyOperations);
        }
        let hash = Self::body_hash(&self.node, &self.signer, self.signed_at, &self.operations);
        if hash != self.hash {
            return Err(SealError::HashMismatch);
        }
        if !verify_digest(&self.signer, &self.hash, network_id, &self.signature) {
            return Err(SealError::InvalidSignature(self.node.clone()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Seal {
    Ballot(Ballot),
    Operation(OperationSeal),
}

#[derive(Debug, Error, PartialEq)]
pub enum SealError {
    #[error("invalid ballot: {0}")]
    InvalidBallot(#[from] BallotError),
    #[error("operation seal carries no operations")]
    EmptyOperations,
    #[error("seal hash does not match its body")]
    HashMismatch,
    #[error("signature of {0} does not verify")]
    InvalidSignature(Address),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealDecodeError {
    #[error("seal is shorter than its header")]
    Truncated,
    #[error("unknown seal type tag {0:#06x}")]
    UnknownTag(u16),
    #[error("unknown version {version} for seal type tag {tag:#06x}")]
    UnknownVersion { tag: u16, version: u8 },
    #[error("malformed seal body: {0}")]
    Malformed(String),
}

impl Seal {
    pub fn hash(&self) -> CryptoHash {
        match self {
            Seal::Ballot(ballot) => ballot.hash(),
            Seal::Operation(seal) => seal.hash,
        }
    }

    pub fn is_valid(&self, network_id: &NetworkID) -> Result<(), SealError> {
        match self {
            Seal::Ballot(ballot) => Ok(ballot.is_valid(network_id)?),
            Seal::Operation(seal) => seal.is_valid(network_id),
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            Seal::Ballot(Ballot::Init(_)) => INIT_BALLOT_TAG,
            Seal::Ballot(Ballot::Sign(_)) => SIGN_BALLOT_TAG,
            Seal::Ballot(Ballot::Accept(_)) => ACCEPT_BALLOT_TAG,
            Seal::Ballot(Ballot::Proposal(_)) => PROPOSAL_TAG,
            Seal::Operation(_) => OPERATION_SEAL_TAG,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.tag().to_le_bytes().to_vec();
        bytes.push(SEAL_VERSION);
        let body = match self {
            Seal::Ballot(Ballot::Init(ballot)) => ballot.try_to_vec(),
            Seal::Ballot(Ballot::Sign(ballot)) => ballot.try_to_vec(),
            Seal::Ballot(Ballot::Accept(ballot)) => ballot.try_to_vec(),
            Seal::Ballot(Ballot::Proposal(ballot)) => ballot.try_to_vec(),
            Seal::Operation(seal) => seal.try_to_vec(),
        };
        bytes.extend(body.unwrap_or_default());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Seal, SealDecodeError> {
        if bytes.len() < 3 {
            return Err(SealDecodeError::Truncated);
        }
        let tag = u16::from_le_bytes([bytes[0], bytes[1]]);
        let version = bytes[2];
        let body = &bytes[3..];

        if !matches!(
            tag,
            INIT_BALLOT_TAG | SIGN_BALLOT_TAG | ACCEPT_BALLOT_TAG | PROPOSAL_TAG | OPERATION_SEAL_TAG
        ) {
            return Err(SealDecodeError::UnknownTag(tag));
        }
        if version != SEAL_VERSION {
            return Err(SealDecodeError::UnknownVersion { tag, version });
        }

        let seal = match tag {
            INIT_BALLOT_TAG => Seal::Ballot(Ballot::Init(decode_body::<InitBallot>(body)?)),
            SIGN_BALLOT_TAG => Seal::Ballot(Ballot::Sign(decode_body::<SignBallot>(body)?)),
            ACCEPT_BALLOT_TAG => Seal::Ballot(Ballot::Accept(decode_body::<AcceptBallot>(body)?)),
            PROPOSAL_TAG => Seal::Ballot(Ballot::Proposal(decode_body::<Proposal>(body)?)),
            _ => Seal::Operation(decode_body::<OperationSeal>(body)?),
        };
        Ok(seal)
    }
}

fn decode_body<T: BorshDeserialize>(body: &[u8]) -> Result<T, SealDecodeError> {
    T::try_from_slice(body).map_err(|err| SealDecodeError::Malformed(err.to_string()))
}

impl From<Ballot> for Seal {
    fn from(ballot: Ballot) -> Self {
        Seal::Ballot(ballot)
    }
}

impl From<OperationSeal> for Seal {
    fn from(seal: OperationSeal) -> Self {
        Seal::Operation(seal)
    }
}
