/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Generation of the genesis block.
//!
//! The genesis block is the only block whose voteproofs come from a single voter: the node that
//! generates it signs an INIT ballot (which, at the genesis height, cites no voteproof) and an ACCEPT
//! ballot, folds both through a one-voter [`BallotBox`], and attaches the resulting voteproofs to the
//! block. Every other replica of the network then stores the same block with
//! [`Replica::initialize`](crate::replica::Replica::initialize) before it starts.

use thiserror::Error;

use crate::{
    ballot_box::{BallotBox, BallotBoxError},
    local_state::LocalNode,
    types::{
        ballots::{AcceptBallot, Ballot, InitBallot, Proposal, SignedBallot},
        block::{operations_hash, Block, BlockError, Manifest},
        data_types::{CryptoHash, Height, NetworkID, Round, Stage},
        facts::{AcceptFact, InitFact, ProposalFact},
        threshold::{Threshold, ThresholdError},
        voteproof::{VoteResult, Voteproof},
    },
};

#[derive(Debug, Error, PartialEq)]
pub enum GenesisError {
    #[error("cannot build the genesis threshold: {0}")]
    Threshold(#[from] ThresholdError),
    #[error("genesis ballot was not accepted: {0}")]
    BallotBox(#[from] BallotBoxError),
    #[error("genesis {0} stage did not reach a majority")]
    NoMajority(Stage),
    #[error("generated genesis block is invalid: {0}")]
    InvalidBlock(#[from] BlockError),
}

pub struct GenesisGenerator {
    node: LocalNode,
    network_id: NetworkID,
}

impl GenesisGenerator {
    pub fn new(node: LocalNode, network_id: NetworkID) -> GenesisGenerator {
        GenesisGenerator { node, network_id }
    }

    /// Generate a committed genesis block that includes the operation seals in `seals`.
    pub fn generate(&self, seals: Vec<CryptoHash>) -> Result<Block, GenesisError> {
        let ballot_box = BallotBox::with_threshold(self.network_id.clone(), Threshold::new(1, 100.0)?);

        let init_ballot = InitBallot::new(
            self.node.keypair(),
            self.node.address().clone(),
            InitFact {
                height: Height::GENESIS,
                round: Round::default(),
                previous_block: CryptoHash::default(),
                previous_round: Round::default(),
            },
            None,
            &self.network_id,
        );
        let init_voteproof = self.vote(&ballot_box, init_ballot.into(), Stage::Init)?;

        let proposal = Proposal::new(
            self.node.keypair(),
            self.node.address().clone(),
            ProposalFact {
                height: Height::GENESIS,
                round: Round::default(),
                seals: seals.clone(),
            },
            &self.network_id,
        );

        let block = Block::new(
            Manifest {
                height: Height::GENESIS,
                round: Round::default(),
                proposal: proposal.hash(),
                previous_block: CryptoHash::default(),
                operations_hash: operations_hash(&seals),
            },
            seals,
        );

        let accept_ballot = AcceptBallot::new(
            self.node.keypair(),
            self.node.address().clone(),
            AcceptFact {
                height: Height::GENESIS,
                round: Round::default(),
                proposal: proposal.hash(),
                new_block: block.hash,
            },
            init_voteproof.clone(),
            &self.network_id,
        );
        let accept_voteproof = self.vote(&ballot_box, accept_ballot.into(), Stage::Accept)?;

        let block = block.with_voteproofs(init_voteproof, accept_voteproof);
        block.is_committed(&self.network_id)?;

        log::debug!("generated genesis block {}", block.hash);
        Ok(block)
    }

    fn vote(&self, ballot_box: &BallotBox, ballot: Ballot, stage: Stage) -> Result<Voteproof, GenesisError> {
        let outcome = ballot_box.vote(&ballot)?;
        if outcome.voteproof.result != VoteResult::Majority {
            return Err(GenesisError::NoMajority(stage));
        }
        Ok(outcome.voteproof)
    }
}
