/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Checks a ballot must pass before the [`StatesController`](super::StatesController) votes it or hands
//! it to a handler.
//!
//! [`Voteproof::validate`] only shows that a voteproof is consistent with itself. A voteproof cited by a
//! ballot, or attached to a block fetched while syncing, must also have been voted by members of the
//! local suffrage under their registered keys, against the threshold the local policy gives the
//! suffrage. The genesis voteproofs are exempt: a single node votes them with a one-voter threshold.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    local_state::LocalState,
    networking::nodes::Nodes,
    suffrage::Suffrage,
    types::{
        ballots::{Ballot, BallotError, SignedBallot},
        data_types::{Address, Height, PublicKeyBytes, Round, Timestamp},
        threshold::{Threshold, ThresholdError},
        voteproof::Voteproof,
    },
};

use super::base::HandlerBase;

#[derive(Debug, Error, PartialEq)]
pub enum BallotCheckError {
    #[error("{0} is not in the suffrage")]
    NotInSuffrage(Address),
    #[error("{0} is not a known node")]
    UnknownNode(Address),
    #[error("ballot of {node} is signed by {signer}, not by the node's key")]
    SignerMismatch {
        node: Address,
        signer: PublicKeyBytes,
    },
    #[error("{node} is not the proposer of height {height} round {round}")]
    NotProposer {
        node: Address,
        height: Height,
        round: Round,
    },
    #[error("ballot for height {height} is older than the local last block at {last_height}")]
    Stale { height: Height, last_height: Height },
    #[error("ballot was signed at {signed_at}, too far from the local clock")]
    OutOfTimespan { signed_at: Timestamp },
    #[error("invalid ballot: {0}")]
    Invalid(#[from] BallotError),
    #[error("voter {0} of the voteproof is not in the suffrage")]
    VoterNotInSuffrage(Address),
    #[error("vote of {voter} is signed by {signer}, not by the voter's key")]
    VoterSignerMismatch {
        voter: Address,
        signer: PublicKeyBytes,
    },
    #[error("voteproof threshold {got:?} differs from the local threshold {expected:?}")]
    ThresholdMismatch {
        expected: Threshold,
        got: Threshold,
    },
    #[error("cannot compute the local threshold: {0}")]
    LocalThreshold(#[from] ThresholdError),
}

pub struct BallotChecker {
    local: Arc<LocalState>,
    suffrage: Arc<dyn Suffrage>,
    nodes: Arc<Nodes>,
}

impl BallotChecker {
    pub fn new(local: Arc<LocalState>, suffrage: Arc<dyn Suffrage>, nodes: Arc<Nodes>) -> BallotChecker {
        BallotChecker {
            local,
            suffrage,
            nodes,
        }
    }

    pub(crate) fn from_base(base: &HandlerBase) -> BallotChecker {
        BallotChecker::new(
            Arc::clone(&base.local),
            Arc::clone(&base.suffrage),
            Arc::clone(&base.nodes),
        )
    }

    /// Run every check on `ballot`. Signatures are verified before any suffrage or proposer lookup.
    pub fn check(&self, ballot: &Ballot) -> Result<(), BallotCheckError> {
        self.check_height(ballot)?;
        ballot.is_valid(self.local.network_id())?;
        self.check_suffrage(ballot)?;
        self.check_signer(ballot)?;
        self.check_timespan(ballot)?;
        if let Some(voteproof) = ballot.voteproof() {
            self.check_voteproof(voteproof)?;
        }
        Ok(())
    }

    /// Check that `voteproof` was voted by the local suffrage. Run [`Voteproof::validate`] first.
    pub fn check_voteproof(&self, voteproof: &Voteproof) -> Result<(), BallotCheckError> {
        if voteproof.height == Height::GENESIS {
            return Ok(());
        }

        let total = u32::try_from(self.suffrage.nodes().len()).unwrap_or(u32::MAX);
        let expected = self.local.policy().threshold(total)?;
        if voteproof.threshold != expected {
            return Err(BallotCheckError::ThresholdMismatch {
                expected,
                got: voteproof.threshold,
            });
        }

        for (voter, vote) in &voteproof.votes {
            if !self.suffrage.is_inside(voter) {
                return Err(BallotCheckError::VoterNotInSuffrage(voter.clone()));
            }
            if vote.signer != self.registered_key(voter)? {
                return Err(BallotCheckError::VoterSignerMismatch {
                    voter: voter.clone(),
                    signer: vote.signer,
                });
            }
        }
        Ok(())
    }

    fn is_local(&self, ballot: &Ballot) -> bool {
        ballot.node() == self.local.node().address()
    }

    fn registered_key(&self, node: &Address) -> Result<PublicKeyBytes, BallotCheckError> {
        if node == self.local.node().address() {
            return Ok(self.local.node().public_key_bytes());
        }
        self.nodes
            .node(node)
            .map(|remote| remote.public_key_bytes())
            .ok_or_else(|| BallotCheckError::UnknownNode(node.clone()))
    }

    fn check_suffrage(&self, ballot: &Ballot) -> Result<(), BallotCheckError> {
        let node = ballot.node();
        if !self.suffrage.is_inside(node) {
            return Err(BallotCheckError::NotInSuffrage(node.clone()));
        }
        if let Ballot::Proposal(proposal) = ballot {
            if !self
                .suffrage
                .is_proposer(proposal.height(), proposal.round(), node)
            {
                return Err(BallotCheckError::NotProposer {
                    node: node.clone(),
                    height: proposal.height(),
                    round: proposal.round(),
                });
            }
        }
        Ok(())
    }

    fn check_signer(&self, ballot: &Ballot) -> Result<(), BallotCheckError> {
        if *ballot.signer() != self.registered_key(ballot.node())? {
            return Err(BallotCheckError::SignerMismatch {
                node: ballot.node().clone(),
                signer: *ballot.signer(),
            });
        }
        Ok(())
    }

    fn check_height(&self, ballot: &Ballot) -> Result<(), BallotCheckError> {
        let last_height = self.local.last_height();
        if ballot.height() < last_height {
            return Err(BallotCheckError::Stale {
                height: ballot.height(),
                last_height,
            });
        }
        Ok(())
    }

    fn check_timespan(&self, ballot: &Ballot) -> Result<(), BallotCheckError> {
        if self.is_local(ballot) {
            return Ok(());
        }
        let span = self.local.policy().timespan_valid_ballot;
        if !ballot.signed_at().is_within(Timestamp::now(), span) {
            return Err(BallotCheckError::OutOfTimespan {
                signed_at: ballot.signed_at(),
            });
        }
        Ok(())
    }
}
