/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus states and the handlers that drive a replica while it is in each of them.
//!
//! A replica is always in exactly one [`ConsensusState`]. The [`StatesController`] owns one
//! [`StateHandler`] per state, routes inbound seals and finished voteproofs to the active one, and
//! performs the transitions handlers request:
//!
//! 1. [`Booting`](booting::Booting) checks local storage and moves to Joining, or to Broken if the
//!    storage holds no committed block.
//! 2. [`Joining`](joining::Joining) broadcasts INIT ballots for the height after its last block until an
//!    INIT voteproof for that height lets it enter Consensus.
//! 3. [`Consensus`](consensus::Consensus) takes part in every stage of every round.
//! 4. [`Syncing`](syncing::Syncing) fetches the blocks the replica is missing from other nodes.
//! 5. [`Broken`](broken::Broken) declines all work.
//!
//! Handlers never change state themselves. They send a [`StateChangeContext`] on the transition channel
//! and the controller's arbiter thread applies it.

pub mod ballot_checker;
pub mod base;
pub mod booting;
pub mod broken;
pub mod consensus;
pub mod controller;
pub mod joining;
pub mod syncing;

pub use controller::StatesController;

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

use crate::{
    ballot_box::BallotBoxError,
    pluggables::{ProcessorError, StorageError},
    timer::TimerError,
    types::{
        ballots::{Ballot, BallotError},
        seal::{Seal, SealError},
        voteproof::Voteproof,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConsensusState {
    Booting,
    Joining,
    Consensus,
    Syncing,
    Broken,
}

impl Display for ConsensusState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusState::Booting => "BOOTING",
            ConsensusState::Joining => "JOINING",
            ConsensusState::Consensus => "CONSENSUS",
            ConsensusState::Syncing => "SYNCING",
            ConsensusState::Broken => "BROKEN",
        };
        f.write_str(name)
    }
}

/// A request to move from one state to another, and what the target handler should pick up from.
#[derive(Clone, Debug, PartialEq)]
pub struct StateChangeContext {
    pub from: ConsensusState,
    pub to: ConsensusState,
    pub voteproof: Option<Voteproof>,
    pub ballot: Option<Ballot>,
}

impl StateChangeContext {
    pub fn new(from: ConsensusState, to: ConsensusState) -> StateChangeContext {
        StateChangeContext {
            from,
            to,
            voteproof: None,
            ballot: None,
        }
    }

    pub fn with_voteproof(mut self, voteproof: Voteproof) -> StateChangeContext {
        self.voteproof = Some(voteproof);
        self
    }

    pub fn with_ballot(mut self, ballot: Ballot) -> StateChangeContext {
        self.ballot = Some(ballot);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("no handler for state {0}")]
    InvalidState(ConsensusState),
    #[error("invalid ballot: {0}")]
    InvalidBallot(String),
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<BallotError> for StateError {
    fn from(err: BallotError) -> Self {
        StateError::InvalidBallot(err.to_string())
    }
}

impl From<BallotBoxError> for StateError {
    fn from(err: BallotBoxError) -> Self {
        StateError::InvalidBallot(err.to_string())
    }
}

impl From<SealError> for StateError {
    fn from(err: SealError) -> Self {
        StateError::InvalidBallot(err.to_string())
    }
}

impl From<TimerError> for StateError {
    fn from(err: TimerError) -> Self {
        StateError::NotReady(err.to_string())
    }
}

impl From<StorageError> for StateError {
    fn from(err: StorageError) -> Self {
        StateError::Fatal(err.to_string())
    }
}

impl From<ProcessorError> for StateError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Timeout | ProcessorError::Cancelled => StateError::Timeout(err.to_string()),
            _ => StateError::Fatal(err.to_string()),
        }
    }
}

/// The behavior of a replica in one [`ConsensusState`].
///
/// Handlers are shared between the controller's threads and their own timers, so every method takes
/// `&self` and handlers keep their mutable state behind locks or atomics.
pub trait StateHandler: Send + Sync {
    fn state(&self) -> ConsensusState;

    /// Start driving the replica. `ctx` carries the voteproof or ballot that caused the transition.
    fn activate(&self, ctx: &StateChangeContext) -> Result<(), StateError>;

    /// Stop every timer and background task started since `activate`. Returns only once they have
    /// stopped.
    fn deactivate(&self, ctx: &StateChangeContext) -> Result<(), StateError>;

    /// Called with every seal that passed the controller's checks, before ballots are voted.
    fn new_seal(&self, seal: &Seal) -> Result<(), StateError>;

    /// Called once with every voteproof that finished in the ballot box.
    fn new_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError>;
}
