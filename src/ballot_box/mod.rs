/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ballot box: collects ballots per `(height, round, stage)` and emits a [`Voteproof`] once a stage
//! reaches a majority or a draw.
//!
//! ## Concurrency
//!
//! [`BallotBox::vote`] may be called from any number of threads at once. Records live in a fixed number
//! of lock stripes keyed by the hash of `(height, round, stage)`, so votes for different stages rarely
//! contend. Each stage's [`VoteRecords`] sits behind its own mutex, which is held while a vote is folded
//! in. Hence the first caller that brings a stage to its threshold is the one that finishes it, and every
//! later caller sees the same voteproof.
//!
//! ## Eviction
//!
//! Finishing a voteproof at height `h` drops every record below `h`. [`BallotBox::clean`] does the same
//! on demand.

mod vote_records;

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use thiserror::Error;

use crate::types::{
    ballots::{Ballot, BallotError, SignedBallot},
    data_types::{Height, NetworkID, Round, Stage},
    threshold::{Threshold, ThresholdError},
    voteproof::{VoteRecord, Voteproof},
};

pub(crate) use vote_records::VoteRecords;

const STRIPES: usize = 16;

/// Identifies one stage of one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoteKey {
    pub height: Height,
    pub round: Round,
    pub stage: Stage,
}

impl VoteKey {
    fn of(ballot: &Ballot) -> VoteKey {
        VoteKey {
            height: ballot.height(),
            round: ballot.round(),
            stage: ballot.stage(),
        }
    }

    fn stripe(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % STRIPES
    }
}

/// What a single call to [`BallotBox::vote`] produced.
#[derive(Clone, Debug, PartialEq)]
pub struct VoteOutcome {
    pub voteproof: Voteproof,
    /// True only for the one vote that moved the voteproof out of `NotYet`.
    pub newly_finished: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum BallotBoxError {
    #[error("{0} ballots are not voted on")]
    InvalidStage(Stage),
    #[error("invalid ballot: {0}")]
    InvalidBallot(#[from] BallotError),
    #[error("cannot compute threshold: {0}")]
    InvalidThreshold(#[from] ThresholdError),
}

type ThresholdSource = Box<dyn Fn() -> Result<Threshold, ThresholdError> + Send + Sync>;
type Stripe = RwLock<HashMap<VoteKey, Arc<Mutex<VoteRecords>>>>;

pub struct BallotBox {
    network_id: NetworkID,
    threshold: ThresholdSource,
    stripes: Vec<Stripe>,
}

impl BallotBox {
    /// Create a ballot box whose threshold is computed by `threshold` whenever a new stage opens, so a
    /// changing suffrage or policy applies from the next stage on.
    pub fn new(
        network_id: NetworkID,
        threshold: impl Fn() -> Result<Threshold, ThresholdError> + Send + Sync + 'static,
    ) -> BallotBox {
        BallotBox {
            network_id,
            threshold: Box::new(threshold),
            stripes: (0..STRIPES).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    /// Create a ballot box with a fixed threshold.
    pub fn with_threshold(network_id: NetworkID, threshold: Threshold) -> BallotBox {
        BallotBox::new(network_id, move || Ok(threshold))
    }

    /// Vote `ballot`.
    ///
    /// Voting is idempotent per node and stage: a second ballot from the same node returns the current
    /// voteproof without changing it.
    pub fn vote(&self, ballot: &Ballot) -> Result<VoteOutcome, BallotBoxError> {
        if !ballot.stage().can_vote() {
            return Err(BallotBoxError::InvalidStage(ballot.stage()));
        }
        ballot.is_valid(&self.network_id)?;

        let key = VoteKey::of(ballot);
        let records = self.load_or_create(key)?;
        let (voteproof, newly_finished) = records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .vote(ballot);

        if newly_finished {
            self.clean(voteproof.height);
        }

        Ok(VoteOutcome {
            voteproof,
            newly_finished,
        })
    }

    /// What the node that cast `ballot` voted in `ballot`'s stage, if it has voted.
    pub fn vote_record(&self, ballot: &Ballot) -> Option<VoteRecord> {
        let records = self.load(&VoteKey::of(ballot))?;
        let records = records.lock().unwrap_or_else(PoisonError::into_inner);
        records.vote_record(ballot.node())
    }

    /// The current voteproof of a stage, if anybody has voted in it.
    pub fn voteproof(&self, height: Height, round: Round, stage: Stage) -> Option<Voteproof> {
        let records = self.load(&VoteKey {
            height,
            round,
            stage,
        })?;
        let records = records.lock().unwrap_or_else(PoisonError::into_inner);
        Some(records.voteproof().clone())
    }

    /// Drop the records of every stage below `height`.
    pub fn clean(&self, height: Height) {
        for stripe in &self.stripes {
            stripe
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|key, _| key.height >= height);
        }
    }

    /// Number of stages currently held.
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| stripe.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, key: &VoteKey) -> Option<Arc<Mutex<VoteRecords>>> {
        self.stripes[key.stripe()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn load_or_create(&self, key: VoteKey) -> Result<Arc<Mutex<VoteRecords>>, BallotBoxError> {
        if let Some(records) = self.load(&key) {
            return Ok(records);
        }

        let threshold = (self.threshold)()?;
        let mut stripe = self.stripes[key.stripe()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let records = stripe.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(VoteRecords::new(
                key.height,
                key.round,
                key.stage,
                threshold,
            )))
        });
        Ok(Arc::clone(records))
    }
}
