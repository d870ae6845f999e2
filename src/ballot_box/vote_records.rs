/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The accumulator of votes for a single `(height, round, stage)`.

use std::collections::BTreeMap;

use crate::types::{
    ballots::{Ballot, SignedBallot},
    data_types::{Address, CryptoHash, Height, Round, Stage, Timestamp},
    facts::Fact,
    threshold::Threshold,
    voteproof::{VoteRecord, VoteResult, Voteproof},
};

/// Votes cast for one `(height, round, stage)`, and the voteproof they currently amount to.
///
/// At most one ballot is kept per node: the first one wins. Once `voteproof` is finished, later ballots
/// are still recorded but no longer change it.
pub(crate) struct VoteRecords {
    ballots: BTreeMap<Address, Ballot>,
    facts: BTreeMap<CryptoHash, Fact>,
    tally: BTreeMap<CryptoHash, u32>,
    voteproof: Voteproof,
}

impl VoteRecords {
    pub(crate) fn new(height: Height, round: Round, stage: Stage, threshold: Threshold) -> Self {
        VoteRecords {
            ballots: BTreeMap::new(),
            facts: BTreeMap::new(),
            tally: BTreeMap::new(),
            voteproof: Voteproof {
                height,
                round,
                stage,
                threshold,
                result: VoteResult::NotYet,
                majority: None,
                facts: BTreeMap::new(),
                ballots: BTreeMap::new(),
                votes: BTreeMap::new(),
                finished_at: Timestamp::default(),
            },
        }
    }

    /// Fold `ballot` into the records. Returns the resulting voteproof, and whether this vote is the one
    /// that finished it.
    pub(crate) fn vote(&mut self, ballot: &Ballot) -> (Voteproof, bool) {
        let node = ballot.node().clone();
        if self.ballots.contains_key(&node) {
            return (self.voteproof.clone(), false);
        }

        let fact_hash = ballot.fact_hash();
        let fact = ballot.fact();
        self.ballots.insert(node.clone(), ballot.clone());
        self.facts.entry(fact_hash).or_insert_with(|| fact.clone());
        *self.tally.entry(fact_hash).or_default() += 1;

        if self.voteproof.is_finished() {
            return (self.voteproof.clone(), false);
        }

        let voteproof = &mut self.voteproof;
        voteproof.ballots.insert(node.clone(), ballot.hash());
        voteproof.votes.insert(node.clone(), vote_record(ballot));
        voteproof.facts.entry(fact_hash).or_insert(fact);

        if voteproof.votes.len() < voteproof.threshold.value as usize {
            return (voteproof.clone(), false);
        }

        let tally: Vec<(CryptoHash, u32)> = self.tally.iter().map(|(k, v)| (*k, *v)).collect();
        let (result, winner) = voteproof.threshold.check(&tally);
        voteproof.result = result;
        voteproof.majority = winner.and_then(|hash| self.facts.get(&hash).cloned());

        let finished = voteproof.is_finished();
        if finished {
            voteproof.finished_at = Timestamp::now();
        }
        (voteproof.clone(), finished)
    }

    pub(crate) fn vote_record(&self, node: &Address) -> Option<VoteRecord> {
        self.ballots.get(node).map(vote_record)
    }

    pub(crate) fn voteproof(&self) -> &Voteproof {
        &self.voteproof
    }
}

fn vote_record(ballot: &Ballot) -> VoteRecord {
    VoteRecord {
        node: ballot.node().clone(),
        fact_hash: ballot.fact_hash(),
        fact_signature: *ballot.fact_signature(),
        signer: *ballot.signer(),
        voted_at: ballot.signed_at(),
    }
}
