/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state in which a replica that has all blocks it knows of waits to enter the network's current
//! round.
//!
//! While joining, the replica broadcasts INIT ballots for the height after its last block every
//! `interval_broadcasting_init_ballot_in_joining`, citing the ACCEPT voteproof of its last block. It
//! stays until an INIT voteproof for that height arrives and it can move to Consensus, or until a
//! ballot or voteproof shows that the network is ahead of it and it has to move to Syncing.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::{
    timer::{CallbackTimer, Interval, Timers},
    types::{
        ballots::{AcceptBallot, Ballot, InitBallot},
        block::Block,
        data_types::{Height, Round, Stage},
        facts::Fact,
        seal::Seal,
        voteproof::{VoteResult, Voteproof},
    },
};

use super::{
    base::{timer_broadcast_init_ballot, HandlerBase, IMMEDIATELY},
    ConsensusState, StateChangeContext, StateError, StateHandler,
};

pub struct Joining {
    base: HandlerBase,
    timers: Timers,
    current_round: Arc<AtomicU64>,
    /// A block for the next height, processed from a proposal an ACCEPT ballot referred to, and the
    /// INIT voteproof that ballot cited.
    processed: Mutex<Option<(Block, Voteproof)>>,
}

impl Joining {
    pub fn new(base: HandlerBase) -> Joining {
        Joining {
            base,
            timers: Timers::new(),
            current_round: Arc::new(AtomicU64::new(0)),
            processed: Mutex::new(None),
        }
    }

    /// The round of the INIT ballots this handler broadcasts.
    pub fn current_round(&self) -> Round {
        Round::new(self.current_round.load(Ordering::SeqCst))
    }

    fn expected_height(&self) -> Height {
        self.base.local.last_height() + 1
    }

    fn start_broadcasting(&self) -> Result<(), StateError> {
        let base = self.base.clone();
        let current_round = Arc::clone(&self.current_round);
        let interval = Interval::first_then(
            IMMEDIATELY,
            self.base.policy().interval_broadcasting_init_ballot_in_joining,
        );

        let timer = CallbackTimer::new(timer_broadcast_init_ballot(), interval, move |_| {
            let snapshot = base.local.snapshot();
            let voteproof = match &snapshot.last_accept_voteproof {
                Some(voteproof) => voteproof.clone(),
                None => {
                    log::debug!("no ACCEPT voteproof to cite yet; skipping INIT ballot");
                    return Ok(true);
                }
            };
            let ballot = base.init_ballot(
                snapshot.last_height() + 1,
                Round::new(current_round.load(Ordering::SeqCst)),
                Some(voteproof),
            );
            base.broadcaster.broadcast_ballot(ballot);
            Ok(true)
        });

        self.timers.start(timer)?;
        Ok(())
    }

    fn to_syncing(&self, voteproof: Option<Voteproof>, ballot: Option<Ballot>) {
        let mut ctx = StateChangeContext::new(ConsensusState::Joining, ConsensusState::Syncing);
        ctx.voteproof = voteproof;
        ctx.ballot = ballot;
        self.base.request(ctx)
    }

    fn new_init_ballot(&self, ballot: &InitBallot) {
        let voteproof = match &ballot.voteproof {
            Some(voteproof) => voteproof,
            None => return,
        };
        let expected = self.expected_height();

        match voteproof.stage {
            Stage::Init if ballot.fact.height == expected => {
                if ballot.fact.round > self.current_round() {
                    log::debug!("joining round {} of height {}", ballot.fact.round, expected);
                    self.current_round
                        .store(ballot.fact.round.int(), Ordering::SeqCst);
                }
            }
            Stage::Init | Stage::Accept if ballot.fact.height > expected => self.to_syncing(
                Some(voteproof.clone()),
                Some(Ballot::Init(ballot.clone())),
            ),
            _ => (),
        }
    }

    fn new_accept_ballot(&self, ballot: &AcceptBallot) {
        let expected = self.expected_height();
        if ballot.fact.height > expected {
            return self.to_syncing(
                Some(ballot.voteproof.clone()),
                Some(Ballot::Accept(ballot.clone())),
            );
        }
        if ballot.fact.height < expected || ballot.voteproof.result != VoteResult::Majority {
            return;
        }

        {
            let processed = self.processed.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((block, _)) = processed.as_ref() {
                if block.manifest.proposal == ballot.fact.proposal {
                    return;
                }
            }
        }

        let proposal = match self.base.seal_pool.proposal_by_hash(&ballot.fact.proposal) {
            Some(proposal) => proposal,
            None => {
                log::debug!("proposal {} of ACCEPT ballot is not known yet", ballot.fact.proposal);
                return;
            }
        };

        match self
            .base
            .process_proposal(&proposal, &ballot.voteproof, self.base.process_context())
        {
            Ok(block) => {
                if block.hash != ballot.fact.new_block {
                    log::debug!(
                        "processed block {} differs from block {} of ACCEPT ballot",
                        block.hash,
                        ballot.fact.new_block
                    );
                }
                *self.processed.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((block, ballot.voteproof.clone()));
            }
            Err(err) => log::debug!("failed to process proposal {}: {}", ballot.fact.proposal, err),
        }
    }

    fn new_accept_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        let fact = match (&voteproof.result, &voteproof.majority) {
            (VoteResult::Majority, Some(Fact::Accept(fact))) => fact,
            _ => {
                self.current_round
                    .store((voteproof.round + 1).int(), Ordering::SeqCst);
                return self.start_broadcasting();
            }
        };

        let processed = self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match processed {
            Some((block, init_voteproof))
                if block.hash == fact.new_block && init_voteproof.round == voteproof.round =>
            {
                let block = block.with_voteproofs(init_voteproof, voteproof.clone());
                if let Err(err) = self.base.commit_block(block) {
                    log::warn!("failed to store block at height {}: {}", voteproof.height, err);
                    self.to_syncing(Some(voteproof.clone()), None);
                    return Ok(());
                }
                self.current_round.store(0, Ordering::SeqCst);
                self.start_broadcasting()
            }
            _ => {
                self.to_syncing(Some(voteproof.clone()), None);
                Ok(())
            }
        }
    }
}

impl StateHandler for Joining {
    fn state(&self) -> ConsensusState {
        ConsensusState::Joining
    }

    fn activate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        if self.base.local.last_accept_voteproof().is_none() {
            return Err(StateError::NotReady(String::from(
                "joining requires the ACCEPT voteproof of the last block",
            )));
        }

        self.current_round.store(0, Ordering::SeqCst);
        *self.processed.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.start_broadcasting()
    }

    fn deactivate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        self.timers.stop_all();
        *self.processed.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn new_seal(&self, seal: &Seal) -> Result<(), StateError> {
        match seal {
            Seal::Ballot(Ballot::Init(ballot)) => self.new_init_ballot(ballot),
            Seal::Ballot(Ballot::Accept(ballot)) => self.new_accept_ballot(ballot),
            _ => (),
        }
        Ok(())
    }

    fn new_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        self.timers.stop_all();

        let expected = self.expected_height();
        if voteproof.height < expected {
            return self.start_broadcasting();
        }
        if voteproof.height > expected {
            self.to_syncing(Some(voteproof.clone()), None);
            return Ok(());
        }

        match voteproof.stage {
            Stage::Init => {
                self.base.request_state(
                    ConsensusState::Joining,
                    ConsensusState::Consensus,
                    Some(voteproof.clone()),
                );
                Ok(())
            }
            Stage::Accept => self.new_accept_voteproof(voteproof),
            _ => self.start_broadcasting(),
        }
    }
}
