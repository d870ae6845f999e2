/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state in which a replica takes part in every stage of every round.
//!
//! ## Rounds
//!
//! A round `(h, r)` starts with an INIT voteproof for it. From there:
//! 1. The proposer of `(h, r)` broadcasts a proposal (and rebroadcasts it every
//!    `interval_broadcasting_proposal`). Every replica starts a timer that moves to round `r + 1` if no
//!    proposal is processed within `timeout_waiting_proposal`.
//! 2. On receiving the proposal, a replica processes it into a block. Acting replicas broadcast a SIGN
//!    ballot for the block right away; every replica starts broadcasting an ACCEPT ballot for it after
//!    `wait_broadcasting_accept_ballot`.
//! 3. A SIGN majority for the local block makes the replica broadcast its ACCEPT ballot immediately.
//! 4. An ACCEPT majority commits the block. The replica then broadcasts INIT ballots for `(h + 1, 0)`
//!    until the next INIT voteproof arrives.
//!
//! A draw in any stage, a proposal that takes longer than `timeout_process_proposal` to process, and
//! the proposal timeout all move the replica to round `r + 1` by broadcasting INIT ballots for it.
//!
//! ## Falling behind
//!
//! A voteproof for a higher height, an INIT majority that builds on a block other than the local last
//! block, a SIGN or ACCEPT majority for a block the replica did not compute, and a failure to store a
//! committed block all move the replica to Syncing.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use crate::{
    pluggables::{ProcessContext, ProcessorError},
    timer::{CallbackTimer, Interval, Timers},
    types::{
        ballots::{Ballot, Proposal, SignedBallot},
        block::Block,
        data_types::{CryptoHash, Height, Round, Stage},
        facts::{AcceptFact, Fact},
        seal::Seal,
        voteproof::{VoteResult, Voteproof},
    },
};

use super::{
    base::{
        timer_broadcast_accept_ballot, timer_broadcast_init_ballot, timer_broadcast_proposal,
        timer_timeout_waiting_proposal, HandlerBase, IMMEDIATELY,
    },
    ConsensusState, StateChangeContext, StateError, StateHandler,
};

#[derive(Default)]
struct RoundState {
    /// The INIT voteproof that started the current round.
    init_voteproof: Option<Voteproof>,
    /// The block processed in the current round, keyed by the hash of its proposal.
    processed: Option<(CryptoHash, Block)>,
}

pub struct Consensus {
    base: HandlerBase,
    timers: Timers,
    active: AtomicBool,
    round: Mutex<RoundState>,
    in_flight: Mutex<Option<ProcessContext>>,
    proposal_lock: Mutex<()>,
}

impl Consensus {
    pub fn new(base: HandlerBase) -> Consensus {
        Consensus {
            base,
            timers: Timers::new(),
            active: AtomicBool::new(false),
            round: Mutex::new(RoundState::default()),
            in_flight: Mutex::new(None),
            proposal_lock: Mutex::new(()),
        }
    }

    /// The INIT voteproof of the round the handler is in.
    pub fn current_init_voteproof(&self) -> Option<Voteproof> {
        self.round_state().init_voteproof.clone()
    }

    fn round_state(&self) -> MutexGuard<'_, RoundState> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn expected_height(&self) -> Height {
        self.base.local.last_height() + 1
    }

    fn to_syncing(&self, voteproof: &Voteproof) {
        self.base.request_state(
            ConsensusState::Consensus,
            ConsensusState::Syncing,
            Some(voteproof.clone()),
        )
    }

    fn wait_proposal(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        {
            let mut round = self.round_state();
            round.init_voteproof = Some(voteproof.clone());
            round.processed = None;
        }
        self.base.local.set_last_init_voteproof(voteproof.clone());
        self.timers.stop_all();

        let (height, round) = (voteproof.height, voteproof.round);
        let is_proposer = self.base.is_proposer(height, round);
        log::debug!(
            "waiting for proposal of height {} round {} (proposer: {})",
            height,
            round,
            is_proposer
        );

        if is_proposer {
            let proposal = self
                .base
                .seal_pool
                .proposal(height, round)
                .filter(|proposal| proposal.node() == self.base.address())
                .unwrap_or_else(|| self.base.new_proposal(height, round));
            self.start_broadcasting_proposal(proposal)?;
        }

        self.start_timeout(voteproof)?;

        if !is_proposer {
            if let Some(proposal) = self.base.seal_pool.proposal(height, round) {
                self.handle_proposal(&proposal)?;
            }
        }
        Ok(())
    }

    fn start_broadcasting_proposal(&self, proposal: Proposal) -> Result<(), StateError> {
        let base = self.base.clone();
        let interval = Interval::first_then(
            IMMEDIATELY,
            self.base.policy().interval_broadcasting_proposal,
        );
        let timer = CallbackTimer::new(timer_broadcast_proposal(), interval, move |_| {
            base.broadcaster.broadcast_ballot(proposal.clone());
            Ok(true)
        });
        self.timers.start(timer)?;
        Ok(())
    }

    /// Move to the next round if the current one makes no progress in time.
    fn start_timeout(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        let base = self.base.clone();
        let voteproof = voteproof.clone();
        let policy = self.base.policy();
        let interval = Interval::first_then(
            policy.timeout_waiting_proposal,
            policy.interval_broadcasting_init_ballot,
        );
        let timer = CallbackTimer::new(timer_timeout_waiting_proposal(), interval, move |ticks| {
            let next_round = voteproof.round + 1;
            if ticks == 0 {
                log::debug!(
                    "no progress in height {} round {}; moving to round {}",
                    voteproof.height,
                    voteproof.round,
                    next_round
                );
                base.publish_next_round(voteproof.height, next_round);
            }
            let ballot = base.init_ballot(voteproof.height, next_round, Some(voteproof.clone()));
            base.broadcaster.broadcast_ballot(ballot);
            Ok(true)
        });
        self.timers.start(timer)?;
        Ok(())
    }

    fn start_broadcasting_init_ballot(
        &self,
        height: Height,
        round: Round,
        voteproof: Voteproof,
    ) -> Result<(), StateError> {
        let base = self.base.clone();
        let interval = Interval::first_then(
            IMMEDIATELY,
            self.base.policy().interval_broadcasting_init_ballot,
        );
        let timer = CallbackTimer::new(timer_broadcast_init_ballot(), interval, move |_| {
            let ballot = base.init_ballot(height, round, Some(voteproof.clone()));
            base.broadcaster.broadcast_ballot(ballot);
            Ok(true)
        });
        self.timers.start(timer)?;
        Ok(())
    }

    fn start_broadcasting_accept_ballot(
        &self,
        fact: AcceptFact,
        init_voteproof: Voteproof,
        first: Duration,
    ) -> Result<(), StateError> {
        let base = self.base.clone();
        let interval = Interval::first_then(
            first,
            self.base.policy().interval_broadcasting_accept_ballot,
        );
        let timer = CallbackTimer::new(timer_broadcast_accept_ballot(), interval, move |_| {
            let ballot = base.accept_ballot(fact.clone(), init_voteproof.clone());
            base.broadcaster.broadcast_ballot(ballot);
            Ok(true)
        });
        self.timers.start(timer)?;
        Ok(())
    }

    /// Give up on the round `voteproof` belongs to and broadcast INIT ballots for the next one.
    fn start_next_round(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        if !self.is_active() {
            return Ok(());
        }

        self.timers.stop_all();
        let round = voteproof.round + 1;
        log::debug!("moving to height {} round {}", voteproof.height, round);
        self.base.publish_next_round(voteproof.height, round);
        self.start_broadcasting_init_ballot(voteproof.height, round, voteproof.clone())
    }

    fn handle_proposal(&self, proposal: &Proposal) -> Result<(), StateError> {
        let _processing = self
            .proposal_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let voteproof = {
            let round = self.round_state();
            match &round.init_voteproof {
                Some(voteproof)
                    if voteproof.height == proposal.height()
                        && voteproof.round == proposal.round()
                        && voteproof.result == VoteResult::Majority =>
                {
                    if matches!(&round.processed, Some((hash, _)) if *hash == proposal.hash()) {
                        return Ok(());
                    }
                    voteproof.clone()
                }
                _ => return Ok(()),
            }
        };

        // A proposal arrived: give it the full timeout again.
        self.start_timeout(&voteproof)?;

        let context = self.base.process_context();
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some(context.clone());
        let result = self.base.process_proposal(proposal, &voteproof, context);
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let block = match result {
            Ok(block) => block,
            Err(err @ (ProcessorError::Timeout | ProcessorError::Cancelled)) => {
                log::warn!("processing proposal {} stopped: {}", proposal.hash(), err);
                return self.start_next_round(&voteproof);
            }
            Err(err) if proposal.node() == self.base.address() => {
                return Err(StateError::Fatal(format!(
                    "cannot process own proposal {}: {}",
                    proposal.hash(),
                    err
                )));
            }
            Err(err) => {
                log::warn!("cannot process proposal {}: {}", proposal.hash(), err);
                return Ok(());
            }
        };

        {
            let mut round = self.round_state();
            match &round.init_voteproof {
                Some(current)
                    if current.height == voteproof.height && current.round == voteproof.round =>
                {
                    round.processed = Some((proposal.hash(), block.clone()));
                }
                _ => return Ok(()),
            }
        }

        if self.base.is_acting(proposal.height(), proposal.round()) {
            let ballot = self.base.sign_ballot(proposal, &block);
            self.base.broadcaster.broadcast_ballot(ballot);
        }

        let fact = AcceptFact {
            height: proposal.height(),
            round: proposal.round(),
            proposal: proposal.hash(),
            new_block: block.hash,
        };
        self.start_broadcasting_accept_ballot(
            fact,
            voteproof,
            self.base.policy().wait_broadcasting_accept_ballot,
        )
    }

    /// The block the local node computed for `proposal` in `round`, processing the proposal from the
    /// pool first if it has not been processed yet.
    fn local_block(&self, proposal: &CryptoHash, round: Round) -> Result<Option<Block>, StateError> {
        let processed = {
            let state = self.round_state();
            match (&state.init_voteproof, &state.processed) {
                (Some(voteproof), _) if voteproof.round != round => return Ok(None),
                (_, Some((hash, block))) if hash == proposal => return Ok(Some(block.clone())),
                (_, processed) => processed.is_some(),
            }
        };
        if processed {
            return Ok(None);
        }

        match self.base.seal_pool.proposal_by_hash(proposal) {
            Some(proposal) => self.handle_proposal(&proposal)?,
            None => return Ok(None),
        }
        Ok(self
            .round_state()
            .processed
            .as_ref()
            .filter(|(hash, _)| hash == proposal)
            .map(|(_, block)| block.clone()))
    }

    fn handle_init_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        if let Some(current) = self.current_init_voteproof() {
            if current.height == voteproof.height && voteproof.round < current.round {
                log::debug!("ignoring INIT voteproof of past round {}", voteproof.round);
                return Ok(());
            }
        }

        match &voteproof.majority {
            Some(Fact::Init(fact)) if fact.previous_block == self.base.local.last_block_hash() => {
                self.wait_proposal(voteproof)
            }
            _ => {
                log::warn!(
                    "INIT majority of height {} builds on a block other than the local last block",
                    voteproof.height
                );
                self.to_syncing(voteproof);
                Ok(())
            }
        }
    }

    fn handle_sign_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        let fact = match &voteproof.majority {
            Some(Fact::Sign(fact)) => fact,
            _ => return Ok(()),
        };
        let init_voteproof = match self.current_init_voteproof() {
            Some(init) if init.height == voteproof.height && init.round == voteproof.round => init,
            _ => return Ok(()),
        };

        match self.local_block(&fact.proposal, voteproof.round)? {
            Some(block) if block.hash == fact.new_block => {
                let fact = AcceptFact {
                    height: fact.height,
                    round: fact.round,
                    proposal: fact.proposal,
                    new_block: fact.new_block,
                };
                self.start_broadcasting_accept_ballot(fact, init_voteproof, IMMEDIATELY)
            }
            Some(block) => {
                log::warn!(
                    "local block {} differs from SIGN majority block {}",
                    block.hash,
                    fact.new_block
                );
                self.to_syncing(voteproof);
                Ok(())
            }
            None => {
                log::debug!("SIGN majority for unknown proposal {}", fact.proposal);
                Ok(())
            }
        }
    }

    fn handle_accept_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        let fact = match &voteproof.majority {
            Some(Fact::Accept(fact)) => fact,
            _ => return Ok(()),
        };

        let block = match self.local_block(&fact.proposal, voteproof.round)? {
            Some(block) if block.hash == fact.new_block => block,
            _ => {
                log::warn!("cannot commit ACCEPT majority block {} locally", fact.new_block);
                self.to_syncing(voteproof);
                return Ok(());
            }
        };
        let init_voteproof = match self.current_init_voteproof() {
            Some(init) if init.height == voteproof.height && init.round == voteproof.round => init,
            _ => {
                self.to_syncing(voteproof);
                return Ok(());
            }
        };

        self.timers.stop_all();
        if let Err(err) = self
            .base
            .commit_block(block.with_voteproofs(init_voteproof, voteproof.clone()))
        {
            log::warn!("failed to store block at height {}: {}", voteproof.height, err);
            self.to_syncing(voteproof);
            return Ok(());
        }
        self.round_state().processed = None;

        self.start_broadcasting_init_ballot(voteproof.height + 1, Round::default(), voteproof.clone())
    }
}

impl StateHandler for Consensus {
    fn state(&self) -> ConsensusState {
        ConsensusState::Consensus
    }

    fn activate(&self, ctx: &StateChangeContext) -> Result<(), StateError> {
        let voteproof = match &ctx.voteproof {
            Some(voteproof) if voteproof.stage == Stage::Init => voteproof,
            _ => {
                return Err(StateError::NotReady(String::from(
                    "consensus starts with an INIT voteproof",
                )))
            }
        };
        voteproof
            .validate(self.base.network_id())
            .map_err(|err| StateError::InvalidBallot(err.to_string()))?;
        if self.base.local.last_block().is_none() {
            return Err(StateError::NotReady(String::from("no last block")));
        }

        *self.round_state() = RoundState::default();
        self.active.store(true, Ordering::SeqCst);
        self.new_voteproof(voteproof)
    }

    fn deactivate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        self.active.store(false, Ordering::SeqCst);
        if let Some(context) = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).take() {
            context.cancel();
        }
        self.timers.stop_all();
        Ok(())
    }

    fn new_seal(&self, seal: &Seal) -> Result<(), StateError> {
        match seal {
            Seal::Ballot(Ballot::Proposal(proposal)) if self.is_active() => {
                self.handle_proposal(proposal)
            }
            _ => Ok(()),
        }
    }

    fn new_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        if !self.is_active() {
            return Ok(());
        }

        let expected = self.expected_height();
        if voteproof.height < expected {
            return Ok(());
        }
        if voteproof.height > expected {
            self.to_syncing(voteproof);
            return Ok(());
        }

        match (voteproof.result, voteproof.stage) {
            (VoteResult::Draw, _) => {
                let current = self.current_init_voteproof();
                match current {
                    Some(current) if voteproof.round < current.round => Ok(()),
                    _ => self.start_next_round(voteproof),
                }
            }
            (VoteResult::Majority, Stage::Init) => self.handle_init_voteproof(voteproof),
            (VoteResult::Majority, Stage::Sign) => self.handle_sign_voteproof(voteproof),
            (VoteResult::Majority, Stage::Accept) => self.handle_accept_voteproof(voteproof),
            _ => Ok(()),
        }
    }
}
