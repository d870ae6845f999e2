/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The arbiter of a replica's consensus state.
//!
//! The [`StatesController`] runs on a single thread. Between seals it applies the state transitions
//! that handlers requested, so the active handler never changes while a seal is being handled. Every
//! ballot goes through the same steps:
//! 1. The [`BallotChecker`] either admits it or the ballot is dropped with a
//!    [`RejectBallotEvent`](crate::events::RejectBallotEvent).
//! 2. Proposals are added to the [`SealPool`].
//! 3. The active handler sees the ballot.
//! 4. INIT, SIGN and ACCEPT ballots are voted in the [`BallotBox`]. The one vote that finishes a stage
//!    hands the resulting voteproof to the active handler.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    ballot_box::BallotBox,
    events::{ChangeStateEvent, CollectVoteproofEvent, Event, ReceiveBallotEvent, RejectBallotEvent},
    local_state::LocalState,
    seal_pool::SealPool,
    types::{
        ballots::{Ballot, SignedBallot},
        seal::Seal,
    },
};

use super::{
    ballot_checker::BallotChecker, base::HandlerBase, ConsensusState, StateChangeContext,
    StateError, StateHandler,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct StatesController {
    local: Arc<LocalState>,
    ballot_box: Arc<BallotBox>,
    seal_pool: Arc<SealPool>,
    checker: BallotChecker,
    handlers: HashMap<ConsensusState, Arc<dyn StateHandler>>,
    active: Mutex<Option<Arc<dyn StateHandler>>>,
    transitions: Sender<StateChangeContext>,
    event_publisher: Option<Sender<Event>>,
}

impl StatesController {
    pub fn new(
        base: &HandlerBase,
        ballot_box: Arc<BallotBox>,
        handlers: Vec<Arc<dyn StateHandler>>,
    ) -> StatesController {
        StatesController {
            local: Arc::clone(&base.local),
            ballot_box,
            seal_pool: Arc::clone(&base.seal_pool),
            checker: BallotChecker::from_base(base),
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.state(), handler))
                .collect(),
            active: Mutex::new(None),
            transitions: base.transitions.clone(),
            event_publisher: base.event_publisher.clone(),
        }
    }

    /// The state of the active handler. `None` until the first transition was applied.
    pub fn state(&self) -> Option<ConsensusState> {
        self.active_handler().map(|handler| handler.state())
    }

    fn active_handler(&self) -> Option<Arc<dyn StateHandler>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    /// Move to `ctx.to`: deactivate the active handler, then activate the target one.
    ///
    /// A request that does not start from the active state is stale (the replica has moved since it was
    /// sent) and is dropped, as is a request to move to the active state. If the target handler fails to
    /// activate, the replica moves to Broken.
    pub fn activate(&self, ctx: StateChangeContext) -> Result<(), StateError> {
        let next = self
            .handlers
            .get(&ctx.to)
            .cloned()
            .ok_or(StateError::InvalidState(ctx.to))?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            if current.state() == ctx.to {
                log::debug!("ignoring transition to {}: already active", ctx.to);
                return Err(StateError::InvalidState(ctx.to));
            }
            if current.state() != ctx.from {
                log::debug!(
                    "ignoring stale transition {} -> {}: active state is {}",
                    ctx.from,
                    ctx.to,
                    current.state()
                );
                return Err(StateError::InvalidState(ctx.from));
            }
            if let Err(err) = current.deactivate(&ctx) {
                log::warn!("failed to deactivate {}: {}", current.state(), err);
            }
        }

        let from = active.as_ref().map_or(ctx.from, |current| current.state());
        *active = Some(Arc::clone(&next));
        match next.activate(&ctx) {
            Ok(()) => {
                log::info!("state changed: {} -> {}", from, ctx.to);
                self.publish(Event::ChangeState(ChangeStateEvent {
                    timestamp: SystemTime::now(),
                    from,
                    to: ctx.to,
                }));
                Ok(())
            }
            Err(err) if ctx.to != ConsensusState::Broken => {
                log::error!("failed to activate {}: {}", ctx.to, err);
                let broken = self
                    .handlers
                    .get(&ConsensusState::Broken)
                    .cloned()
                    .ok_or(StateError::InvalidState(ConsensusState::Broken))?;
                let broken_ctx = StateChangeContext::new(ctx.to, ConsensusState::Broken);
                *active = Some(Arc::clone(&broken));
                broken.activate(&broken_ctx)?;
                self.publish(Event::ChangeState(ChangeStateEvent {
                    timestamp: SystemTime::now(),
                    from,
                    to: ConsensusState::Broken,
                }));
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Handle one inbound seal. Operation seals are pooled, ballots are checked, voted and handed to the
    /// active handler. A broken replica declines every seal, and a fatal error from a handler moves the
    /// replica to Broken.
    pub fn new_seal(&self, seal: Seal) -> Result<(), StateError> {
        if self.state() == Some(ConsensusState::Broken) {
            log::debug!("replica is broken; declining seal");
            return Ok(());
        }

        let result = self.handle_seal(seal);
        if let Err(StateError::Fatal(msg)) = &result {
            log::error!("fatal error: {}", msg);
            if let Some(state) = self.state() {
                let ctx = StateChangeContext::new(state, ConsensusState::Broken);
                if self.transitions.send(ctx).is_err() {
                    log::debug!("state transition channel is closed");
                }
            }
        }
        result
    }

    fn handle_seal(&self, seal: Seal) -> Result<(), StateError> {
        match seal {
            Seal::Operation(operation) => {
                operation.is_valid(self.local.network_id())?;
                if !self.seal_pool.add_operation(operation) {
                    log::debug!("operation seal already pooled or pool is full");
                }
                Ok(())
            }
            Seal::Ballot(ballot) => self.new_ballot(ballot),
        }
    }

    fn new_ballot(&self, ballot: Ballot) -> Result<(), StateError> {
        if let Err(err) = self.checker.check(&ballot) {
            log::debug!(
                "rejecting {} ballot from {} at height {} round {}: {}",
                ballot.stage(),
                ballot.node(),
                ballot.height(),
                ballot.round(),
                err
            );
            self.publish(Event::RejectBallot(RejectBallotEvent {
                timestamp: SystemTime::now(),
                node: ballot.node().clone(),
                stage: ballot.stage(),
                height: ballot.height(),
                round: ballot.round(),
                reason: err.to_string(),
            }));
            return Err(StateError::InvalidBallot(err.to_string()));
        }

        self.publish(Event::ReceiveBallot(ReceiveBallotEvent {
            timestamp: SystemTime::now(),
            ballot: ballot.clone(),
        }));

        let handler = self.active_handler();
        let seal = Seal::Ballot(ballot);
        if let Seal::Ballot(Ballot::Proposal(proposal)) = &seal {
            self.seal_pool.add_proposal(proposal.clone());
        }
        if let Some(handler) = &handler {
            handler.new_seal(&seal)?;
        }

        let ballot = match &seal {
            Seal::Ballot(ballot) if ballot.stage().can_vote() => ballot,
            _ => return Ok(()),
        };
        let outcome = self.ballot_box.vote(ballot)?;
        if !outcome.newly_finished {
            return Ok(());
        }

        log::debug!(
            "collected {} voteproof for height {} round {}: {:?}",
            outcome.voteproof.stage,
            outcome.voteproof.height,
            outcome.voteproof.round,
            outcome.voteproof.result
        );
        self.publish(Event::CollectVoteproof(CollectVoteproofEvent {
            timestamp: SystemTime::now(),
            voteproof: outcome.voteproof.clone(),
        }));
        match handler {
            Some(handler) => handler.new_voteproof(&outcome.voteproof),
            None => Ok(()),
        }
    }

    fn deactivate_all(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handler) = active {
            let ctx = StateChangeContext::new(handler.state(), handler.state());
            if let Err(err) = handler.deactivate(&ctx) {
                log::warn!("failed to deactivate {}: {}", handler.state(), err);
            }
        }
    }

    /// Spawn the controller thread. It applies requested transitions and handles inbound seals until
    /// `shutdown_signal` fires, then deactivates the active handler.
    pub(crate) fn start(
        self: Arc<Self>,
        seals: Receiver<Seal>,
        transitions: Receiver<StateChangeContext>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => (),
                }

                while let Ok(ctx) = transitions.try_recv() {
                    if let Err(err) = self.activate(ctx) {
                        log::debug!("transition not applied: {}", err);
                    }
                }

                match seals.recv_timeout(POLL_INTERVAL) {
                    Ok(seal) => match self.new_seal(seal) {
                        Ok(()) | Err(StateError::Fatal(_)) => (),
                        Err(err) => log::debug!("{}", err),
                    },
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            self.deactivate_all();
        })
    }
}
