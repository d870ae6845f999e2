/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! What every state handler works with: the replica's shared components, and helpers to sign, broadcast
//! and commit.

use std::{
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    events::{CommitBlockEvent, Event, MoveNextRoundEvent, ProcessProposalEvent},
    local_state::LocalState,
    networking::{nodes::Nodes, sending::Broadcaster},
    pluggables::{BlockStorage, ProcessContext, ProcessorError, ProposalProcessor, StorageError},
    policy::Policy,
    seal_pool::SealPool,
    suffrage::Suffrage,
    timer::TimerID,
    types::{
        ballots::{AcceptBallot, InitBallot, Proposal, SignBallot, SignedBallot},
        block::Block,
        data_types::{Address, Height, NetworkID, Round},
        facts::{AcceptFact, InitFact, ProposalFact, SignFact},
        voteproof::Voteproof,
    },
};

use super::{ConsensusState, StateChangeContext};

/// The shortest wait a [`CallbackTimer`](crate::timer::CallbackTimer) accepts. Used to fire a timer's
/// first tick right away.
pub(crate) const IMMEDIATELY: Duration = Duration::from_nanos(1);

pub(crate) fn timer_broadcast_init_ballot() -> TimerID {
    TimerID::new("broadcast-init-ballot")
}

pub(crate) fn timer_broadcast_accept_ballot() -> TimerID {
    TimerID::new("broadcast-accept-ballot")
}

pub(crate) fn timer_broadcast_proposal() -> TimerID {
    TimerID::new("broadcast-proposal")
}

pub(crate) fn timer_timeout_waiting_proposal() -> TimerID {
    TimerID::new("timeout-waiting-proposal")
}

/// The components shared by every state handler of a replica.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for the components shared by the state handlers. Every setter except
    `event_publisher` is required.
"))]
pub struct HandlerBase {
    #[builder(setter(doc = "Set the local node's view of the chain."))]
    pub(crate) local: Arc<LocalState>,
    #[builder(setter(doc = "Set the suffrage that decides who votes and who proposes."))]
    pub(crate) suffrage: Arc<dyn Suffrage>,
    #[builder(setter(doc = "Set the storage committed blocks are written to."))]
    pub(crate) storage: Arc<dyn BlockStorage>,
    #[builder(setter(doc = "Set the registry of remote nodes."))]
    pub(crate) nodes: Arc<Nodes>,
    #[builder(setter(doc = "Set the pool of received operation seals and proposals."))]
    pub(crate) seal_pool: Arc<SealPool>,
    #[builder(setter(doc = "Set the processor that turns proposals into blocks."))]
    pub(crate) processor: Arc<Mutex<dyn ProposalProcessor>>,
    #[builder(setter(doc = "Set the broadcaster ballots are sent with."))]
    pub(crate) broadcaster: Broadcaster,
    #[builder(setter(doc = "Set the sending end of the state transition channel."))]
    pub(crate) transitions: Sender<StateChangeContext>,
    #[builder(default, setter(doc = "Set the sending end of the event bus."))]
    pub(crate) event_publisher: Option<Sender<Event>>,
}

impl HandlerBase {
    pub(crate) fn address(&self) -> &Address {
        self.local.node().address()
    }

    pub(crate) fn network_id(&self) -> &NetworkID {
        self.local.network_id()
    }

    pub(crate) fn policy(&self) -> Arc<Policy> {
        self.local.policy()
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    /// Ask the controller to move from `from` to `to`.
    pub(crate) fn request_state(
        &self,
        from: ConsensusState,
        to: ConsensusState,
        voteproof: Option<Voteproof>,
    ) {
        let mut ctx = StateChangeContext::new(from, to);
        ctx.voteproof = voteproof;
        self.request(ctx)
    }

    pub(crate) fn request(&self, ctx: StateChangeContext) {
        log::debug!("requesting state change {} -> {}", ctx.from, ctx.to);
        if self.transitions.send(ctx).is_err() {
            log::debug!("state transition channel is closed");
        }
    }

    pub(crate) fn is_acting(&self, height: Height, round: Round) -> bool {
        self.suffrage.is_acting(height, round, self.address())
    }

    pub(crate) fn is_proposer(&self, height: Height, round: Round) -> bool {
        self.suffrage.is_proposer(height, round, self.address())
    }

    /// An INIT ballot for `(height, round)` that builds on the local last block.
    pub(crate) fn init_ballot(
        &self,
        height: Height,
        round: Round,
        voteproof: Option<Voteproof>,
    ) -> InitBallot {
        let snapshot = self.local.snapshot();
        InitBallot::new(
            self.local.node().keypair(),
            self.address().clone(),
            InitFact {
                height,
                round,
                previous_block: snapshot.last_block_hash(),
                previous_round: snapshot.last_round(),
            },
            voteproof,
            self.network_id(),
        )
    }

    pub(crate) fn sign_ballot(&self, proposal: &Proposal, block: &Block) -> SignBallot {
        SignBallot::new(
            self.local.node().keypair(),
            self.address().clone(),
            SignFact {
                height: proposal.height(),
                round: proposal.round(),
                proposal: proposal.hash(),
                new_block: block.hash,
            },
            self.network_id(),
        )
    }

    pub(crate) fn accept_ballot(&self, fact: AcceptFact, init_voteproof: Voteproof) -> AcceptBallot {
        AcceptBallot::new(
            self.local.node().keypair(),
            self.address().clone(),
            fact,
            init_voteproof,
            self.network_id(),
        )
    }

    /// A proposal for `(height, round)` referencing the oldest pooled operation seals.
    pub(crate) fn new_proposal(&self, height: Height, round: Round) -> Proposal {
        let seals = self
            .seal_pool
            .operation_hashes(self.policy().max_operations_in_proposal);
        Proposal::new(
            self.local.node().keypair(),
            self.address().clone(),
            ProposalFact {
                height,
                round,
                seals,
            },
            self.network_id(),
        )
    }

    pub(crate) fn process_context(&self) -> ProcessContext {
        ProcessContext::new(
            self.local.last_block_hash(),
            Instant::now() + self.policy().timeout_process_proposal,
        )
    }

    /// Run the proposal processor on a worker thread and wait for it until `context`'s deadline. On
    /// expiry `context` is cancelled and [`ProcessorError::Timeout`] returned.
    pub(crate) fn process_proposal(
        &self,
        proposal: &Proposal,
        init_voteproof: &Voteproof,
        context: ProcessContext,
    ) -> Result<Block, ProcessorError> {
        let (result_sender, result_receiver) = mpsc::channel();
        let processor = Arc::clone(&self.processor);
        let worker_context = context.clone();
        let (worker_proposal, worker_voteproof) = (proposal.clone(), init_voteproof.clone());
        thread::spawn(move || {
            let result = processor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .process(&worker_proposal, &worker_voteproof, &worker_context);
            let _ = result_sender.send(result);
        });

        let wait = context.deadline.saturating_duration_since(Instant::now());
        let block = match result_receiver.recv_timeout(wait) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                context.cancel();
                return Err(ProcessorError::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ProcessorError::Failed(String::from("processor thread panicked")))
            }
        };

        if block.height() != proposal.height()
            || block.manifest.proposal != proposal.hash()
            || block.previous_block() != context.previous_block
        {
            return Err(ProcessorError::Failed(format!(
                "block {} does not extend {} with proposal {}",
                block.hash,
                context.previous_block,
                proposal.hash()
            )));
        }

        self.publish(Event::ProcessProposal(ProcessProposalEvent {
            timestamp: SystemTime::now(),
            height: proposal.height(),
            round: proposal.round(),
            proposal: proposal.hash(),
            block: block.hash,
        }));
        Ok(block)
    }

    /// Store a committed block and make it the local last block.
    pub(crate) fn commit_block(&self, block: Block) -> Result<(), StorageError> {
        let (height, hash) = (block.height(), block.hash);
        self.storage.store_block(block.clone())?;

        self.seal_pool.remove_operations(&block.seals);
        self.seal_pool.clean_proposals(height + 1);
        self.local.set_last_block(block);

        self.publish(Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            height,
            block: hash,
        }));
        Ok(())
    }

    pub(crate) fn publish_next_round(&self, height: Height, round: Round) {
        self.publish(Event::MoveNextRound(MoveNextRoundEvent {
            timestamp: SystemTime::now(),
            height,
            round,
        }))
    }
}
