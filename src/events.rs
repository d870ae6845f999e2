/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.
//!
//! Users register handlers for these events on the [`ReplicaSpec`](crate::replica::ReplicaSpec)
//! builder. Handlers run on a dedicated event bus thread, so a slow handler never holds up consensus.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    states::ConsensusState,
    types::{
        ballots::{Ballot, Proposal},
        data_types::{Address, CryptoHash, Height, Round, Stage},
        voteproof::Voteproof,
    },
};

pub enum Event {
    // Events that involve sending or receiving ballots.
    BroadcastBallot(BroadcastBallotEvent),
    ReceiveBallot(ReceiveBallotEvent),
    RejectBallot(RejectBallotEvent),
    CollectVoteproof(CollectVoteproofEvent),
    // Events that make progress within a height.
    Propose(ProposeEvent),
    ProcessProposal(ProcessProposalEvent),
    CommitBlock(CommitBlockEvent),
    MoveNextRound(MoveNextRoundEvent),
    // Events that change the consensus state.
    ChangeState(ChangeStateEvent),
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus is gone only while the replica is shutting down.
            let _ = event_publisher.send(event);
        }
    }
}

/// The replica broadcast one of its own ballots.
pub struct BroadcastBallotEvent {
    pub timestamp: SystemTime,
    pub ballot: Ballot,
}

/// The replica accepted a ballot for processing.
pub struct ReceiveBallotEvent {
    pub timestamp: SystemTime,
    pub ballot: Ballot,
}

/// The replica dropped a ballot.
pub struct RejectBallotEvent {
    pub timestamp: SystemTime,
    pub node: Address,
    pub stage: Stage,
    pub height: Height,
    pub round: Round,
    pub reason: String,
}

/// A stage finished in the replica's ballot box.
pub struct CollectVoteproofEvent {
    pub timestamp: SystemTime,
    pub voteproof: Voteproof,
}

/// The replica broadcast a proposal as the proposer of its round.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

/// The replica derived a block from a proposal.
pub struct ProcessProposalEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub proposal: CryptoHash,
    pub block: CryptoHash,
}

/// The replica stored a block finalized by an ACCEPT majority.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub block: CryptoHash,
}

/// The replica gave up on a round and moved to the next one.
pub struct MoveNextRoundEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
}

pub struct ChangeStateEvent {
    pub timestamp: SystemTime,
    pub from: ConsensusState,
    pub to: ConsensusState,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub from_height: Height,
    pub target_height: Height,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub blocks_synced: u64,
}
