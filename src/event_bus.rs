/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that receives [events](crate::events) from the consensus threads and runs the handlers
//! registered for them.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) broadcast_ballot_handlers: Vec<HandlerPtr<BroadcastBallotEvent>>,
    pub(crate) receive_ballot_handlers: Vec<HandlerPtr<ReceiveBallotEvent>>,
    pub(crate) reject_ballot_handlers: Vec<HandlerPtr<RejectBallotEvent>>,
    pub(crate) collect_voteproof_handlers: Vec<HandlerPtr<CollectVoteproofEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) process_proposal_handlers: Vec<HandlerPtr<ProcessProposalEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) move_next_round_handlers: Vec<HandlerPtr<MoveNextRoundEvent>>,
    pub(crate) change_state_handlers: Vec<HandlerPtr<ChangeStateEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
}

/// The user-supplied handler for each event, if any.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_broadcast_ballot: Option<HandlerPtr<BroadcastBallotEvent>>,
    pub(crate) on_receive_ballot: Option<HandlerPtr<ReceiveBallotEvent>>,
    pub(crate) on_reject_ballot: Option<HandlerPtr<RejectBallotEvent>>,
    pub(crate) on_collect_voteproof: Option<HandlerPtr<CollectVoteproofEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_process_proposal: Option<HandlerPtr<ProcessProposalEvent>>,
    pub(crate) on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    pub(crate) on_move_next_round: Option<HandlerPtr<MoveNextRoundEvent>>,
    pub(crate) on_change_state: Option<HandlerPtr<ChangeStateEvent>>,
    pub(crate) on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    pub(crate) on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    /// Collect the user's handlers, adding the default logger of every event if `log_events` is set.
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> EventHandlers {
        EventHandlers {
            broadcast_ballot_handlers: handlers(log_events, user_handlers.on_broadcast_ballot),
            receive_ballot_handlers: handlers(log_events, user_handlers.on_receive_ballot),
            reject_ballot_handlers: handlers(log_events, user_handlers.on_reject_ballot),
            collect_voteproof_handlers: handlers(log_events, user_handlers.on_collect_voteproof),
            propose_handlers: handlers(log_events, user_handlers.on_propose),
            process_proposal_handlers: handlers(log_events, user_handlers.on_process_proposal),
            commit_block_handlers: handlers(log_events, user_handlers.on_commit_block),
            move_next_round_handlers: handlers(log_events, user_handlers.on_move_next_round),
            change_state_handlers: handlers(log_events, user_handlers.on_change_state),
            start_sync_handlers: handlers(log_events, user_handlers.on_start_sync),
            end_sync_handlers: handlers(log_events, user_handlers.on_end_sync),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.broadcast_ballot_handlers.is_empty()
            && self.receive_ballot_handlers.is_empty()
            && self.reject_ballot_handlers.is_empty()
            && self.collect_voteproof_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.process_proposal_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.move_next_round_handlers.is_empty()
            && self.change_state_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::BroadcastBallot(broadcast_ballot_event) =>
                self.broadcast_ballot_handlers.iter().for_each(|handler| handler(&broadcast_ballot_event)),

            Event::ReceiveBallot(receive_ballot_event) =>
                self.receive_ballot_handlers.iter().for_each(|handler| handler(&receive_ballot_event)),

            Event::RejectBallot(reject_ballot_event) =>
                self.reject_ballot_handlers.iter().for_each(|handler| handler(&reject_ballot_event)),

            Event::CollectVoteproof(collect_voteproof_event) =>
                self.collect_voteproof_handlers.iter().for_each(|handler| handler(&collect_voteproof_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::ProcessProposal(process_proposal_event) =>
                self.process_proposal_handlers.iter().for_each(|handler| handler(&process_proposal_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),

            Event::MoveNextRound(move_next_round_event) =>
                self.move_next_round_handlers.iter().for_each(|handler| handler(&move_next_round_event)),

            Event::ChangeState(change_state_event) =>
                self.change_state_handlers.iter().for_each(|handler| handler(&change_state_event)),

            Event::StartSync(start_sync_event) =>
                self.start_sync_handlers.iter().for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) =>
                self.end_sync_handlers.iter().for_each(|handler| handler(&end_sync_event)),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: the consensus threads have stopped.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
