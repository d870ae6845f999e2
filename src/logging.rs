/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CollectVoteproof](crate::events::CollectVoteproofEvent) is printed:
//!
//! ```text
//! CollectVoteproof, 1701329264, 12, 0, SIGN, Majority, 3
//! ```
//!
//! In the snippet, the third to seventh values are the height, round, stage, result, and number of
//! votes of the voteproof. Hashes and public keys are printed as the first seven characters of their
//! Base64 encoding.

use crate::{
    events::*,
    types::ballots::{Ballot, SignedBallot},
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const BROADCAST_BALLOT: &str = "BroadcastBallot";
pub const RECEIVE_BALLOT: &str = "ReceiveBallot";
pub const REJECT_BALLOT: &str = "RejectBallot";
pub const COLLECT_VOTEPROOF: &str = "CollectVoteproof";

pub const PROPOSE: &str = "Propose";
pub const PROCESS_PROPOSAL: &str = "ProcessProposal";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const MOVE_NEXT_ROUND: &str = "MoveNextRound";

pub const CHANGE_STATE: &str = "ChangeState";
pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for BroadcastBallotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_ballot_event: &BroadcastBallotEvent| {
            log::info!(
                "{}, {}, {}",
                BROADCAST_BALLOT,
                secs_since_unix_epoch(broadcast_ballot_event.timestamp),
                ballot_info(&broadcast_ballot_event.ballot)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBallotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_ballot_event: &ReceiveBallotEvent| {
            log::info!(
                "{}, {}, {}",
                RECEIVE_BALLOT,
                secs_since_unix_epoch(receive_ballot_event.timestamp),
                ballot_info(&receive_ballot_event.ballot)
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBallotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_ballot_event: &RejectBallotEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                REJECT_BALLOT,
                secs_since_unix_epoch(reject_ballot_event.timestamp),
                reject_ballot_event.node,
                reject_ballot_event.stage,
                reject_ballot_event.height,
                reject_ballot_event.round,
                reject_ballot_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectVoteproofEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_voteproof_event: &CollectVoteproofEvent| {
            let voteproof = &collect_voteproof_event.voteproof;
            log::info!(
                "{}, {}, {}, {}, {}, {:?}, {}",
                COLLECT_VOTEPROOF,
                secs_since_unix_epoch(collect_voteproof_event.timestamp),
                voteproof.height,
                voteproof.round,
                voteproof.stage,
                voteproof.result,
                voteproof.votes.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.proposal.hash().bytes()),
                propose_event.proposal.fact.height,
                propose_event.proposal.fact.round,
                propose_event.proposal.fact.seals.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProcessProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |process_proposal_event: &ProcessProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROCESS_PROPOSAL,
                secs_since_unix_epoch(process_proposal_event.timestamp),
                process_proposal_event.height,
                process_proposal_event.round,
                first_seven_base64_chars(&process_proposal_event.proposal.bytes()),
                first_seven_base64_chars(&process_proposal_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for MoveNextRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |move_next_round_event: &MoveNextRoundEvent| {
            log::info!(
                "{}, {}, {}, {}",
                MOVE_NEXT_ROUND,
                secs_since_unix_epoch(move_next_round_event.timestamp),
                move_next_round_event.height,
                move_next_round_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ChangeStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |change_state_event: &ChangeStateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CHANGE_STATE,
                secs_since_unix_epoch(change_state_event.timestamp),
                change_state_event.from,
                change_state_event.to
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                start_sync_event.from_height,
                start_sync_event.target_height
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.height,
                end_sync_event.blocks_synced
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn ballot_info(ballot: &Ballot) -> String {
    format!(
        "{}, {}, {}, {}, {}",
        ballot.stage(),
        ballot.height(),
        ballot.round(),
        ballot.node(),
        first_seven_base64_chars(&ballot.fact_hash().bytes())
    )
}
