/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus core of a Byzantine-fault-tolerant blockchain replication engine.
//!
//! Replicas agree on one block per height. Each height runs in rounds, and each round in three voting
//! stages: INIT (agree on the previous block and the round), SIGN (agree on the block a proposal
//! produces), and ACCEPT (commit it). The votes of a stage are collected in a
//! [ballot box](ballot_box::BallotBox), which emits a [voteproof](types::voteproof::Voteproof) once the
//! stage reaches a majority or can no longer reach one.
//!
//! A replica is driven by [state handlers](states) and is built and started through the
//! [replica](replica) module. Users provide:
//! - A [suffrage](suffrage), deciding who votes and who proposes.
//! - A [proposal processor](pluggables::ProposalProcessor) and [block storage](pluggables::BlockStorage).
//! - A [channel](networking::channel::Channel) to every remote node, and the receiving end of the
//!   transport.

pub mod ballot_box;

pub mod events;

pub(crate) mod event_bus;

pub mod genesis;

pub mod local_state;

pub(crate) mod logging;

pub mod networking;

pub mod pluggables;

pub mod policy;

pub mod replica;

pub mod seal_pool;

pub mod states;

pub mod suffrage;

pub mod timer;

pub mod types;
