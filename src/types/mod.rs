/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Value types shared by every component of the consensus core: heights and rounds, facts, ballots,
//! voteproofs, blocks, and the seals that carry them over the network.
//!
//! Types specific to a single component live next to that component, e.g.,
//! [`crate::suffrage::ActingSuffrage`].

pub mod ballots;

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod facts;

pub mod seal;

pub mod threshold;

pub mod voteproof;
