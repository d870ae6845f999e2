/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The terminal state of a replica that hit an unrecoverable local failure. A broken replica broadcasts
//! nothing and ignores every seal and voteproof.

use crate::types::{seal::Seal, voteproof::Voteproof};

use super::{ConsensusState, StateChangeContext, StateError, StateHandler};

#[derive(Default)]
pub struct Broken;

impl Broken {
    pub fn new() -> Broken {
        Broken
    }
}

impl StateHandler for Broken {
    fn state(&self) -> ConsensusState {
        ConsensusState::Broken
    }

    fn activate(&self, ctx: &StateChangeContext) -> Result<(), StateError> {
        log::error!("replica is broken (came from {})", ctx.from);
        Ok(())
    }

    fn deactivate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        Ok(())
    }

    fn new_seal(&self, _seal: &Seal) -> Result<(), StateError> {
        Ok(())
    }

    fn new_voteproof(&self, _voteproof: &Voteproof) -> Result<(), StateError> {
        Ok(())
    }
}
