/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state a replica starts in.

use crate::types::{seal::Seal, voteproof::Voteproof};

use super::{base::HandlerBase, ConsensusState, StateChangeContext, StateError, StateHandler};

/// Loads the last committed block from storage into the local state, then moves to Joining. A replica
/// whose storage holds no committed block (see [`Replica::initialize`](crate::replica::Replica::initialize))
/// moves to Broken instead.
pub struct Booting {
    base: HandlerBase,
}

impl Booting {
    pub fn new(base: HandlerBase) -> Booting {
        Booting { base }
    }

    fn check_storage(&self) -> Result<(), StateError> {
        let block = self
            .base
            .storage
            .last_block()?
            .ok_or_else(|| StateError::NotReady(String::from("storage holds no block")))?;
        block
            .is_committed(self.base.network_id())
            .map_err(|err| StateError::NotReady(format!("last block {} is not committed: {}", block.hash, err)))?;

        log::debug!("booting from block {} at height {}", block.hash, block.height());
        self.base.local.set_last_block(block);
        Ok(())
    }
}

impl StateHandler for Booting {
    fn state(&self) -> ConsensusState {
        ConsensusState::Booting
    }

    fn activate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        match self.check_storage() {
            Ok(()) => self
                .base
                .request_state(ConsensusState::Booting, ConsensusState::Joining, None),
            Err(err) => {
                log::error!("cannot boot: {}", err);
                self.base
                    .request_state(ConsensusState::Booting, ConsensusState::Broken, None)
            }
        }
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
