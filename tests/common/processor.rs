use std::{thread, time::Duration};

use isaac_rs::{
    pluggables::{ProcessContext, ProcessorError, ProposalProcessor},
    types::{
        ballots::{Proposal, SignedBallot},
        block::{operations_hash, Block, Manifest},
        voteproof::Voteproof,
    },
};

/// Derives a block from a proposal's manifest fields alone, so every replica derives the same block.
/// Optionally sleeps before returning, to exercise processing deadlines, or fails every proposal.
pub(crate) struct BlockMaker {
    delay: Duration,
    failing: bool,
}

impl BlockMaker {
    pub(crate) fn new() -> BlockMaker {
        BlockMaker {
            delay: Duration::ZERO,
            failing: false,
        }
    }

    pub(crate) fn slow(delay: Duration) -> BlockMaker {
        BlockMaker {
            delay,
            failing: false,
        }
    }

    pub(crate) fn failing() -> BlockMaker {
        BlockMaker {
            delay: Duration::ZERO,
            failing: true,
        }
    }
}

impl ProposalProcessor for BlockMaker {
    fn process(
        &mut self,
        proposal: &Proposal,
        _init_voteproof: &Voteproof,
        context: &ProcessContext,
    ) -> Result<Block, ProcessorError> {
        if self.failing {
            return Err(ProcessorError::Failed(String::from("block maker is out of order")));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
            if context.is_cancelled() {
                return Err(ProcessorError::Cancelled);
            }
        }

        Ok(Block::new(
            Manifest {
                height: proposal.height(),
                round: proposal.round(),
                proposal: proposal.hash(),
                previous_block: context.previous_block,
                operations_hash: operations_hash(&proposal.fact.seals),
            },
            proposal.fact.seals.clone(),
        ))
    }
}
