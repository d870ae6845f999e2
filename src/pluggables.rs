/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the services the consensus core delegates to its user: turning proposals into blocks, and
//! persisting blocks.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use thiserror::Error;

use crate::types::{
    ballots::Proposal,
    block::Block,
    data_types::{CryptoHash, Height},
    voteproof::Voteproof,
};

/// Methods that a type needs to implement to turn a proposal into a concrete new block.
///
/// Implementors are expected to be *deterministic* and *idempotent*: every replica that processes the
/// same proposal on top of the same previous block must produce a block with the same hash, however
/// many times it is called.
pub trait ProposalProcessor: Send + 'static {
    /// Derive the block that `proposal` produces on top of `context.previous_block`.
    ///
    /// This call should return by `context.deadline`. Long-running implementations should check
    /// [`ProcessContext::is_cancelled`] and return [`ProcessorError::Cancelled`] once it is set.
    fn process(
        &mut self,
        proposal: &Proposal,
        init_voteproof: &Voteproof,
        context: &ProcessContext,
    ) -> Result<Block, ProcessorError>;
}

/// What a [`ProposalProcessor`] knows about the call it is serving.
#[derive(Clone)]
pub struct ProcessContext {
    pub previous_block: CryptoHash,
    pub deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl ProcessContext {
    pub fn new(previous_block: CryptoHash, deadline: Instant) -> ProcessContext {
        ProcessContext {
            previous_block,
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("processing did not finish before the deadline")]
    Timeout,
    #[error("processing was cancelled")]
    Cancelled,
    #[error("proposal is invalid: {0}")]
    InvalidProposal(String),
    #[error("processor failed: {0}")]
    Failed(String),
}

/// Pluggable persistence for committed blocks.
///
/// Methods take `&self`; implementations shared between threads provide their own synchronization.
pub trait BlockStorage: Send + Sync {
    /// The committed block with the greatest height.
    fn last_block(&self) -> Result<Option<Block>, StorageError>;

    fn block(&self, height: Height) -> Result<Option<Block>, StorageError>;

    /// Persist a committed block. The block carries its INIT and ACCEPT voteproofs.
    fn store_block(&self, block: Block) -> Result<(), StorageError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("expected a block at height {expected}, got height {got}")]
    NotContinuous { expected: Height, got: Height },
    #[error("storage backend failed: {0}")]
    Backend(String),
}
