/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state in which a replica fetches the committed blocks it is missing from other nodes.
//!
//! ## Target height
//!
//! Syncing starts from the voteproof (or ballot) that showed the replica it is behind:
//! - An ACCEPT voteproof for height `h` proves that block `h` is committed, so the target is `h`.
//! - Any other voteproof for height `h`, and any ballot for height `h`, proves only that block `h - 1`
//!   is committed, so the target is `h - 1`.
//!
//! Voteproofs that arrive while syncing raise the target.
//!
//! ## Sources
//!
//! Blocks are requested from the nodes that voted in the triggering voteproof, in random order, in
//! batches of `sync_batch_size` heights. Every block must be committed (carry a valid ACCEPT majority
//! for itself), carry voteproofs voted by the local suffrage, follow the local last block by exactly one
//! height, and build on the local last block's hash. Once the local last block reaches the target, the replica moves to Joining. A failed attempt
//! is retried every `interval_sync_retry`.

use std::{
    collections::BTreeSet,
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::SystemTime,
};

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::{
    events::{EndSyncEvent, Event, StartSyncEvent},
    networking::channel::NetworkError,
    pluggables::StorageError,
    types::{
        ballots::{Ballot, SignedBallot},
        block::{Block, BlockError},
        data_types::{Address, CryptoHash, Height, Stage},
        seal::Seal,
        voteproof::Voteproof,
    },
};

use super::{
    ballot_checker::{BallotCheckError, BallotChecker},
    base::HandlerBase,
    ConsensusState, StateChangeContext, StateError, StateHandler,
};

#[derive(Debug, Error, PartialEq)]
pub enum SyncError {
    #[error("no node to sync from")]
    NoSources,
    #[error("{node} has no channel")]
    NoChannel { node: Address },
    #[error("request to {node} failed: {err}")]
    Network { node: Address, err: NetworkError },
    #[error("{node} returned no blocks")]
    NoBlocks { node: Address },
    #[error("expected block at height {expected}, got height {got}")]
    NotContinuous { expected: Height, got: Height },
    #[error("block at height {height} builds on {got}, not on {expected}")]
    PreviousBlockMismatch {
        height: Height,
        expected: CryptoHash,
        got: CryptoHash,
    },
    #[error("block at height {height} is not committed: {err}")]
    InvalidBlock { height: Height, err: BlockError },
    #[error("block at height {height} carries a voteproof from outside the suffrage: {err}")]
    ForeignVoteproof {
        height: Height,
        err: BallotCheckError,
    },
    #[error("cannot store block: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Default)]
struct Target {
    height: Option<Height>,
    sources: BTreeSet<Address>,
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Syncing {
    base: HandlerBase,
    target: Arc<Mutex<Target>>,
    worker: Mutex<Option<Worker>>,
}

/// The height that `voteproof` proves to be committed.
fn voteproof_target(voteproof: &Voteproof) -> Height {
    match voteproof.stage {
        Stage::Accept => voteproof.height,
        _ => voteproof.height - 1,
    }
}

impl Syncing {
    pub fn new(base: HandlerBase) -> Syncing {
        Syncing {
            base,
            target: Arc::new(Mutex::new(Target::default())),
            worker: Mutex::new(None),
        }
    }

    /// The height the handler syncs to, if it is syncing.
    pub fn target_height(&self) -> Option<Height> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .height
    }

    /// Raise the target to `height`, adding `sources` as nodes to fetch from.
    fn raise_target(&self, height: Height, sources: impl IntoIterator<Item = Address>) {
        let mut target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if target.height.map_or(true, |current| height > current) {
            target.height = Some(height);
        }
        let local = self.base.address().clone();
        target
            .sources
            .extend(sources.into_iter().filter(|source| *source != local));
    }

    fn start_worker(&self) {
        let (shutdown, shutdown_signal) = mpsc::channel();
        let base = self.base.clone();
        let target = Arc::clone(&self.target);

        let handle = thread::spawn(move || {
            let from_height = base.local.last_height();
            let mut blocks_synced = 0;
            loop {
                let (target_height, sources) = {
                    let target = target.lock().unwrap_or_else(PoisonError::into_inner);
                    (
                        target.height.unwrap_or(Height::PRE_GENESIS),
                        target.sources.iter().cloned().collect::<Vec<Address>>(),
                    )
                };

                if base.local.last_height() >= target_height {
                    log::debug!("synced from height {} to {}", from_height, target_height);
                    base.publish(Event::EndSync(EndSyncEvent {
                        timestamp: SystemTime::now(),
                        height: base.local.last_height(),
                        blocks_synced,
                    }));
                    base.request_state(ConsensusState::Syncing, ConsensusState::Joining, None);
                    return;
                }

                match sync_batch(&base, target_height, sources) {
                    Ok(synced) => {
                        blocks_synced += synced;
                        match shutdown_signal.try_recv() {
                            Err(mpsc::TryRecvError::Empty) => (),
                            _ => return,
                        }
                    }
                    Err(err) => {
                        log::warn!("sync attempt failed: {}", err);
                        match shutdown_signal.recv_timeout(base.policy().interval_sync_retry) {
                            Err(RecvTimeoutError::Timeout) => (),
                            _ => return,
                        }
                    }
                }
            }
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Worker { shutdown, handle });
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Worker { shutdown, handle }) = worker {
            let _ = shutdown.send(());
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Fetch, check and store the next batch of blocks up to `target_height`. Returns the number of blocks
/// stored.
fn sync_batch(
    base: &HandlerBase,
    target_height: Height,
    mut sources: Vec<Address>,
) -> Result<u64, SyncError> {
    if sources.is_empty() {
        sources = base
            .nodes
            .addresses()
            .into_iter()
            .filter(|address| address != base.address())
            .collect();
    }
    if sources.is_empty() {
        return Err(SyncError::NoSources);
    }
    sources.shuffle(&mut rand::thread_rng());

    let last_height = base.local.last_height();
    let batch_end = (last_height + i64::from(base.policy().sync_batch_size)).min(target_height);
    let heights: Vec<Height> = (last_height.int() + 1..=batch_end.int())
        .map(Height::new)
        .collect();

    let mut last_err = SyncError::NoSources;
    for source in sources {
        match fetch_from(base, &source, &heights) {
            Ok(synced) => return Ok(synced),
            Err(err) => {
                log::debug!("cannot sync from {}: {}", source, err);
                last_err = err;
            }
        }
    }
    Err(last_err)
}

fn fetch_from(base: &HandlerBase, source: &Address, heights: &[Height]) -> Result<u64, SyncError> {
    let channel = base
        .nodes
        .node(source)
        .and_then(|node| node.channel().cloned())
        .ok_or_else(|| SyncError::NoChannel {
            node: source.clone(),
        })?;
    let blocks = channel
        .request_blocks(heights)
        .map_err(|err| SyncError::Network {
            node: source.clone(),
            err,
        })?;
    if blocks.is_empty() {
        return Err(SyncError::NoBlocks {
            node: source.clone(),
        });
    }

    let mut synced = 0;
    for block in blocks {
        check_block(base, &block)?;
        base.commit_block(block)?;
        synced += 1;
    }
    Ok(synced)
}

fn check_block(base: &HandlerBase, block: &Block) -> Result<(), SyncError> {
    let snapshot = base.local.snapshot();
    let expected = snapshot.last_height() + 1;
    if block.height() != expected {
        return Err(SyncError::NotContinuous {
            expected,
            got: block.height(),
        });
    }
    if block.previous_block() != snapshot.last_block_hash() {
        return Err(SyncError::PreviousBlockMismatch {
            height: block.height(),
            expected: snapshot.last_block_hash(),
            got: block.previous_block(),
        });
    }
    block
        .is_committed(base.network_id())
        .map_err(|err| SyncError::InvalidBlock {
            height: block.height(),
            err,
        })?;

    let checker = BallotChecker::from_base(base);
    for voteproof in [&block.init_voteproof, &block.accept_voteproof]
        .into_iter()
        .flatten()
    {
        checker
            .check_voteproof(voteproof)
            .map_err(|err| SyncError::ForeignVoteproof {
                height: block.height(),
                err,
            })?;
    }
    Ok(())
}

impl StateHandler for Syncing {
    fn state(&self) -> ConsensusState {
        ConsensusState::Syncing
    }

    fn activate(&self, ctx: &StateChangeContext) -> Result<(), StateError> {
        self.stop_worker();
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Target::default();

        if let Some(voteproof) = &ctx.voteproof {
            self.raise_target(voteproof_target(voteproof), voteproof.votes.keys().cloned());
        }
        if let Some(ballot) = &ctx.ballot {
            let voters = ballot
                .voteproof()
                .map(|voteproof| voteproof.votes.keys().cloned().collect::<Vec<Address>>())
                .unwrap_or_default();
            self.raise_target(
                ballot.height() - 1,
                voters.into_iter().chain([ballot.node().clone()]),
            );
        }

        let target_height = self.target_height().unwrap_or(Height::PRE_GENESIS);
        log::debug!(
            "syncing from height {} to {}",
            self.base.local.last_height(),
            target_height
        );
        self.base.publish(Event::StartSync(StartSyncEvent {
            timestamp: SystemTime::now(),
            from_height: self.base.local.last_height(),
            target_height,
        }));

        self.start_worker();
        Ok(())
    }

    fn deactivate(&self, _ctx: &StateChangeContext) -> Result<(), StateError> {
        self.stop_worker();
        Ok(())
    }

    fn new_seal(&self, seal: &Seal) -> Result<(), StateError> {
        if let Seal::Ballot(ballot @ (Ballot::Init(_) | Ballot::Accept(_))) = seal {
            if let Some(voteproof) = ballot.voteproof() {
                self.raise_target(voteproof_target(voteproof), voteproof.votes.keys().cloned());
            }
        }
        Ok(())
    }

    fn new_voteproof(&self, voteproof: &Voteproof) -> Result<(), StateError> {
        self.raise_target(voteproof_target(voteproof), voteproof.votes.keys().cloned());
        Ok(())
    }
}
