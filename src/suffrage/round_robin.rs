/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use lru::LruCache;

use crate::{
    pluggables::BlockStorage,
    types::data_types::{Address, CryptoHash, Height, Round},
};

use super::{acting_window, ActingSuffrage, Suffrage, SuffrageError};

const CACHE_SIZE: usize = 100;

type ManifestSource = Box<dyn Fn(Height) -> Option<CryptoHash> + Send + Sync>;

/// All nodes form a ring sorted by address. For `(height, round)`, the proposer is
/// `ring[(Σ bytes of the manifest hash at height - 1 + height + round) mod |ring|]`, and the acting
/// nodes are the `number_of_acting` nodes starting at the proposer.
///
/// Until the genesis block exists (`height <= 0`), the local node proposes.
pub struct RoundRobinSuffrage {
    local: Address,
    ring: Vec<Address>,
    number_of_acting: usize,
    manifest_hash: ManifestSource,
    cache: Mutex<LruCache<(Height, Round), ActingSuffrage>>,
}

impl RoundRobinSuffrage {
    /// Create a suffrage over `nodes` (the local node is added if missing). `manifest_hash` returns the
    /// manifest hash of the block at a height, if the local node has it.
    pub fn new(
        local: Address,
        mut nodes: Vec<Address>,
        number_of_acting: usize,
        manifest_hash: impl Fn(Height) -> Option<CryptoHash> + Send + Sync + 'static,
    ) -> Result<RoundRobinSuffrage, SuffrageError> {
        if number_of_acting == 0 {
            return Err(SuffrageError::NoActingNodes);
        }
        nodes.push(local.clone());
        nodes.sort();
        nodes.dedup();

        Ok(RoundRobinSuffrage {
            local,
            ring: nodes,
            number_of_acting,
            manifest_hash: Box::new(manifest_hash),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    /// Create a suffrage that reads manifest hashes from `storage`.
    pub fn with_storage<S: BlockStorage + 'static>(
        local: Address,
        nodes: Vec<Address>,
        number_of_acting: usize,
        storage: Arc<S>,
    ) -> Result<RoundRobinSuffrage, SuffrageError> {
        Self::new(local, nodes, number_of_acting, move |height| {
            storage.block(height).ok().flatten().map(|block| block.hash)
        })
    }

    fn position(&self, height: Height, round: Round) -> Option<usize> {
        let previous = (self.manifest_hash)(height - 1)?;
        let sum = previous
            .bytes()
            .iter()
            .fold(0u64, |sum, byte| sum.wrapping_add(*byte as u64));
        let position = sum
            .wrapping_add(height.int() as u64)
            .wrapping_add(round.int());
        Some((position % self.ring.len() as u64) as usize)
    }

    fn local_position(&self) -> usize {
        self.ring
            .iter()
            .position(|node| *node == self.local)
            .unwrap_or(0)
    }
}

impl Suffrage for RoundRobinSuffrage {
    fn name(&self) -> &str {
        "round-robin-suffrage"
    }

    fn acting(&self, height: Height, round: Round) -> ActingSuffrage {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(acting) = cache.get(&(height, round)) {
            return acting.clone();
        }

        let (start, stable) = if height <= Height::PRE_GENESIS + 1 {
            (self.local_position(), true)
        } else {
            match self.position(height, round) {
                Some(position) => (position, true),
                None => {
                    log::debug!(
                        "manifest at height {} is unknown; acting suffrage of ({}, {}) is provisional",
                        height - 1,
                        height,
                        round
                    );
                    let position = (height.int().max(0) as u64).wrapping_add(round.int());
                    ((position % self.ring.len() as u64) as usize, false)
                }
            }
        };

        let acting = ActingSuffrage {
            height,
            round,
            proposer: self.ring[start].clone(),
            nodes: acting_window(&self.ring, start, self.number_of_acting),
        };
        if stable {
            cache.put((height, round), acting.clone());
        }
        acting
    }

    fn nodes(&self) -> Vec<Address> {
        self.ring.clone()
    }

    fn is_inside(&self, node: &Address) -> bool {
        self.ring.binary_search(node).is_ok()
    }
}
