/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Seals a replica has received but not yet finished with: operation seals waiting to be proposed, and
//! proposals waiting to be processed.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Mutex, PoisonError},
};

use crate::types::{
    ballots::{Proposal, SignedBallot},
    data_types::{CryptoHash, Height, Round},
    seal::OperationSeal,
};

#[derive(Default)]
struct Operations {
    order: VecDeque<CryptoHash>,
    seals: HashMap<CryptoHash, OperationSeal>,
}

pub struct SealPool {
    capacity: usize,
    operations: Mutex<Operations>,
    proposals: Mutex<BTreeMap<(Height, Round), Proposal>>,
}

impl SealPool {
    /// Create a pool that holds at most `capacity` operation seals. When full, the oldest seal is dropped.
    pub fn new(capacity: usize) -> SealPool {
        SealPool {
            capacity,
            operations: Mutex::new(Operations::default()),
            proposals: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns false if the seal was already pooled.
    pub fn add_operation(&self, seal: OperationSeal) -> bool {
        let mut operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        if operations.seals.contains_key(&seal.hash) {
            return false;
        }
        while self.capacity > 0 && operations.order.len() >= self.capacity {
            if let Some(oldest) = operations.order.pop_front() {
                operations.seals.remove(&oldest);
            }
        }
        operations.order.push_back(seal.hash);
        operations.seals.insert(seal.hash, seal);
        true
    }

    /// Hashes of the oldest `limit` pooled operation seals.
    pub fn operation_hashes(&self, limit: usize) -> Vec<CryptoHash> {
        let operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        operations.order.iter().take(limit).copied().collect()
    }

    pub fn operation(&self, hash: &CryptoHash) -> Option<OperationSeal> {
        let operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        operations.seals.get(hash).cloned()
    }

    /// Drop operation seals that made it into a block.
    pub fn remove_operations(&self, hashes: &[CryptoHash]) {
        let mut operations = self.operations.lock().unwrap_or_else(PoisonError::into_inner);
        for hash in hashes {
            operations.seals.remove(hash);
        }
        let Operations { order, seals } = &mut *operations;
        order.retain(|hash| seals.contains_key(hash));
    }

    pub fn operations_len(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Keep `proposal` as the proposal of its `(height, round)`. Returns false if one is already kept.
    pub fn add_proposal(&self, proposal: Proposal) -> bool {
        let mut proposals = self.proposals.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (proposal.height(), proposal.round());
        if proposals.contains_key(&key) {
            return false;
        }
        proposals.insert(key, proposal);
        true
    }

    pub fn proposal(&self, height: Height, round: Round) -> Option<Proposal> {
        let proposals = self.proposals.lock().unwrap_or_else(PoisonError::into_inner);
        proposals.get(&(height, round)).cloned()
    }

    pub fn proposal_by_hash(&self, hash: &CryptoHash) -> Option<Proposal> {
        let proposals = self.proposals.lock().unwrap_or_else(PoisonError::into_inner);
        proposals
            .values()
            .find(|proposal| proposal.hash() == *hash)
            .cloned()
    }

    /// Drop proposals below `height`.
    pub fn clean_proposals(&self, height: Height) {
        let mut proposals = self.proposals.lock().unwrap_or_else(PoisonError::into_inner);
        proposals.retain(|(proposal_height, _), _| *proposal_height >= height);
    }
}
