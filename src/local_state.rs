/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's own view of the chain: its last block, the last voteproofs it acted on, and its
//! policy.
//!
//! Readers take a cheap [`Arc`] snapshot and never block writers for longer than a pointer swap. Writers
//! copy the current snapshot, modify the copy, and swap it in, so a reader always sees a consistent
//! combination of last block and voteproofs.

use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    policy::{Policy, PolicyError},
    types::{
        block::Block,
        crypto_primitives::{Keypair, SigningKey, VerifyingKey},
        data_types::{Address, CryptoHash, Height, NetworkID, PublicKeyBytes, Round},
        voteproof::Voteproof,
    },
};

/// The local node: its address and its signing key.
#[derive(Clone)]
pub struct LocalNode {
    address: Address,
    keypair: Keypair,
}

impl LocalNode {
    pub fn new(address: Address, signing_key: SigningKey) -> LocalNode {
        LocalNode {
            address,
            keypair: Keypair::new(signing_key),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.public()
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        self.keypair.public_bytes()
    }
}

#[derive(Clone, Debug, Default)]
pub struct LocalSnapshot {
    pub last_block: Option<Block>,
    pub last_init_voteproof: Option<Voteproof>,
    pub last_accept_voteproof: Option<Voteproof>,
}

impl LocalSnapshot {
    pub fn last_height(&self) -> Height {
        self.last_block
            .as_ref()
            .map(|block| block.height())
            .unwrap_or(Height::PRE_GENESIS)
    }

    pub fn last_round(&self) -> Round {
        self.last_block
            .as_ref()
            .map(|block| block.round())
            .unwrap_or_default()
    }

    pub fn last_block_hash(&self) -> CryptoHash {
        self.last_block
            .as_ref()
            .map(|block| block.hash)
            .unwrap_or_default()
    }
}

pub struct LocalState {
    node: LocalNode,
    network_id: NetworkID,
    policy: RwLock<Arc<Policy>>,
    snapshot: RwLock<Arc<LocalSnapshot>>,
}

impl LocalState {
    pub fn new(node: LocalNode, network_id: NetworkID, policy: Policy) -> LocalState {
        LocalState {
            node,
            network_id,
            policy: RwLock::new(Arc::new(policy)),
            snapshot: RwLock::new(Arc::new(LocalSnapshot::default())),
        }
    }

    pub fn node(&self) -> &LocalNode {
        &self.node
    }

    pub fn network_id(&self) -> &NetworkID {
        &self.network_id
    }

    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_policy(&self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<LocalSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `update` to a copy of the current snapshot and swap the copy in.
    pub fn update(&self, update: impl FnOnce(&mut LocalSnapshot)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = LocalSnapshot::clone(&snapshot);
        update(&mut next);
        *snapshot = Arc::new(next);
    }

    pub fn last_block(&self) -> Option<Block> {
        self.snapshot().last_block.clone()
    }

    pub fn last_height(&self) -> Height {
        self.snapshot().last_height()
    }

    pub fn last_round(&self) -> Round {
        self.snapshot().last_round()
    }

    pub fn last_block_hash(&self) -> CryptoHash {
        self.snapshot().last_block_hash()
    }

    pub fn last_init_voteproof(&self) -> Option<Voteproof> {
        self.snapshot().last_init_voteproof.clone()
    }

    pub fn last_accept_voteproof(&self) -> Option<Voteproof> {
        self.snapshot().last_accept_voteproof.clone()
    }

    /// Make `block` the last block, taking its voteproofs as the last INIT and ACCEPT voteproofs.
    pub fn set_last_block(&self, block: Block) {
        self.update(|snapshot| {
            if let Some(init) = &block.init_voteproof {
                snapshot.last_init_voteproof = Some(init.clone());
            }
            if let Some(accept) = &block.accept_voteproof {
                snapshot.last_accept_voteproof = Some(accept.clone());
            }
            snapshot.last_block = Some(block);
        })
    }

    pub fn set_last_init_voteproof(&self, voteproof: Voteproof) {
        self.update(|snapshot| snapshot.last_init_voteproof = Some(voteproof))
    }

    pub fn set_last_accept_voteproof(&self, voteproof: Voteproof) {
        self.update(|snapshot| snapshot.last_accept_voteproof = Some(voteproof))
    }
}
