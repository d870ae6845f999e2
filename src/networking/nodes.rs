//! The registry of remote nodes a replica talks to.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;

use crate::types::{
    crypto_primitives::VerifyingKey,
    data_types::{Address, PublicKeyBytes},
    seal::Seal,
};

use super::channel::{Channel, NetworkError};

#[derive(Clone)]
pub struct RemoteNode {
    address: Address,
    public_key: VerifyingKey,
    channel: Option<Arc<dyn Channel>>,
}

impl RemoteNode {
    pub fn new(address: Address, public_key: VerifyingKey, channel: Arc<dyn Channel>) -> RemoteNode {
        RemoteNode {
            address,
            public_key,
            channel: Some(channel),
        }
    }

    /// A node whose ballots can be verified, but which cannot be sent to.
    pub fn without_channel(address: Address, public_key: VerifyingKey) -> RemoteNode {
        RemoteNode {
            address,
            public_key,
            channel: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(&self.public_key)
    }

    pub fn channel(&self) -> Option<&Arc<dyn Channel>> {
        self.channel.as_ref()
    }
}

impl Debug for RemoteNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteNode")
            .field("address", &self.address)
            .field("public_key", &self.public_key_bytes())
            .field("has_channel", &self.channel.is_some())
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodesError {
    #[error("node {0} is already registered")]
    AlreadyExists(Address),
}

/// Address → remote node table, safe to share between threads.
#[derive(Default)]
pub struct Nodes {
    nodes: RwLock<BTreeMap<Address, RemoteNode>>,
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes::default()
    }

    pub fn add(&self, node: RemoteNode) -> Result<(), NodesError> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(node.address()) {
            return Err(NodesError::AlreadyExists(node.address().clone()));
        }
        nodes.insert(node.address().clone(), node);
        Ok(())
    }

    pub fn remove(&self, address: &Address) -> Option<RemoteNode> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address)
    }

    pub fn node(&self, address: &Address) -> Option<RemoteNode> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Call `f` on every node in address order until it returns false.
    pub fn traverse(&self, mut f: impl FnMut(&RemoteNode) -> bool) {
        let nodes: Vec<RemoteNode> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for node in &nodes {
            if !f(node) {
                break;
            }
        }
    }

    /// Send `seal` to every node that has a channel. Returns the nodes the seal could not be sent to.
    pub fn broadcast(&self, seal: &Seal) -> Vec<(Address, NetworkError)> {
        let mut failures = Vec::new();
        self.traverse(|node| {
            if let Some(channel) = node.channel() {
                if let Err(err) = channel.send_seal(seal) {
                    failures.push((node.address().clone(), err));
                }
            }
            true
        });
        failures
    }
}
