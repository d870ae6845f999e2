/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Suffrage: which nodes may vote, which of them act in a given `(height, round)`, and which one
//! proposes.
//!
//! Two implementations are provided:
//! 1. [`FixedSuffrage`]: a static node set with a fixed or index-rotated proposer.
//! 2. [`RoundRobinSuffrage`]: a sorted ring of nodes, where the acting window moves with the previous
//!    block's manifest hash, the height, and the round.
//!
//! Both are deterministic: every replica with the same node set and the same chain computes the same
//! [`ActingSuffrage`] for a given `(height, round)`.

mod fixed;
mod round_robin;

pub use fixed::{FixedSuffrage, ProposerSelection};
pub use round_robin::RoundRobinSuffrage;

use thiserror::Error;

use crate::types::data_types::{Address, Height, Round};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SuffrageError {
    #[error("suffrage has no nodes")]
    Empty,
    #[error("number of acting nodes must be greater than zero")]
    NoActingNodes,
    #[error("{0} is not a node of the suffrage")]
    UnknownNode(Address),
}

/// The nodes acting in one `(height, round)`, and the proposer among them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActingSuffrage {
    pub height: Height,
    pub round: Round,
    pub proposer: Address,
    pub nodes: Vec<Address>,
}

impl ActingSuffrage {
    pub fn exists(&self, node: &Address) -> bool {
        self.nodes.contains(node)
    }
}

pub trait Suffrage: Send + Sync {
    fn name(&self) -> &str;

    /// The acting committee for `(height, round)`. Stable for a given `(height, round)`.
    fn acting(&self, height: Height, round: Round) -> ActingSuffrage;

    /// Every node of the suffrage, sorted.
    fn nodes(&self) -> Vec<Address>;

    /// Whether `node` belongs to the suffrage at all, acting or not.
    fn is_inside(&self, node: &Address) -> bool {
        self.nodes().contains(node)
    }

    fn is_acting(&self, height: Height, round: Round, node: &Address) -> bool {
        self.acting(height, round).exists(node)
    }

    fn is_proposer(&self, height: Height, round: Round, node: &Address) -> bool {
        self.acting(height, round).proposer == *node
    }
}

/// The `number_of_acting` nodes of `ring` starting at `start`, wrapping around.
fn acting_window(ring: &[Address], start: usize, number_of_acting: usize) -> Vec<Address> {
    let count = number_of_acting.min(ring.len());
    (0..count)
        .map(|offset| ring[(start + offset) % ring.len()].clone())
        .collect()
}
