/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::data_types::{Address, Height, Round};

use super::{acting_window, ActingSuffrage, Suffrage, SuffrageError};

/// How a [`FixedSuffrage`] picks its proposer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposerSelection {
    /// The same node proposes in every round.
    Fixed(Address),
    /// The proposer of `(height, round)` is `nodes[(height + round) mod |nodes|]`.
    Rotating,
}

/// A static node set. The acting window starts at the proposer.
pub struct FixedSuffrage {
    nodes: Vec<Address>,
    proposer: ProposerSelection,
    number_of_acting: usize,
}

impl FixedSuffrage {
    pub fn new(
        mut nodes: Vec<Address>,
        proposer: ProposerSelection,
        number_of_acting: usize,
    ) -> Result<FixedSuffrage, SuffrageError> {
        nodes.sort();
        nodes.dedup();

        if nodes.is_empty() {
            return Err(SuffrageError::Empty);
        }
        if number_of_acting == 0 {
            return Err(SuffrageError::NoActingNodes);
        }
        if let ProposerSelection::Fixed(proposer) = &proposer {
            if !nodes.contains(proposer) {
                return Err(SuffrageError::UnknownNode(proposer.clone()));
            }
        }

        Ok(FixedSuffrage {
            nodes,
            proposer,
            number_of_acting,
        })
    }

    fn proposer_index(&self, height: Height, round: Round) -> usize {
        match &self.proposer {
            ProposerSelection::Fixed(proposer) => self
                .nodes
                .iter()
                .position(|node| node == proposer)
                .unwrap_or(0),
            ProposerSelection::Rotating => {
                let height = height.int().max(0) as u64;
                (height.wrapping_add(round.int()) % self.nodes.len() as u64) as usize
            }
        }
    }
}

impl Suffrage for FixedSuffrage {
    fn name(&self) -> &str {
        "fixed-suffrage"
    }

    fn acting(&self, height: Height, round: Round) -> ActingSuffrage {
        let start = self.proposer_index(height, round);
        ActingSuffrage {
            height,
            round,
            proposer: self.nodes[start].clone(),
            nodes: acting_window(&self.nodes, start, self.number_of_acting),
        }
    }

    fn nodes(&self) -> Vec<Address> {
        self.nodes.clone()
    }

    fn is_inside(&self, node: &Address) -> bool {
        self.nodes.binary_search(node).is_ok()
    }
}
