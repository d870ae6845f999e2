//! Functions for sending seals to the P2P network.

use std::{
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    events::{BroadcastBallotEvent, Event, ProposeEvent},
    types::{ballots::Ballot, seal::Seal},
};

use super::nodes::Nodes;

/// Sends seals to every registered node, and loops them back to the local replica so it votes its own
/// ballots through the same path as everybody else's.
#[derive(Clone)]
pub struct Broadcaster {
    nodes: Arc<Nodes>,
    loopback: Sender<Seal>,
    event_publisher: Option<Sender<Event>>,
}

impl Broadcaster {
    pub fn new(
        nodes: Arc<Nodes>,
        loopback: Sender<Seal>,
        event_publisher: Option<Sender<Event>>,
    ) -> Broadcaster {
        Broadcaster {
            nodes,
            loopback,
            event_publisher,
        }
    }

    pub fn broadcast(&self, seal: Seal) {
        for (address, err) in self.nodes.broadcast(&seal) {
            log::debug!("failed to send seal {} to {}: {}", seal.hash(), address, err);
        }

        if let Seal::Ballot(ballot) = &seal {
            let event = match ballot {
                Ballot::Proposal(proposal) => Event::Propose(ProposeEvent {
                    timestamp: SystemTime::now(),
                    proposal: proposal.clone(),
                }),
                _ => Event::BroadcastBallot(BroadcastBallotEvent {
                    timestamp: SystemTime::now(),
                    ballot: ballot.clone(),
                }),
            };
            Event::publish(&self.event_publisher, event);
        }

        // The receiving end only goes away while the replica shuts down.
        let _ = self.loopback.send(seal);
    }

    pub fn broadcast_ballot(&self, ballot: impl Into<Ballot>) {
        self.broadcast(Seal::Ballot(ballot.into()))
    }
}
