use std::sync::{
    mpsc::{self, Receiver, Sender},
    Arc, Mutex,
};

use isaac_rs::{
    networking::{
        channel::{Channel, NetworkError},
        nodes::{Nodes, RemoteNode},
    },
    pluggables::BlockStorage,
    types::{block::Block, data_types::{Address, Height}, seal::Seal},
};

use super::{fixtures::Fixture, mem_storage::MemStorage};

/// A mock channel to one peer. Seals go onto the peer's inbound channel and block requests are served
/// from the peer's storage.
pub(crate) struct ChannelStub {
    peer: Address,
    inbound: Mutex<Sender<Vec<u8>>>,
    storage: MemStorage,
}

impl ChannelStub {
    pub(crate) fn new(peer: Address, inbound: Sender<Vec<u8>>, storage: MemStorage) -> ChannelStub {
        ChannelStub {
            peer,
            inbound: Mutex::new(inbound),
            storage,
        }
    }
}

impl Channel for ChannelStub {
    fn send_seal(&self, seal: &Seal) -> Result<(), NetworkError> {
        self.inbound
            .lock()
            .unwrap()
            .send(seal.encode())
            .map_err(|_| NetworkError::Closed(self.peer.to_string()))
    }

    fn request_blocks(&self, heights: &[Height]) -> Result<Vec<Block>, NetworkError> {
        let mut blocks = Vec::new();
        for height in heights {
            match self
                .storage
                .block(*height)
                .map_err(|err| NetworkError::Remote(err.to_string()))?
            {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }
}

/// Connects every member of `fixture` to every other member. Returns, per member, its registry of remote
/// nodes and the receiving end of its transport.
pub(crate) fn mock_network(
    fixture: &Fixture,
    storages: &[MemStorage],
) -> Vec<(Arc<Nodes>, Receiver<Vec<u8>>)> {
    let (senders, receivers): (Vec<Sender<Vec<u8>>>, Vec<Receiver<Vec<u8>>>) =
        (0..fixture.members.len()).map(|_| mpsc::channel()).unzip();

    receivers
        .into_iter()
        .enumerate()
        .map(|(i, inbound)| {
            let nodes = Arc::new(Nodes::new());
            for (j, peer) in fixture.members.iter().enumerate() {
                if i == j {
                    continue;
                }
                let channel = ChannelStub::new(
                    peer.address.clone(),
                    senders[j].clone(),
                    storages[j].clone(),
                );
                nodes
                    .add(RemoteNode::new(
                        peer.address.clone(),
                        peer.signing_key.verifying_key(),
                        Arc::new(channel),
                    ))
                    .unwrap();
            }
            (nodes, inbound)
        })
        .collect()
}
