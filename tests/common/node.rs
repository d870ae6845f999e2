use std::sync::{mpsc::Receiver, Arc};

use isaac_rs::{
    networking::nodes::Nodes,
    policy::Policy,
    replica::{Configuration, Replica, ReplicaSpec},
    states::ConsensusState,
    suffrage::Suffrage,
    types::{block::Block, data_types::Height},
};

use super::{fixtures::Fixture, mem_storage::MemStorage, processor::BlockMaker};

/// A running replica and the storage it commits to.
pub(crate) struct Node {
    replica: Replica,
    storage: MemStorage,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        fixture: &Fixture,
        member: usize,
        genesis: Block,
        suffrage: Arc<dyn Suffrage>,
        policy: Policy,
        nodes: Arc<Nodes>,
        inbound: Receiver<Vec<u8>>,
        storage: MemStorage,
    ) -> Node {
        Replica::initialize(&storage, &fixture.network_id, genesis).unwrap();

        let configuration = Configuration::builder()
            .signing_key(fixture.members[member].signing_key.clone())
            .address(fixture.members[member].address.clone())
            .network_id(fixture.network_id.clone())
            .policy(policy)
            .log_events(true)
            .build();

        let replica = ReplicaSpec::builder()
            .configuration(configuration)
            .suffrage(suffrage)
            .nodes(nodes)
            .storage(Arc::new(storage.clone()))
            .processor(BlockMaker::new())
            .inbound(inbound)
            .build()
            .start()
            .unwrap();

        Node { replica, storage }
    }

    pub(crate) fn last_height(&self) -> Height {
        self.storage.last_height()
    }

    pub(crate) fn state(&self) -> Option<ConsensusState> {
        self.replica.state()
    }

    pub(crate) fn storage(&self) -> &MemStorage {
        &self.storage
    }
}
