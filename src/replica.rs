/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a replica.
//!
//! A replica is one node's instance of the consensus core. It is built from a [specification](ReplicaSpec)
//! that supplies:
//! - The replica's [configuration](Configuration): its key, address, network ID and policy.
//! - The [suffrage](crate::suffrage) that decides who votes and who proposes.
//! - The [registry of remote nodes](crate::networking::nodes::Nodes), each reached through a user-provided
//!   [`Channel`](crate::networking::channel::Channel).
//! - The [block storage](crate::pluggables::BlockStorage) and the
//!   [proposal processor](crate::pluggables::ProposalProcessor).
//! - The receiving end of the transport, on which encoded seals from other nodes arrive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! Replica::initialize(&storage, &network_id, genesis_block)?;
//!
//! let replica =
//!     ReplicaSpec::builder()
//!     .configuration(configuration)
//!     .suffrage(suffrage)
//!     .nodes(nodes)
//!     .storage(storage)
//!     .processor(processor)
//!     .inbound(inbound)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Optional setters
//!
//! The optional setters register user-defined handlers for the events in [crate::events]:
//! - `.on_broadcast_ballot(...)`
//! - `.on_receive_ballot(...)`
//! - `.on_reject_ballot(...)`
//! - `.on_collect_voteproof(...)`
//! - `.on_propose(...)`
//! - `.on_process_proposal(...)`
//! - `.on_commit_block(...)`
//! - `.on_move_next_round(...)`
//! - `.on_change_state(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//!
//! The replica's [configuration](Configuration) is also built with the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .signing_key(signing_key)
//!     .address(Address::new("n0"))
//!     .network_id(NetworkID::new(b"testnet".to_vec()))
//!     .policy(Policy::builder().threshold_ratio(67.0).build())
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use ed25519_dalek::SigningKey;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    ballot_box::BallotBox,
    event_bus::*,
    events::*,
    local_state::{LocalNode, LocalSnapshot, LocalState},
    networking::{nodes::Nodes, receiving::start_polling, sending::Broadcaster},
    pluggables::{BlockStorage, ProposalProcessor, StorageError},
    policy::{Policy, PolicyError},
    seal_pool::SealPool,
    states::{
        base::HandlerBase, booting::Booting, broken::Broken, consensus::Consensus,
        joining::Joining, syncing::Syncing, ConsensusState, StateChangeContext, StateHandler,
        StatesController,
    },
    suffrage::Suffrage,
    types::{
        block::{Block, BlockError},
        data_types::{Address, NetworkID},
    },
};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [signing key](ed25519_dalek::SigningKey).
/// 2. The replica's [address](crate::types::data_types::Address), which must be unique in the network.
/// 3. The [network ID](crate::types::data_types::NetworkID), which every signature covers.
/// 4. The [policy](crate::policy::Policy): the majority threshold and the consensus timings.
/// 5. The "Log Events" flag, if set to "true" then every event is logged.
/// 6. The capacity of the pool of operation seals waiting to be proposed.
///
/// ## Network ID
///
/// Every digest a replica signs is followed by the network ID, so ballots of one network never verify in
/// another. Do not run a node in two networks that share a network ID with the same key.
///
/// ## Log Events
///
/// The replica logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.signing_key(...)`
    - `.address(...)`
    - `.network_id(...)`
    - `.log_events(...)`

    Optional:
    - `.policy(...)`
    - `.seal_pool_capacity(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's signing key, used to sign ballots. Required."))]
    pub signing_key: SigningKey,
    #[builder(setter(doc = "Set the replica's address. Required."))]
    pub address: Address,
    #[builder(setter(doc = "Set the network ID. Required."))]
    pub network_id: NetworkID,
    #[builder(default, setter(doc = "Set the policy. Defaults to `Policy::default()`."))]
    pub policy: Policy,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
    #[builder(default = 10_000, setter(doc = "Set the number of operation seals the replica pools. Defaults to 10000."))]
    pub seal_pool_capacity: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReplicaError {
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("genesis block is not committed: {0}")]
    InvalidGenesis(#[from] BlockError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.configuration(...)`
    - `.suffrage(...)`
    - `.nodes(...)`
    - `.storage(...)`
    - `.processor(...)`
    - `.inbound(...)`

    Optional:
    - `.on_broadcast_ballot(...)`
    - `.on_receive_ballot(...)`
    - `.on_reject_ballot(...)`
    - `.on_collect_voteproof(...)`
    - `.on_propose(...)`
    - `.on_process_proposal(...)`
    - `.on_commit_block(...)`
    - `.on_move_next_round(...)`
    - `.on_change_state(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
"))]
pub struct ReplicaSpec<S: BlockStorage + 'static, P: ProposalProcessor> {
    // Required parameters
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the suffrage. The argument must implement the [Suffrage](crate::suffrage::Suffrage) trait. Required."))]
    suffrage: Arc<dyn Suffrage>,
    #[builder(setter(doc = "Set the registry of remote nodes. Required."))]
    nodes: Arc<Nodes>,
    #[builder(setter(doc = "Set the block storage. The argument must implement the [BlockStorage](crate::pluggables::BlockStorage) trait. Required."))]
    storage: Arc<S>,
    #[builder(setter(doc = "Set the proposal processor. The argument must implement the [ProposalProcessor](crate::pluggables::ProposalProcessor) trait. Required."))]
    processor: P,
    #[builder(setter(doc = "Set the receiving end of the transport, on which encoded seals arrive. Required."))]
    inbound: Receiver<Vec<u8>>,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&BroadcastBallotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BroadcastBallotEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a ballot. Optional."))]
    on_broadcast_ballot: Option<HandlerPtr<BroadcastBallotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBallotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBallotEvent>),
    doc = "Register a handler closure to be invoked after the replica accepts a ballot. Optional."))]
    on_receive_ballot: Option<HandlerPtr<ReceiveBallotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBallotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBallotEvent>),
    doc = "Register a handler closure to be invoked after the replica drops a ballot. Optional."))]
    on_reject_ballot: Option<HandlerPtr<RejectBallotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectVoteproofEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectVoteproofEvent>),
    doc = "Register a handler closure to be invoked after a stage finishes in the replica's ballot box. Optional."))]
    on_collect_voteproof: Option<HandlerPtr<CollectVoteproofEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProcessProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProcessProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica derives a block from a proposal. Optional."))]
    on_process_proposal: Option<HandlerPtr<ProcessProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&MoveNextRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<MoveNextRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica gives up on a round. Optional."))]
    on_move_next_round: Option<HandlerPtr<MoveNextRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ChangeStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ChangeStateEvent>),
    doc = "Register a handler closure to be invoked after the replica changes its consensus state. Optional."))]
    on_change_state: Option<HandlerPtr<ChangeStateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica starts syncing. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica finishes syncing. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
}

impl<S: BlockStorage + 'static, P: ProposalProcessor> ReplicaSpec<S, P> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct. The replica starts in Booting.
    pub fn start(self) -> Result<Replica, ReplicaError> {
        let configuration = self.configuration;
        configuration.policy.validate()?;
        if !self.suffrage.is_inside(&configuration.address) {
            log::warn!(
                "{} is not in the suffrage; it will follow consensus without voting",
                configuration.address
            );
        }

        let local = Arc::new(LocalState::new(
            LocalNode::new(configuration.address, configuration.signing_key),
            configuration.network_id.clone(),
            configuration.policy,
        ));

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            UserHandlers {
                on_broadcast_ballot: self.on_broadcast_ballot,
                on_receive_ballot: self.on_receive_ballot,
                on_reject_ballot: self.on_reject_ballot,
                on_collect_voteproof: self.on_collect_voteproof,
                on_propose: self.on_propose,
                on_process_proposal: self.on_process_proposal,
                on_commit_block: self.on_commit_block,
                on_move_next_round: self.on_move_next_round,
                on_change_state: self.on_change_state,
                on_start_sync: self.on_start_sync,
                on_end_sync: self.on_end_sync,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (seal_sender, seal_receiver) = mpsc::channel();
        let (transition_sender, transition_receiver) = mpsc::channel();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.inbound, seal_sender.clone(), poller_shutdown_receiver);

        let storage: Arc<dyn BlockStorage> = self.storage;
        let processor: Arc<Mutex<dyn ProposalProcessor>> = Arc::new(Mutex::new(self.processor));
        let base = HandlerBase::builder()
            .local(Arc::clone(&local))
            .suffrage(Arc::clone(&self.suffrage))
            .storage(storage)
            .nodes(Arc::clone(&self.nodes))
            .seal_pool(Arc::new(SealPool::new(configuration.seal_pool_capacity)))
            .processor(processor)
            .broadcaster(Broadcaster::new(
                Arc::clone(&self.nodes),
                seal_sender,
                event_publisher.clone(),
            ))
            .transitions(transition_sender.clone())
            .event_publisher(event_publisher)
            .build();

        let ballot_box = {
            let local = Arc::clone(&local);
            let suffrage = Arc::clone(&self.suffrage);
            Arc::new(BallotBox::new(configuration.network_id, move || {
                let total = u32::try_from(suffrage.nodes().len()).unwrap_or(u32::MAX);
                local.policy().threshold(total)
            }))
        };

        let handlers: Vec<Arc<dyn StateHandler>> = vec![
            Arc::new(Booting::new(base.clone())),
            Arc::new(Joining::new(base.clone())),
            Arc::new(Consensus::new(base.clone())),
            Arc::new(Syncing::new(base.clone())),
            Arc::new(Broken::new()),
        ];
        let controller = Arc::new(StatesController::new(&base, ballot_box, handlers));

        let (controller_shutdown, controller_shutdown_receiver) = mpsc::channel();
        let controller_thread = Arc::clone(&controller).start(
            seal_receiver,
            transition_receiver,
            controller_shutdown_receiver,
        );

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        // The controller picks this up on its first iteration.
        let _ = transition_sender.send(StateChangeContext::new(
            ConsensusState::Booting,
            ConsensusState::Booting,
        ));

        Ok(Replica {
            local,
            controller,
            poller: Some(poller),
            poller_shutdown,
            controller_thread: Some(controller_thread),
            controller_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica {
    local: Arc<LocalState>,
    controller: Arc<StatesController>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    controller_thread: Option<JoinHandle<()>>,
    controller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Stores the genesis block into `storage`, unless it already holds a block. Every replica of a
    /// network must be initialized with the same genesis block, generated by
    /// [GenesisGenerator](crate::genesis::GenesisGenerator).
    pub fn initialize<S: BlockStorage>(
        storage: &S,
        network_id: &NetworkID,
        genesis_block: Block,
    ) -> Result<(), ReplicaError> {
        if storage.last_block()?.is_some() {
            return Ok(());
        }
        genesis_block.is_committed(network_id)?;
        storage.store_block(genesis_block)?;
        Ok(())
    }

    /// The replica's current consensus state. `None` only in the instant before Booting activates.
    pub fn state(&self) -> Option<ConsensusState> {
        self.controller.state()
    }

    /// A snapshot of the replica's last block and the voteproofs it last saw.
    pub fn local_state(&self) -> Arc<LocalSnapshot> {
        self.local.snapshot()
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Events published after the bus stops are dropped.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.controller_shutdown.send(());
        if let Some(controller_thread) = self.controller_thread.take() {
            let _ = controller_thread.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
