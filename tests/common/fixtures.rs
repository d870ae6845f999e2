use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use ed25519_dalek::SigningKey;
use isaac_rs::{
    ballot_box::BallotBox,
    genesis::GenesisGenerator,
    local_state::{LocalNode, LocalState},
    networking::{
        nodes::{Nodes, RemoteNode},
        sending::Broadcaster,
    },
    pluggables::{BlockStorage, ProposalProcessor},
    policy::Policy,
    seal_pool::SealPool,
    states::{base::HandlerBase, StateChangeContext},
    suffrage::Suffrage,
    types::{
        ballots::{AcceptBallot, Ballot, InitBallot, Proposal, SignBallot, SignedBallot},
        block::{operations_hash, Block, Manifest},
        crypto_primitives::Keypair,
        data_types::{Address, CryptoHash, Height, NetworkID, Round},
        facts::{AcceptFact, InitFact, ProposalFact, SignFact},
        seal::Seal,
        threshold::Threshold,
        voteproof::Voteproof,
    },
};
use rand_core::OsRng;

use super::{mem_storage::MemStorage, processor::BlockMaker};

pub(crate) fn hash(byte: u8) -> CryptoHash {
    CryptoHash::new([byte; 32])
}

/// Drain `seals` until a ballot matching `pred` arrives, or `timeout` passes.
pub(crate) fn wait_for_ballot(
    seals: &Receiver<Seal>,
    timeout: Duration,
    pred: impl Fn(&Ballot) -> bool,
) -> Option<Ballot> {
    let deadline = Instant::now() + timeout;
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match seals.recv_timeout(wait) {
            Ok(Seal::Ballot(ballot)) if pred(&ballot) => return Some(ballot),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

pub(crate) struct Member {
    pub(crate) address: Address,
    pub(crate) signing_key: SigningKey,
}

impl Member {
    pub(crate) fn keypair(&self) -> Keypair {
        Keypair::new(self.signing_key.clone())
    }

    pub(crate) fn local_node(&self) -> LocalNode {
        LocalNode::new(self.address.clone(), self.signing_key.clone())
    }

    pub(crate) fn remote_node(&self) -> RemoteNode {
        RemoteNode::without_channel(self.address.clone(), self.signing_key.verifying_key())
    }
}

/// Keys and addresses of a test network. Member `i` has the address `n{i}`.
pub(crate) struct Fixture {
    pub(crate) network_id: NetworkID,
    pub(crate) members: Vec<Member>,
}

/// What a state handler under test works with, and the receiving ends of its channels.
pub(crate) struct Harness {
    pub(crate) base: HandlerBase,
    pub(crate) local: Arc<LocalState>,
    pub(crate) seal_pool: Arc<SealPool>,
    pub(crate) seals: Receiver<Seal>,
    pub(crate) transitions: Receiver<StateChangeContext>,
}

impl Fixture {
    pub(crate) fn new(size: usize) -> Fixture {
        let mut csprg = OsRng {};
        Fixture {
            network_id: NetworkID::new(b"isaac-test".to_vec()),
            members: (0..size)
                .map(|i| Member {
                    address: Address::new(format!("n{}", i)),
                    signing_key: SigningKey::generate(&mut csprg),
                })
                .collect(),
        }
    }

    /// Members with the same addresses on the same network, holding fresh keys.
    pub(crate) fn impostors(&self) -> Fixture {
        let mut csprg = OsRng {};
        Fixture {
            network_id: self.network_id.clone(),
            members: self
                .members
                .iter()
                .map(|member| Member {
                    address: member.address.clone(),
                    signing_key: SigningKey::generate(&mut csprg),
                })
                .collect(),
        }
    }

    pub(crate) fn addresses(&self) -> Vec<Address> {
        self.members.iter().map(|member| member.address.clone()).collect()
    }

    pub(crate) fn init_ballot(
        &self,
        member: usize,
        height: i64,
        round: u64,
        previous_block: CryptoHash,
        voteproof: Option<Voteproof>,
    ) -> Ballot {
        let member = &self.members[member];
        Ballot::Init(InitBallot::new(
            &member.keypair(),
            member.address.clone(),
            InitFact {
                height: Height::new(height),
                round: Round::new(round),
                previous_block,
                previous_round: Round::new(0),
            },
            voteproof,
            &self.network_id,
        ))
    }

    pub(crate) fn sign_ballot(
        &self,
        member: usize,
        height: i64,
        round: u64,
        proposal: CryptoHash,
        new_block: CryptoHash,
    ) -> Ballot {
        let member = &self.members[member];
        Ballot::Sign(SignBallot::new(
            &member.keypair(),
            member.address.clone(),
            SignFact {
                height: Height::new(height),
                round: Round::new(round),
                proposal,
                new_block,
            },
            &self.network_id,
        ))
    }

    pub(crate) fn accept_ballot(
        &self,
        member: usize,
        height: i64,
        round: u64,
        proposal: CryptoHash,
        new_block: CryptoHash,
        voteproof: Voteproof,
    ) -> Ballot {
        let member = &self.members[member];
        Ballot::Accept(AcceptBallot::new(
            &member.keypair(),
            member.address.clone(),
            AcceptFact {
                height: Height::new(height),
                round: Round::new(round),
                proposal,
                new_block,
            },
            voteproof,
            &self.network_id,
        ))
    }

    pub(crate) fn proposal(
        &self,
        member: usize,
        height: i64,
        round: u64,
        seals: Vec<CryptoHash>,
    ) -> Proposal {
        let member = &self.members[member];
        Proposal::new(
            &member.keypair(),
            member.address.clone(),
            ProposalFact {
                height: Height::new(height),
                round: Round::new(round),
                seals,
            },
            &self.network_id,
        )
    }

    /// A ballot box in which a single vote finishes every stage.
    pub(crate) fn single_voter_box(&self) -> BallotBox {
        BallotBox::with_threshold(self.network_id.clone(), Threshold::new(1, 100.0).unwrap())
    }

    /// A ballot box with the threshold the default policy gives a suffrage of every member.
    pub(crate) fn suffrage_box(&self) -> BallotBox {
        let threshold = Policy::default()
            .threshold(self.members.len() as u32)
            .unwrap();
        BallotBox::with_threshold(self.network_id.clone(), threshold)
    }

    /// Vote `ballot(member)` for every member in order into a fresh suffrage box, and return the
    /// voteproof of the vote that finishes the stage.
    pub(crate) fn collect(&self, ballot: impl Fn(usize) -> Ballot) -> Voteproof {
        let ballot_box = self.suffrage_box();
        for member in 0..self.members.len() {
            let outcome = ballot_box.vote(&ballot(member)).unwrap();
            if outcome.newly_finished {
                return outcome.voteproof;
            }
        }
        panic!("every member voted but the stage did not finish")
    }

    /// A majority INIT voteproof for `(previous.height + 1, round)` that builds on `previous`, voted by
    /// the suffrage of every member.
    pub(crate) fn init_voteproof(&self, previous: &Block, round: u64) -> Voteproof {
        self.collect(|member| {
            self.init_ballot(
                member,
                previous.height().int() + 1,
                round,
                previous.hash,
                previous.accept_voteproof.clone(),
            )
        })
    }

    /// Committed blocks from genesis up to `height`, each voted by the suffrage of every member.
    pub(crate) fn chain(&self, height: i64) -> Vec<Block> {
        let genesis = GenesisGenerator::new(self.members[0].local_node(), self.network_id.clone())
            .generate(Vec::new())
            .unwrap();
        self.extend(vec![genesis], height)
    }

    /// `blocks` followed by committed blocks up to `height`, each voted by the suffrage of every member.
    pub(crate) fn extend(&self, mut blocks: Vec<Block>, height: i64) -> Vec<Block> {
        let first = blocks.last().unwrap().height().int() + 1;
        for h in first..=height {
            let previous = blocks.last().unwrap().clone();
            let init_voteproof = self.init_voteproof(&previous, 0);
            let proposal = self.proposal(0, h, 0, Vec::new());
            let block = Block::new(
                Manifest {
                    height: Height::new(h),
                    round: Round::new(0),
                    proposal: proposal.hash(),
                    previous_block: previous.hash,
                    operations_hash: operations_hash(&[]),
                },
                Vec::new(),
            );
            let accept_voteproof = self.collect(|member| {
                self.accept_ballot(
                    member,
                    h,
                    0,
                    proposal.hash(),
                    block.hash,
                    init_voteproof.clone(),
                )
            });
            blocks.push(block.with_voteproofs(init_voteproof, accept_voteproof));
        }
        blocks
    }

    pub(crate) fn local_state(&self, member: usize, policy: Policy) -> Arc<LocalState> {
        Arc::new(LocalState::new(
            self.members[member].local_node(),
            self.network_id.clone(),
            policy,
        ))
    }

    /// A handler base for `member`, with every other member registered without a channel.
    pub(crate) fn harness(
        &self,
        member: usize,
        suffrage: Arc<dyn Suffrage>,
        policy: Policy,
        storage: MemStorage,
        processor: BlockMaker,
    ) -> Harness {
        let nodes = Arc::new(Nodes::new());
        for (i, other) in self.members.iter().enumerate() {
            if i != member {
                nodes.add(other.remote_node()).unwrap();
            }
        }
        self.harness_with_nodes(member, suffrage, policy, storage, processor, nodes)
    }

    pub(crate) fn harness_with_nodes(
        &self,
        member: usize,
        suffrage: Arc<dyn Suffrage>,
        policy: Policy,
        storage: MemStorage,
        processor: BlockMaker,
        nodes: Arc<Nodes>,
    ) -> Harness {
        let local = self.local_state(member, policy);
        let seal_pool = Arc::new(SealPool::new(100));
        let (seal_sender, seals) = mpsc::channel();
        let (transition_sender, transitions) = mpsc::channel();
        let storage: Arc<dyn BlockStorage> = Arc::new(storage);
        let processor: Arc<Mutex<dyn ProposalProcessor>> = Arc::new(Mutex::new(processor));

        let base = HandlerBase::builder()
            .local(Arc::clone(&local))
            .suffrage(suffrage)
            .storage(storage)
            .nodes(Arc::clone(&nodes))
            .seal_pool(Arc::clone(&seal_pool))
            .processor(processor)
            .broadcaster(Broadcaster::new(nodes, seal_sender, None))
            .transitions(transition_sender)
            .build();

        Harness {
            base,
            local,
            seal_pool,
            seals,
            transitions,
        }
    }
}
