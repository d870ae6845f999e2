use std::sync::Arc;

use isaac_rs::{
    pluggables::BlockStorage,
    suffrage::{FixedSuffrage, ProposerSelection, RoundRobinSuffrage, Suffrage, SuffrageError},
    types::data_types::{Address, CryptoHash, Height, Round},
};
use log::LevelFilter;

mod common;

use common::{fixtures::Fixture, logging::setup_logger, mem_storage::MemStorage};

fn addresses(n: usize) -> Vec<Address> {
    (0..n).map(|i| Address::new(format!("n{}", i))).collect()
}

/// Checks that hold for every suffrage at every `(height, round)`.
fn assert_consistent(suffrage: &dyn Suffrage, height: Height, round: Round) {
    let acting = suffrage.acting(height, round);
    assert_eq!(acting, suffrage.acting(height, round));
    assert_eq!(acting.height, height);
    assert_eq!(acting.round, round);
    assert!(acting.exists(&acting.proposer));
    assert!(suffrage.is_proposer(height, round, &acting.proposer));
    for node in &acting.nodes {
        assert!(suffrage.is_acting(height, round, node));
        assert!(suffrage.is_inside(node));
    }
}

/// With five nodes and a previous manifest hash whose bytes sum to 7, the proposer of `(10, r)` is
/// `nodes[(7 + 10 + r) % 5]`.
#[test]
fn round_robin_proposer_rotation_test() {
    setup_logger(LevelFilter::Debug);

    let mut previous = [0u8; 32];
    previous[0] = 7;
    let nodes = addresses(5);
    let suffrage = RoundRobinSuffrage::new(nodes[0].clone(), nodes.clone(), 3, move |height| {
        (height == Height::new(9)).then_some(CryptoHash::new(previous))
    })
    .unwrap();

    let acting = suffrage.acting(Height::new(10), Round::new(0));
    assert_eq!(acting.proposer, nodes[2]);
    assert_eq!(acting.nodes, vec![nodes[2].clone(), nodes[3].clone(), nodes[4].clone()]);

    let acting = suffrage.acting(Height::new(10), Round::new(1));
    assert_eq!(acting.proposer, nodes[3]);
    assert_eq!(acting.nodes, vec![nodes[3].clone(), nodes[4].clone(), nodes[0].clone()]);

    for round in 0..5 {
        assert_consistent(&suffrage, Height::new(10), Round::new(round));
    }
}

#[test]
fn round_robin_edge_cases_test() {
    setup_logger(LevelFilter::Debug);

    let nodes = addresses(4);

    // 1. The local node is always part of the ring.
    let suffrage = RoundRobinSuffrage::new(nodes[3].clone(), nodes[..3].to_vec(), 2, |_| None).unwrap();
    assert_eq!(suffrage.nodes(), nodes);
    assert!(suffrage.is_inside(&nodes[3]));

    // 2. At genesis the local node proposes.
    assert_eq!(suffrage.acting(Height::GENESIS, Round::new(0)).proposer, nodes[3]);

    // 3. Without the previous manifest, the answer is still deterministic.
    assert_consistent(&suffrage, Height::new(5), Round::new(2));

    // 4. Acting nodes are capped at the ring size.
    let small = RoundRobinSuffrage::new(nodes[0].clone(), nodes[..2].to_vec(), 10, |_| None).unwrap();
    assert_eq!(small.acting(Height::new(3), Round::new(0)).nodes.len(), 2);

    // 5. Zero acting nodes is rejected.
    assert!(matches!(
        RoundRobinSuffrage::new(nodes[0].clone(), nodes.clone(), 0, |_| None),
        Err(SuffrageError::NoActingNodes)
    ));
    // 6. A round claimed by a remote ballot cannot overflow the provisional position.
    let last = Round::new(u64::MAX);
    let acting = suffrage.acting(Height::new(1000), last);
    assert!(suffrage.is_inside(&acting.proposer));
    assert_eq!(
        suffrage.is_proposer(Height::new(1000), last, &nodes[1]),
        acting.proposer == nodes[1]
    );
    assert_consistent(&suffrage, Height::new(i64::MAX), last);
}

/// A round-robin suffrage reading manifests from storage follows the chain.
#[test]
fn round_robin_with_storage_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let chain = fixture.chain(2);
    let storage = Arc::new(MemStorage::with_blocks(&chain));
    let nodes = fixture.addresses();
    let suffrage =
        RoundRobinSuffrage::with_storage(nodes[0].clone(), nodes.clone(), 3, Arc::clone(&storage)).unwrap();

    let sum: u64 = chain[2].hash.bytes().iter().map(|byte| *byte as u64).sum();
    let expected = ((sum + 3) % 3) as usize;
    assert_eq!(suffrage.acting(Height::new(3), Round::new(0)).proposer, nodes[expected]);
    assert!(storage.block(Height::new(2)).unwrap().is_some());
}

#[test]
fn fixed_suffrage_test() {
    setup_logger(LevelFilter::Debug);

    let nodes = addresses(4);

    // 1. A fixed proposer proposes every round.
    let fixed = FixedSuffrage::new(nodes.clone(), ProposerSelection::Fixed(nodes[1].clone()), 4).unwrap();
    for round in 0..3 {
        assert_eq!(fixed.acting(Height::new(7), Round::new(round)).proposer, nodes[1]);
        assert_consistent(&fixed, Height::new(7), Round::new(round));
    }
    assert_eq!(fixed.acting(Height::new(7), Round::new(0)).nodes.len(), 4);

    // 2. A rotating proposer moves on every height and every round.
    let rotating = FixedSuffrage::new(nodes.clone(), ProposerSelection::Rotating, 2).unwrap();
    assert_eq!(rotating.acting(Height::new(1), Round::new(0)).proposer, nodes[1]);
    assert_eq!(rotating.acting(Height::new(1), Round::new(1)).proposer, nodes[2]);
    assert_eq!(rotating.acting(Height::new(3), Round::new(2)).proposer, nodes[1]);
    assert_consistent(&rotating, Height::new(3), Round::new(2));

    // 3. Nodes outside the suffrage.
    assert!(!fixed.is_inside(&Address::new("stranger")));

    // 4. Invalid suffrages.
    assert_eq!(
        FixedSuffrage::new(Vec::new(), ProposerSelection::Rotating, 1).err(),
        Some(SuffrageError::Empty)
    );
    assert_eq!(
        FixedSuffrage::new(nodes.clone(), ProposerSelection::Fixed(Address::new("stranger")), 1).err(),
        Some(SuffrageError::UnknownNode(Address::new("stranger")))
    );
}
