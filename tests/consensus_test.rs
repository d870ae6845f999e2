use std::{sync::Arc, time::Duration};

use isaac_rs::{
    ballot_box::BallotBox,
    policy::Policy,
    states::{consensus::Consensus, ConsensusState, StateChangeContext, StateHandler},
    suffrage::{FixedSuffrage, ProposerSelection, Suffrage},
    types::{
        ballots::{Ballot, SignedBallot},
        block::{operations_hash, Block, Manifest},
        data_types::{Height, Round, Stage},
        seal::Seal,
        threshold::Threshold,
        voteproof::{VoteResult, Voteproof},
    },
};
use log::LevelFilter;

mod common;

use common::{
    fixtures::{hash, wait_for_ballot, Fixture, Harness},
    logging::setup_logger,
    mem_storage::MemStorage,
    processor::BlockMaker,
};

/// Three nodes; n0 proposes every round.
fn suffrage(fixture: &Fixture) -> Arc<dyn Suffrage> {
    Arc::new(
        FixedSuffrage::new(
            fixture.addresses(),
            ProposerSelection::Fixed(fixture.members[0].address.clone()),
            3,
        )
        .unwrap(),
    )
}

fn policy() -> Policy {
    Policy::builder()
        .timeout_waiting_proposal(Duration::from_millis(300))
        .interval_broadcasting_init_ballot(Duration::from_millis(200))
        .interval_broadcasting_proposal(Duration::from_millis(200))
        .wait_broadcasting_accept_ballot(Duration::from_millis(100))
        .interval_broadcasting_accept_ballot(Duration::from_millis(200))
        .build()
}

/// A Consensus handler for `member`, whose last block is the genesis block, and the INIT voteproof that
/// opens height 1.
fn setup(fixture: &Fixture, member: usize) -> (Harness, Consensus, Block, Voteproof) {
    setup_with(fixture, member, policy(), BlockMaker::new())
}

fn setup_with(
    fixture: &Fixture,
    member: usize,
    policy: Policy,
    processor: BlockMaker,
) -> (Harness, Consensus, Block, Voteproof) {
    let genesis = fixture.chain(0).remove(0);
    let harness = fixture.harness(
        member,
        suffrage(fixture),
        policy,
        MemStorage::with_blocks(&[genesis.clone()]),
        processor,
    );
    harness.local.set_last_block(genesis.clone());
    let consensus = Consensus::new(harness.base.clone());
    let init_voteproof = fixture.init_voteproof(&genesis, 0);
    (harness, consensus, genesis, init_voteproof)
}

fn enter(consensus: &Consensus, voteproof: &Voteproof) {
    consensus
        .activate(
            &StateChangeContext::new(ConsensusState::Joining, ConsensusState::Consensus)
                .with_voteproof(voteproof.clone()),
        )
        .unwrap();
}

/// The block `BlockMaker` derives from `proposal` on top of `previous`.
fn expected_block(proposal: &isaac_rs::types::ballots::Proposal, previous: &Block) -> Block {
    Block::new(
        Manifest {
            height: proposal.height(),
            round: proposal.round(),
            proposal: proposal.hash(),
            previous_block: previous.hash,
            operations_hash: operations_hash(&proposal.fact.seals),
        },
        proposal.fact.seals.clone(),
    )
}

/// A replica that is not the proposer and never sees a proposal gives up on round 0 after
/// `timeout_waiting_proposal` and broadcasts INIT ballots for round 1.
#[test]
fn round_advance_on_timeout_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Enter height 1 round 0 as n1.
    let fixture = Fixture::new(3);
    let (harness, consensus, genesis, init_voteproof) = setup(&fixture, 1);
    enter(&consensus, &init_voteproof);
    assert_eq!(consensus.current_init_voteproof(), Some(init_voteproof.clone()));

    // 2. Nothing is broadcast for round 1 before the timeout.
    let early = wait_for_ballot(&harness.seals, Duration::from_millis(150), |ballot| {
        ballot.stage() == Stage::Init
    });
    assert!(early.is_none());

    // 3. The INIT ballot for round 1 follows within one more broadcasting interval.
    let ballot = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        ballot.stage() == Stage::Init
    })
    .expect("an INIT ballot for round 1");
    assert_eq!(ballot.height(), Height::new(1));
    assert_eq!(ballot.round(), Round::new(1));
    assert_eq!(ballot.node(), &fixture.members[1].address);
    assert_eq!(ballot.voteproof(), Some(&init_voteproof));
    assert!(ballot.is_valid(&fixture.network_id).is_ok());
    match ballot.fact() {
        isaac_rs::types::facts::Fact::Init(fact) => assert_eq!(fact.previous_block, genesis.hash),
        _ => panic!("expected an INIT fact"),
    }

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Broken))
        .unwrap();
}

/// A proposal that takes longer than `timeout_process_proposal` to process is abandoned: the replica
/// signs nothing and moves to the next round right away.
#[test]
fn slow_processing_moves_to_next_round_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Enter height 1 round 0 as n1, with a processor that outlasts the processing deadline and a
    //    proposal timeout that does not fire during the test.
    let fixture = Fixture::new(3);
    let policy = Policy::builder()
        .timeout_waiting_proposal(Duration::from_secs(10))
        .timeout_process_proposal(Duration::from_millis(200))
        .interval_broadcasting_init_ballot(Duration::from_millis(200))
        .build();
    let (harness, consensus, _, init_voteproof) =
        setup_with(&fixture, 1, policy, BlockMaker::slow(Duration::from_secs(1)));
    enter(&consensus, &init_voteproof);

    // 2. The proposal of n0 arrives. Processing gives up at the deadline.
    let proposal = fixture.proposal(0, 1, 0, Vec::new());
    harness.seal_pool.add_proposal(proposal.clone());
    consensus
        .new_seal(&Seal::Ballot(Ballot::Proposal(proposal)))
        .unwrap();

    // 3. The first ballot n1 broadcasts is an INIT ballot for round 1, not a SIGN ballot.
    let ballot = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        matches!(ballot.stage(), Stage::Init | Stage::Sign)
    })
    .expect("an INIT ballot for round 1");
    assert_eq!(ballot.stage(), Stage::Init);
    assert_eq!(ballot.height(), Height::new(1));
    assert_eq!(ballot.round(), Round::new(1));
    assert_eq!(ballot.voteproof(), Some(&init_voteproof));
    assert!(ballot.is_valid(&fixture.network_id).is_ok());

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Broken))
        .unwrap();
}

/// The proposer of the round broadcasts its proposal as soon as the round starts.
#[test]
fn proposer_broadcasts_proposal_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let (harness, consensus, _, init_voteproof) = setup(&fixture, 0);
    enter(&consensus, &init_voteproof);

    let proposal = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        ballot.stage() == Stage::Proposal
    })
    .expect("a proposal");
    assert_eq!(proposal.height(), Height::new(1));
    assert_eq!(proposal.round(), Round::new(0));
    assert_eq!(proposal.node(), &fixture.members[0].address);
    assert!(proposal.is_valid(&fixture.network_id).is_ok());

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Broken))
        .unwrap();
}

/// A full round as a non-proposer: process the proposal, sign it, accept it once the SIGN stage agrees,
/// commit once the ACCEPT stage agrees, and move on to the next height.
#[test]
fn process_sign_accept_commit_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Enter height 1 round 0 as n1.
    let fixture = Fixture::new(3);
    let (harness, consensus, genesis, init_voteproof) = setup(&fixture, 1);
    enter(&consensus, &init_voteproof);

    // 2. The proposal of n0 arrives. n1 processes it and signs the block.
    let proposal = fixture.proposal(0, 1, 0, Vec::new());
    let block = expected_block(&proposal, &genesis);
    harness.seal_pool.add_proposal(proposal.clone());
    consensus
        .new_seal(&Seal::Ballot(Ballot::Proposal(proposal.clone())))
        .unwrap();

    let sign = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        ballot.stage() == Stage::Sign
    })
    .expect("a SIGN ballot");
    assert_eq!(
        sign.fact(),
        fixture
            .sign_ballot(1, 1, 0, proposal.hash(), block.hash)
            .fact()
    );

    // 3. The SIGN stage agrees on the same block. n1 broadcasts its ACCEPT ballot.
    let sign_voteproof = fixture
        .single_voter_box()
        .vote(&fixture.sign_ballot(0, 1, 0, proposal.hash(), block.hash))
        .unwrap()
        .voteproof;
    consensus.new_voteproof(&sign_voteproof).unwrap();

    let accept = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        ballot.stage() == Stage::Accept
    })
    .expect("an ACCEPT ballot");
    assert_eq!(accept.voteproof(), Some(&init_voteproof));
    assert!(accept.is_valid(&fixture.network_id).is_ok());

    // 4. The ACCEPT stage agrees. n1 commits the block.
    let accept_voteproof = fixture
        .single_voter_box()
        .vote(&fixture.accept_ballot(
            0,
            1,
            0,
            proposal.hash(),
            block.hash,
            init_voteproof.clone(),
        ))
        .unwrap()
        .voteproof;
    consensus.new_voteproof(&accept_voteproof).unwrap();

    assert_eq!(harness.local.last_height(), Height::new(1));
    assert_eq!(harness.local.last_block_hash(), block.hash);
    let stored = harness.local.last_block().unwrap();
    assert!(stored.is_committed(&fixture.network_id).is_ok());

    // 5. n1 moves on to height 2.
    let next = wait_for_ballot(&harness.seals, Duration::from_millis(500), |ballot| {
        ballot.stage() == Stage::Init && ballot.height() == Height::new(2)
    })
    .expect("an INIT ballot for height 2");
    assert_eq!(next.round(), Round::new(0));
    assert_eq!(next.voteproof(), Some(&accept_voteproof));
    assert!(next.is_valid(&fixture.network_id).is_ok());

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Broken))
        .unwrap();
}

/// A draw in any stage moves the replica to the next round.
#[test]
fn draw_moves_to_next_round_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let (harness, consensus, genesis, init_voteproof) = setup(&fixture, 1);
    enter(&consensus, &init_voteproof);

    let ballot_box =
        BallotBox::with_threshold(fixture.network_id.clone(), Threshold::new(2, 67.0).unwrap());
    ballot_box
        .vote(&fixture.sign_ballot(0, 1, 0, hash(1), hash(2)))
        .unwrap();
    let draw = ballot_box
        .vote(&fixture.sign_ballot(2, 1, 0, hash(1), hash(3)))
        .unwrap()
        .voteproof;
    assert_eq!(draw.result, VoteResult::Draw);
    consensus.new_voteproof(&draw).unwrap();

    let ballot = wait_for_ballot(&harness.seals, Duration::from_millis(250), |ballot| {
        ballot.stage() == Stage::Init
    })
    .expect("an INIT ballot for round 1");
    assert_eq!(ballot.height(), Height::new(1));
    assert_eq!(ballot.round(), Round::new(1));
    assert_eq!(ballot.voteproof(), Some(&draw));
    assert!(ballot.is_valid(&fixture.network_id).is_ok());
    assert_eq!(harness.local.last_block_hash(), genesis.hash);

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Broken))
        .unwrap();
}

/// Voteproofs that show the replica is behind move it to Syncing.
#[test]
fn falling_behind_moves_to_syncing_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);

    // 1. An INIT majority that builds on a block other than the local last block.
    let (harness, consensus, genesis, _) = setup(&fixture, 1);
    let foreign = fixture
        .single_voter_box()
        .vote(&fixture.init_ballot(0, 1, 0, hash(9), genesis.accept_voteproof.clone()))
        .unwrap()
        .voteproof;
    enter(&consensus, &foreign);

    let ctx = harness
        .transitions
        .recv_timeout(Duration::from_millis(500))
        .unwrap();
    assert_eq!(ctx.from, ConsensusState::Consensus);
    assert_eq!(ctx.to, ConsensusState::Syncing);
    assert_eq!(ctx.voteproof, Some(foreign));

    // 2. A voteproof for a height above the next one.
    let (harness, consensus, _, init_voteproof) = setup(&fixture, 1);
    enter(&consensus, &init_voteproof);
    let ahead = fixture.chain(3)[3].accept_voteproof.clone().unwrap();
    consensus.new_voteproof(&ahead).unwrap();

    let ctx = harness
        .transitions
        .recv_timeout(Duration::from_millis(500))
        .unwrap();
    assert_eq!(ctx.to, ConsensusState::Syncing);
    assert_eq!(ctx.voteproof, Some(ahead));

    consensus
        .deactivate(&StateChangeContext::new(ConsensusState::Consensus, ConsensusState::Syncing))
        .unwrap();
}

/// Consensus can only be entered with a valid INIT voteproof.
#[test]
fn activation_requires_init_voteproof_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let (_harness, consensus, genesis, _) = setup(&fixture, 1);

    let without = StateChangeContext::new(ConsensusState::Joining, ConsensusState::Consensus);
    assert!(consensus.activate(&without).is_err());

    let with_accept = without
        .clone()
        .with_voteproof(genesis.accept_voteproof.clone().unwrap());
    assert!(consensus.activate(&with_accept).is_err());
}
