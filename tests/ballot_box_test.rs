use std::{sync::Arc, thread};

use isaac_rs::{
    ballot_box::{BallotBox, BallotBoxError},
    types::{
        ballots::{Ballot, BallotError, SignedBallot},
        data_types::{Height, NetworkID, Round, Stage},
        facts::FactError,
        threshold::Threshold,
        voteproof::{VoteResult, Voteproof},
    },
};
use log::LevelFilter;

mod common;

use common::{
    fixtures::{hash, Fixture},
    logging::setup_logger,
};

/// The ACCEPT voteproof of block 9, which INIT ballots at height 10 cite.
fn accept_voteproof_at_nine(fixture: &Fixture) -> Voteproof {
    fixture.chain(9)[9].accept_voteproof.clone().unwrap()
}

/// Two of three nodes vote the same INIT fact: the second vote finishes the stage with a majority, and
/// the late third vote does not change it.
#[test]
fn two_of_three_majority_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Set up a ballot box for three voters at 66%.
    let fixture = Fixture::new(3);
    let threshold = Threshold::new(3, 66.0).unwrap();
    assert_eq!(threshold.value, 2);
    let ballot_box = BallotBox::with_threshold(fixture.network_id.clone(), threshold);
    let cited = accept_voteproof_at_nine(&fixture);

    // 2. n0 votes. One vote is not enough.
    let b0 = fixture.init_ballot(0, 10, 0, hash(1), Some(cited.clone()));
    let outcome = ballot_box.vote(&b0).unwrap();
    assert_eq!(outcome.voteproof.result, VoteResult::NotYet);
    assert!(!outcome.newly_finished);
    assert!(outcome.voteproof.majority.is_none());

    // 3. n1 votes the same fact. The stage finishes with a majority on it.
    let b1 = fixture.init_ballot(1, 10, 0, hash(1), Some(cited.clone()));
    let outcome = ballot_box.vote(&b1).unwrap();
    assert_eq!(outcome.voteproof.result, VoteResult::Majority);
    assert!(outcome.newly_finished);
    assert_eq!(outcome.voteproof.majority, Some(b0.fact()));
    assert_eq!(outcome.voteproof.votes.len(), 2);
    assert!(outcome.voteproof.validate(&fixture.network_id).is_ok());
    let finished = outcome.voteproof;

    // 4. n2 votes late, for another fact. The finished voteproof stays as it was.
    let b2 = fixture.init_ballot(2, 10, 0, hash(2), Some(cited));
    let outcome = ballot_box.vote(&b2).unwrap();
    assert!(!outcome.newly_finished);
    assert_eq!(outcome.voteproof, finished);
    assert_eq!(
        ballot_box.voteproof(Height::new(10), Round::new(0), Stage::Init),
        Some(finished)
    );

    // 5. The late vote is still recorded.
    assert_eq!(
        ballot_box.vote_record(&b2).map(|record| record.fact_hash),
        Some(b2.fact_hash())
    );
}

/// Two voters who disagree can never reach a threshold of two: the stage ends in a draw.
#[test]
fn draw_at_two_voters_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(2);
    let threshold = Threshold::new(2, 67.0).unwrap();
    assert_eq!(threshold.value, 2);
    let ballot_box = BallotBox::with_threshold(fixture.network_id.clone(), threshold);
    let cited = accept_voteproof_at_nine(&fixture);

    let outcome = ballot_box
        .vote(&fixture.init_ballot(0, 10, 0, hash(1), Some(cited.clone())))
        .unwrap();
    assert_eq!(outcome.voteproof.result, VoteResult::NotYet);

    let outcome = ballot_box
        .vote(&fixture.init_ballot(1, 10, 0, hash(2), Some(cited)))
        .unwrap();
    assert_eq!(outcome.voteproof.result, VoteResult::Draw);
    assert!(outcome.newly_finished);
    assert!(outcome.voteproof.majority.is_none());
    assert_eq!(outcome.voteproof.facts.len(), 2);
    assert!(outcome.voteproof.validate(&fixture.network_id).is_ok());
}

/// Voting the same ballot twice is the same as voting it once.
#[test]
fn vote_is_idempotent_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let ballot_box =
        BallotBox::with_threshold(fixture.network_id.clone(), Threshold::new(3, 66.0).unwrap());
    let ballot = fixture.init_ballot(0, 10, 0, hash(1), Some(accept_voteproof_at_nine(&fixture)));

    let first = ballot_box.vote(&ballot).unwrap();
    let second = ballot_box.vote(&ballot).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.voteproof.bytes(), second.voteproof.bytes());
    assert_eq!(second.voteproof.votes.len(), 1);
    assert_eq!(ballot_box.len(), 1);
}

/// Proposals are not voted on, and invalid ballots are rejected before they are recorded.
#[test]
fn rejects_unvotable_ballots_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let ballot_box =
        BallotBox::with_threshold(fixture.network_id.clone(), Threshold::new(3, 66.0).unwrap());

    // 1. A proposal.
    let proposal: Ballot = fixture.proposal(0, 10, 0, Vec::new()).into();
    assert_eq!(
        ballot_box.vote(&proposal),
        Err(BallotBoxError::InvalidStage(Stage::Proposal))
    );

    // 2. A SIGN ballot for an empty block hash.
    let empty = fixture.sign_ballot(0, 10, 0, hash(1), hash(0));
    assert_eq!(
        ballot_box.vote(&empty),
        Err(BallotBoxError::InvalidBallot(BallotError::InvalidFact(
            FactError::EmptyHash(Stage::Sign)
        )))
    );

    // 3. An INIT ballot past genesis that cites no voteproof.
    let uncited = fixture.init_ballot(0, 10, 0, hash(1), None);
    assert_eq!(
        ballot_box.vote(&uncited),
        Err(BallotBoxError::InvalidBallot(BallotError::MissingVoteproof(
            Stage::Init
        )))
    );

    // 4. A ballot signed for another network.
    let foreign = fixture.sign_ballot(0, 10, 0, hash(1), hash(2));
    let foreign_box = BallotBox::with_threshold(
        NetworkID::new(b"other".to_vec()),
        Threshold::new(3, 66.0).unwrap(),
    );
    assert!(matches!(
        foreign_box.vote(&foreign),
        Err(BallotBoxError::InvalidBallot(BallotError::FactHashMismatch))
    ));

    assert!(ballot_box.is_empty());
    assert!(foreign_box.is_empty());
}

/// Many threads vote the same stage at once. Exactly one of them finishes it, and all of them end up
/// with the same voteproof.
#[test]
fn concurrent_votes_finish_once_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(10);
    let ballot_box = Arc::new(BallotBox::with_threshold(
        fixture.network_id.clone(),
        Threshold::new(10, 67.0).unwrap(),
    ));
    let ballots: Vec<_> = (0..10)
        .map(|i| fixture.sign_ballot(i, 10, 0, hash(1), hash(2)))
        .collect();

    let handles: Vec<_> = ballots
        .into_iter()
        .map(|ballot| {
            let ballot_box = Arc::clone(&ballot_box);
            thread::spawn(move || ballot_box.vote(&ballot).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|outcome| outcome.newly_finished).count(), 1);
    let finished = ballot_box
        .voteproof(Height::new(10), Round::new(0), Stage::Sign)
        .unwrap();
    assert_eq!(finished.result, VoteResult::Majority);
    assert_eq!(finished.votes.len(), 7);
    for outcome in outcomes.iter().filter(|outcome| outcome.voteproof.is_finished()) {
        assert_eq!(outcome.voteproof, finished);
    }
}

/// Finishing a stage evicts the records of lower heights.
#[test]
fn finishing_evicts_lower_heights_test() {
    setup_logger(LevelFilter::Debug);

    let fixture = Fixture::new(3);
    let ballot_box =
        BallotBox::with_threshold(fixture.network_id.clone(), Threshold::new(3, 66.0).unwrap());
    let chain = fixture.chain(10);
    let cited_at_ten = chain[9].accept_voteproof.clone();
    let cited_at_eleven = chain[10].accept_voteproof.clone();

    // 1. Open a stage at height 10 and one at height 11.
    ballot_box
        .vote(&fixture.init_ballot(0, 10, 0, hash(1), cited_at_ten))
        .unwrap();
    ballot_box
        .vote(&fixture.init_ballot(0, 11, 0, chain[10].hash, cited_at_eleven.clone()))
        .unwrap();
    assert_eq!(ballot_box.len(), 2);

    // 2. Finish the stage at height 11.
    let outcome = ballot_box
        .vote(&fixture.init_ballot(1, 11, 0, chain[10].hash, cited_at_eleven))
        .unwrap();
    assert!(outcome.newly_finished);

    // 3. Height 10 is gone.
    assert_eq!(ballot_box.len(), 1);
    assert!(ballot_box
        .voteproof(Height::new(10), Round::new(0), Stage::Init)
        .is_none());

    // 4. Cleaning above height 11 empties the box.
    ballot_box.clean(Height::new(12));
    assert!(ballot_box.is_empty());
}
