/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The number of matching votes that constitutes agreement, and the rule that decides whether a tally
//! of votes has reached it.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{data_types::CryptoHash, voteproof::VoteResult};

/// Minimum count of matching votes out of `total` voters.
///
/// `value = ceil(total * ratio / 100)`, and `1 <= value <= total` always holds for a `Threshold` built
/// through [`new`](Self::new).
#[derive(Clone, Copy, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Threshold {
    pub total: u32,
    pub ratio: f64,
    pub value: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("threshold total must be greater than zero")]
    ZeroTotal,
    #[error("threshold ratio {0} is outside of (0, 100]")]
    RatioOutOfRange(f64),
    #[error("threshold value {value} is outside of [1, {total}]")]
    ValueOutOfRange { total: u32, value: u32 },
}

impl Threshold {
    pub fn new(total: u32, ratio: f64) -> Result<Threshold, ThresholdError> {
        if total == 0 {
            return Err(ThresholdError::ZeroTotal);
        }
        if !(ratio > 0.0 && ratio <= 100.0) {
            return Err(ThresholdError::RatioOutOfRange(ratio));
        }

        let value = (total as f64 * ratio / 100.0).ceil() as u32;
        let threshold = Threshold { total, ratio, value };
        threshold.check_bounds()?;

        Ok(threshold)
    }

    /// Check a `Threshold` that did not come from [`new`](Self::new), e.g., one decoded from a
    /// voteproof.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let recomputed = Threshold::new(self.total, self.ratio)?;
        if recomputed.value != self.value {
            return Err(ThresholdError::ValueOutOfRange {
                total: self.total,
                value: self.value,
            });
        }
        Ok(())
    }

    fn check_bounds(&self) -> Result<(), ThresholdError> {
        if self.value < 1 || self.value > self.total {
            return Err(ThresholdError::ValueOutOfRange {
                total: self.total,
                value: self.value,
            });
        }
        Ok(())
    }

    /// Decide the outcome of a tally.
    ///
    /// `tally` holds one entry per distinct fact hash with the number of votes cast for it. Returns the
    /// result, and the winning fact hash if the result is [`VoteResult::Majority`].
    ///
    /// When several facts share the top count and all of them reach `value` (only possible with a ratio
    /// of 50% or less), the smallest fact hash wins, so every replica picks the same one.
    pub fn check(&self, tally: &[(CryptoHash, u32)]) -> (VoteResult, Option<CryptoHash>) {
        let cast: u32 = tally.iter().map(|(_, count)| count).sum();
        if cast < self.value {
            return (VoteResult::NotYet, None);
        }

        let mut sorted = tally.to_vec();
        sorted.sort_by(|(hash_a, count_a), (hash_b, count_b)| {
            count_b.cmp(count_a).then_with(|| hash_a.cmp(hash_b))
        });

        let Some(&(top_hash, top)) = sorted.first() else {
            return (VoteResult::NotYet, None);
        };
        let remaining = self.total.saturating_sub(cast);

        if top >= self.value {
            (VoteResult::Majority, Some(top_hash))
        } else if top + remaining < self.value {
            (VoteResult::Draw, None)
        } else {
            (VoteResult::NotYet, None)
        }
    }
}
