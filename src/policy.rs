/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Policy parameters that govern a replica's participation in consensus.
//!
//! All replicas of a network should share the same `threshold_ratio`; the timing parameters may differ
//! between replicas.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use isaac_rs::policy::Policy;
//!
//! let policy = Policy::builder()
//!     .threshold_ratio(67.0)
//!     .timeout_waiting_proposal(Duration::from_secs(3))
//!     .build();
//! assert!(policy.validate().is_ok());
//! ```

use std::time::Duration;

use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::types::threshold::{Threshold, ThresholdError};

#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for a [Policy]. Every parameter has a default, so `Policy::builder().build()` is
    a valid policy.
"))]
pub struct Policy {
    #[builder(default = 67.0, setter(doc = "Set the percentage of the suffrage whose matching votes make a majority, in (0, 100]."))]
    pub threshold_ratio: f64,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set how long to wait for a proposal before moving to the next round."))]
    pub timeout_waiting_proposal: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the period of INIT ballot rebroadcasts in the consensus state."))]
    pub interval_broadcasting_init_ballot: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the period of INIT ballot broadcasts in the joining state."))]
    pub interval_broadcasting_init_ballot_in_joining: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the period of proposal rebroadcasts."))]
    pub interval_broadcasting_proposal: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the delay between a SIGN majority and the first ACCEPT ballot broadcast."))]
    pub wait_broadcasting_accept_ballot: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the period of ACCEPT ballot rebroadcasts."))]
    pub interval_broadcasting_accept_ballot: Duration,
    #[builder(default = Duration::from_secs(60), setter(doc = "Set how far a ballot's signing time may lie from the local clock."))]
    pub timespan_valid_ballot: Duration,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the deadline for processing a proposal."))]
    pub timeout_process_proposal: Duration,
    #[builder(default = 1, setter(doc = "Set the number of suffrage nodes acting in each round."))]
    pub number_of_acting_suffrage_nodes: usize,
    #[builder(default = 100, setter(doc = "Set the maximum number of operation seals a proposal references."))]
    pub max_operations_in_proposal: usize,
    #[builder(default = 10, setter(doc = "Set the number of blocks requested from a peer at once when syncing."))]
    pub sync_batch_size: u32,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the wait before retrying a failed sync attempt."))]
    pub interval_sync_retry: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::builder().build()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("invalid threshold ratio: {0}")]
    InvalidThresholdRatio(#[from] ThresholdError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Policy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        Threshold::new(1, self.threshold_ratio)?;

        let durations = [
            ("timeout_waiting_proposal", self.timeout_waiting_proposal),
            (
                "interval_broadcasting_init_ballot",
                self.interval_broadcasting_init_ballot,
            ),
            (
                "interval_broadcasting_init_ballot_in_joining",
                self.interval_broadcasting_init_ballot_in_joining,
            ),
            (
                "interval_broadcasting_proposal",
                self.interval_broadcasting_proposal,
            ),
            (
                "wait_broadcasting_accept_ballot",
                self.wait_broadcasting_accept_ballot,
            ),
            (
                "interval_broadcasting_accept_ballot",
                self.interval_broadcasting_accept_ballot,
            ),
            ("timespan_valid_ballot", self.timespan_valid_ballot),
            ("timeout_process_proposal", self.timeout_process_proposal),
            ("interval_sync_retry", self.interval_sync_retry),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, duration)| duration.is_zero()) {
            return Err(PolicyError::Zero(*name));
        }

        if self.number_of_acting_suffrage_nodes == 0 {
            return Err(PolicyError::Zero("number_of_acting_suffrage_nodes"));
        }
        if self.sync_batch_size == 0 {
            return Err(PolicyError::Zero("sync_batch_size"));
        }
        Ok(())
    }

    /// The threshold for a suffrage of `total` nodes under this policy.
    pub fn threshold(&self, total: u32) -> Result<Threshold, ThresholdError> {
        Threshold::new(total, self.threshold_ratio)
    }
}
