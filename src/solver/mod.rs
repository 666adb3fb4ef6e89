//! MPE solvers over binary-schema networks.
//!
//! The approximate strategies in [`approx`] trade optimality for speed; the
//! branch-and-bound solvers in [`exact`] prove optimality given enough time.
//! Every entry point takes a wall-clock budget and polls it cooperatively at
//! recursion entries and pass iterations; a solver never mutates the network
//! it searches.

pub mod approx;
pub mod exact;
pub(crate) mod topk;

use crate::repr::spn::Spn;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A candidate explanation: a total assignment and its log-probability.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Candidate {
    pub x: Vec<usize>,
    pub p: f64,
}

/// A wall-clock budget, polled cooperatively.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: Duration) -> Deadline {
        Deadline {
            end: Instant::now().checked_add(budget),
        }
    }

    pub fn expired(&self) -> bool {
        match self.end {
            Some(end) => Instant::now() >= end,
            // a budget too large to represent never expires
            None => false,
        }
    }
}

/// The solvers branch on two states per variable; anything else is a
/// programmer error.
pub(crate) fn assert_binary_schema(spn: &Spn) {
    assert!(
        spn.schema().iter().all(|&card| card == 2),
        "solver requires a binary schema"
    );
}

#[test]
fn test_deadline_zero_budget_expires_immediately() {
    assert!(Deadline::after(Duration::ZERO).expired());
}

#[test]
fn test_deadline_huge_budget_never_expires() {
    assert!(!Deadline::after(Duration::MAX).expired());
}
