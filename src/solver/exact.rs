//! Depth-first branch-and-bound solvers with progressively stronger bounding
//! and ordering.
//!
//! Every entry point returns the best log-probability `>= baseline` proven
//! before the deadline expires; on expiry the running baseline comes back
//! unchanged. The baseline flows down the search unchanged and is only
//! tightened on return, so any candidate at or below it can be discarded
//! without loss.

use crate::eval::Marginals;
use crate::repr::assignment::{Indicator, PartialAssignment, Query};
use crate::repr::spn::Spn;
use crate::repr::var_label::VarLabel;
use crate::solver::{assert_binary_schema, Deadline};
use std::time::Duration;

/// DFS in variable index order, pruning any branch whose optimistic prefix
/// value cannot beat the baseline.
pub fn marginal_checking(spn: &Spn, baseline: f64, timeout: Duration) -> f64 {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let mut x = vec![0usize; spn.num_vars()];
    dfs_mc(spn, &mut x, 0, baseline, deadline)
}

fn dfs_mc(spn: &Spn, x: &mut [usize], xi: usize, mut baseline: f64, deadline: Deadline) -> f64 {
    if deadline.expired() {
        return baseline;
    }
    if xi == spn.num_vars() {
        return f64::max(baseline, spn.eval_prefix(x, xi));
    }
    for value in 0..2 {
        x[xi] = value;
        if spn.eval_prefix(x, xi + 1) > baseline {
            baseline = f64::max(baseline, dfs_mc(spn, x, xi + 1, baseline, deadline));
        }
    }
    baseline
}

/// How the forward-checking DFS picks its branching variable.
#[derive(Clone, Copy)]
enum Branching {
    /// First still-free variable, low state first.
    FirstFree,
    /// Free variable with the largest derivative bound, best state first.
    LargestBound,
}

/// DFS with constraint propagation: the per-state derivative bounds are
/// driven to a fixed point, pruning states that cannot beat the baseline and
/// fixing variables left with a single live state.
pub fn forward_checking(spn: &Spn, baseline: f64, timeout: Duration) -> f64 {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let x = PartialAssignment::unassigned(spn.num_vars());
    dfs_fc(spn, &x, baseline, deadline, Branching::FirstFree)
}

/// Forward checking with dynamic variable ordering: branch on the variable
/// with the largest derivative bound and try its better state first.
pub fn forward_checking_ordering(spn: &Spn, baseline: f64, timeout: Duration) -> f64 {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let x = PartialAssignment::unassigned(spn.num_vars());
    dfs_fc(spn, &x, baseline, deadline, Branching::LargestBound)
}

fn dfs_fc(
    spn: &Spn,
    x: &PartialAssignment,
    mut baseline: f64,
    deadline: Deadline,
    branching: Branching,
) -> f64 {
    if deadline.expired() {
        return baseline;
    }
    let mut x = x.clone();
    let mut ind = Indicator::from_partial(&x, spn.schema());
    let d = loop {
        let d = spn.marginals(&ind);
        let mut updated = false;
        for i in 0..x.len() {
            let var = VarLabel::new_usize(i);
            if x.is_set(var) {
                continue;
            }
            let lo = d.get(var, 0);
            let hi = d.get(var, 1);
            if lo < baseline && hi < baseline {
                return baseline;
            }
            if lo < baseline {
                x.set(var, 1);
                ind.clear(var, 0);
                updated = true;
            }
            if hi < baseline {
                x.set(var, 0);
                ind.clear(var, 1);
                updated = true;
            }
        }
        if !updated {
            break d;
        }
    };

    let chosen = match branching {
        Branching::FirstFree => x.first_free().map(|var| (var, 0)),
        Branching::LargestBound => pick_largest_bound(&x, &d),
    };
    match chosen {
        Some((var, first)) => {
            x.set(var, first);
            baseline = f64::max(dfs_fc(spn, &x, baseline, deadline, branching), baseline);
            x.set(var, first ^ 1);
            baseline = f64::max(dfs_fc(spn, &x, baseline, deadline, branching), baseline);
            baseline
        }
        // fully determined: the marginal at any variable is the value of the
        // assignment that routes through its live state, so this max is the
        // value of a concrete completion
        None => f64::max(
            baseline,
            f64::max(d.get(VarLabel::new(0), 0), d.get(VarLabel::new(0), 1)),
        ),
    }
}

fn pick_largest_bound(x: &PartialAssignment, d: &Marginals) -> Option<(VarLabel, usize)> {
    let mut chosen: Option<(VarLabel, usize)> = None;
    for i in 0..x.len() {
        let var = VarLabel::new_usize(i);
        if x.is_set(var) {
            continue;
        }
        let value = if d.get(var, 0) < d.get(var, 1) { 1 } else { 0 };
        let replace = match chosen {
            None => true,
            Some((cv, cval)) => d.get(cv, cval) < d.get(var, value),
        };
        if replace {
            chosen = Some((var, value));
        }
    }
    chosen
}

/// Forward checking with ordering and staging: the pruning comparator is
/// closed (`<=`), and once at least five variables are fixed the network is
/// conditioned on them, shrinking the arena the rest of the search runs on.
pub fn forward_checking_staging(spn: &Spn, baseline: f64, timeout: Duration) -> f64 {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let x = PartialAssignment::unassigned(spn.num_vars());
    dfs_fcs(spn, &x, baseline, deadline)
}

fn dfs_fcs(spn: &Spn, x: &PartialAssignment, baseline: f64, deadline: Deadline) -> f64 {
    if deadline.expired() {
        return baseline;
    }
    let mut x = x.clone();
    let d = loop {
        let d = spn.marginals(&Indicator::from_partial(&x, spn.schema()));
        let mut updated = false;
        for i in 0..x.len() {
            let var = VarLabel::new_usize(i);
            if x.is_set(var) {
                continue;
            }
            let lo = d.get(var, 0);
            let hi = d.get(var, 1);
            if lo <= baseline && hi <= baseline {
                return baseline;
            }
            if lo <= baseline {
                x.set(var, 1);
                updated = true;
            }
            if hi <= baseline {
                x.set(var, 0);
                updated = true;
            }
        }
        if !updated {
            break d;
        }
    };

    let free = x.num_free();
    if free > 1 && x.len() - free >= 5 {
        let staged = spn.condition(&Query::from_partial(&x));
        let fresh = PartialAssignment::unassigned(staged.num_vars());
        let d = staged.marginals(&Indicator::all_ones(staged.schema()));
        return branch_fcs(&staged, fresh, &d, free, baseline, deadline);
    }
    branch_fcs(spn, x, &d, free, baseline, deadline)
}

fn branch_fcs(
    spn: &Spn,
    mut x: PartialAssignment,
    d: &Marginals,
    free: usize,
    mut baseline: f64,
    deadline: Deadline,
) -> f64 {
    let chosen = pick_largest_bound(&x, d);
    let (var, value) = match chosen {
        Some(c) => c,
        None => {
            // every variable is fixed; the marginal at the first variable's
            // live state is the value of the assignment itself
            let v0 = VarLabel::new(0);
            return f64::max(baseline, d.get(v0, x.get(v0).unwrap()));
        }
    };
    if free == 1 {
        // a single free variable left: its best bound is already the exact
        // value of the best completion
        return d.get(var, value);
    }
    x.set(var, value);
    baseline = dfs_fcs(spn, &x, baseline, deadline);
    x.set(var, 1 - value);
    baseline = dfs_fcs(spn, &x, baseline, deadline);
    baseline
}
