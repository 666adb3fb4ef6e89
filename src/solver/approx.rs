//! Approximate MPE strategies. All of them produce lower bounds on the true
//! optimum: a traversal or search that commits to concrete assignments can
//! only undershoot.

use crate::repr::assignment::{Indicator, PartialAssignment};
use crate::repr::spn::{Node, Spn, Sum};
use crate::repr::var_label::NodeIndex;
use crate::solver::topk::{LinkArena, LinkId};
use crate::solver::{assert_binary_schema, Candidate, Deadline};
use crate::util::logsumexp::log_add;
use bit_set::BitSet;
use rand::Rng;
use rayon::prelude::*;
use std::time::Duration;

/// Bottom-up max-product pass recording the best edge of every sum node,
/// then a top-down read-off of the reached terminals.
pub fn max_product(spn: &Spn) -> Vec<usize> {
    assert_binary_schema(spn);
    let n = spn.num_nodes();
    let mut prt = vec![0.0; n];
    let mut branch = vec![0usize; n];
    for (i, node) in spn.nodes().enumerate() {
        match node {
            Node::Trm(_) => prt[i] = 0.0,
            Node::Sum(s) => {
                let mut best = f64::NEG_INFINITY;
                let mut best_child = s.edges[0].child.value();
                for e in &s.edges {
                    let crt = e.weight + prt[e.child.value()];
                    if best < crt {
                        best = crt;
                        best_child = e.child.value();
                    }
                }
                branch[i] = best_child;
                prt[i] = best;
            }
            Node::Prd(p) => prt[i] = p.edges.iter().map(|e| prt[e.child.value()]).sum(),
        }
    }
    read_off(spn, |i, _| branch[i])
}

/// Greedy top-down descent: at each reached sum node, follow the edge with
/// the largest weighted marginal.
pub fn naive_greedy(spn: &Spn) -> Vec<usize> {
    assert_binary_schema(spn);
    let prt = spn.partition();
    read_off(spn, |_, s: &Sum| {
        let mut best = f64::NEG_INFINITY;
        let mut best_child = s.edges[0].child.value();
        for e in &s.edges {
            let crt = e.weight + prt[e.child.value()];
            if best < crt {
                best = crt;
                best_child = e.child.value();
            }
        }
        best_child
    })
}

/// Top-down reach pass shared by the traversal solvers: products propagate
/// to all children, sums to the child `pick` chooses, terminals write their
/// state.
fn read_off<F>(spn: &Spn, mut pick: F) -> Vec<usize>
where
    F: FnMut(usize, &Sum) -> usize,
{
    let n = spn.num_nodes();
    let mut x = vec![0usize; spn.num_vars()];
    let mut reach = BitSet::with_capacity(n);
    reach.insert(n - 1);
    for i in (0..n).rev() {
        if !reach.contains(i) {
            continue;
        }
        match spn.node(NodeIndex::new(i)) {
            Node::Trm(t) => x[t.var.value_usize()] = t.value,
            Node::Sum(s) => {
                reach.insert(pick(i, s));
            }
            Node::Prd(p) => {
                for e in &p.edges {
                    reach.insert(e.child.value());
                }
            }
        }
    }
    x
}

/// Forward pass carrying one best partial candidate per node. A sum adopts
/// the child candidate that scores highest at the sum itself; a product
/// merges its children's candidates, which relies on decomposability (the
/// children's assigned scopes are disjoint). `None` signals an expired
/// deadline.
pub fn amap(spn: &Spn, timeout: Duration) -> Option<(PartialAssignment, f64)> {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let num_vars = spn.num_vars();
    let mut mc: Vec<(PartialAssignment, f64)> = Vec::with_capacity(spn.num_nodes());
    for (i, node) in spn.nodes().enumerate() {
        if deadline.expired() {
            return None;
        }
        let cand = match node {
            Node::Trm(t) => {
                let mut x = PartialAssignment::unassigned(num_vars);
                x.set(t.var, t.value);
                (x, 0.0)
            }
            Node::Sum(s) => {
                let mut best = (PartialAssignment::unassigned(num_vars), f64::NEG_INFINITY);
                for e in &s.edges {
                    if deadline.expired() {
                        return None;
                    }
                    let p = spn.eval_at(&mc[e.child.value()].0, NodeIndex::new(i));
                    if best.1 < p {
                        best = (mc[e.child.value()].0.clone(), p);
                    }
                }
                best
            }
            Node::Prd(p) => {
                let mut x = PartialAssignment::unassigned(num_vars);
                for e in &p.edges {
                    x.union(&mc[e.child.value()].0);
                }
                let score = spn.eval_at(&x, NodeIndex::new(i));
                (x, score)
            }
        };
        mc.push(cand);
    }
    mc.pop()
}

/// Beam search over total assignments, seeded by ancestral sampling and
/// expanded through a derivative-pruned one-flip neighbourhood. Returns the
/// best candidate found before the deadline; the rng makes runs reproducible
/// under a fixed seed.
pub fn beam_search<R: Rng>(
    spn: &Spn,
    beam_size: usize,
    timeout: Duration,
    rng: &mut R,
) -> Candidate {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let prt = spn.partition();
    let mut beam: Vec<Candidate> = (0..beam_size)
        .map(|_| {
            let x = sample_one(spn, &prt, rng);
            let p = spn.eval_total(&x);
            Candidate { x, p }
        })
        .collect();

    let mut best = Candidate {
        x: Vec::new(),
        p: f64::NEG_INFINITY,
    };
    while !beam.is_empty() {
        beam = unique_x(beam);
        truncate_top_k(&mut beam, beam_size);
        if best.p < beam[0].p {
            best = beam[0].clone();
        }
        if deadline.expired() {
            return best;
        }
        beam = next_gens(spn, &beam, deadline);
    }
    best
}

/// Draws one assignment top-down: each reached sum node picks an edge with
/// probability proportional to its share of the node marginal.
fn sample_one<R: Rng>(spn: &Spn, prt: &[f64], rng: &mut R) -> Vec<usize> {
    let n = spn.num_nodes();
    let mut x = vec![0usize; spn.num_vars()];
    let mut reach = BitSet::with_capacity(n);
    reach.insert(n - 1);
    for i in (0..n).rev() {
        if !reach.contains(i) {
            continue;
        }
        match spn.node(NodeIndex::new(i)) {
            Node::Trm(t) => x[t.var.value_usize()] = t.value,
            Node::Sum(s) => {
                let r = rng.gen::<f64>().ln() + prt[i];
                let mut crt = f64::NEG_INFINITY;
                for e in &s.edges {
                    crt = log_add(crt, e.weight + prt[e.child.value()]);
                    if r < crt {
                        reach.insert(e.child.value());
                        break;
                    }
                }
            }
            Node::Prd(p) => {
                for e in &p.edges {
                    reach.insert(e.child.value());
                }
            }
        }
    }
    x
}

/// Keeps the first occurrence of every distinct assignment.
fn unique_x(beam: Vec<Candidate>) -> Vec<Candidate> {
    let mut res: Vec<Candidate> = Vec::with_capacity(beam.len());
    for cand in beam {
        if !res.iter().any(|r| r.x == cand.x) {
            res.push(cand);
        }
    }
    res
}

/// Partial selection sort: after the call the first `min(k, len)` entries
/// are the best candidates in descending order, and the rest are dropped.
fn truncate_top_k(beam: &mut Vec<Candidate>, k: usize) {
    let k = k.min(beam.len());
    for i in 0..k {
        for j in i + 1..beam.len() {
            if beam[i].p < beam[j].p {
                beam.swap(i, j);
            }
        }
    }
    beam.truncate(k);
}

/// Expands every beam member in parallel; joining in submission order keeps
/// the downstream dedup deterministic.
fn next_gens(spn: &Spn, beam: &[Candidate], deadline: Deadline) -> Vec<Candidate> {
    beam.par_iter()
        .map(|cand| {
            if deadline.expired() {
                Vec::new()
            } else {
                next_gen(spn, cand)
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// One-flip neighbourhood pruned by the derivative bound. With a one-hot
/// indicator the credit at a disagreeing terminal equals the exact value of
/// the flipped assignment, so the emitted scores need no re-evaluation.
fn next_gen(spn: &Spn, cand: &Candidate) -> Vec<Candidate> {
    let dr = spn.derivative(&Indicator::from_total(&cand.x, spn.schema()));
    let mut res = Vec::new();
    for (i, node) in spn.nodes().enumerate() {
        if let Node::Trm(t) = node {
            if cand.x[t.var.value_usize()] != t.value && dr[i] > cand.p {
                let mut nx = cand.x.clone();
                nx[t.var.value_usize()] = t.value;
                res.push(Candidate { x: nx, p: dr[i] });
            }
        }
    }
    res
}

/// K-best backtracking: a forward pass folds, at every node, its children's
/// ranked link lists into the node's own top-K list; the root's K candidates
/// are then re-scored exactly and the best is returned. `None` signals an
/// expired deadline.
pub fn k_best(spn: &Spn, k: usize, timeout: Duration) -> Option<Candidate> {
    assert_binary_schema(spn);
    let deadline = Deadline::after(timeout);
    let mut arena = LinkArena::new();
    let mut ls: Vec<Vec<LinkId>> = Vec::with_capacity(spn.num_nodes());
    for node in spn.nodes() {
        if deadline.expired() {
            return None;
        }
        let links = match node {
            Node::Trm(t) => vec![arena.leaf(*t)],
            Node::Sum(s) => {
                let mut acc: Vec<LinkId> = Vec::new();
                for e in &s.edges {
                    acc = arena.merge_sum(&acc, &ls[e.child.value()], 0.0, e.weight, k);
                }
                acc
            }
            Node::Prd(p) => {
                let mut acc: Vec<LinkId> = Vec::new();
                for e in &p.edges {
                    acc = arena.merge_prd(&acc, &ls[e.child.value()], k);
                }
                acc
            }
        };
        ls.push(links);
    }

    let mut best: Option<Candidate> = None;
    for &id in ls[spn.root().value()].iter().take(k) {
        let mut x = vec![0usize; spn.num_vars()];
        arena.read_assignment(id, &mut x);
        let p = spn.eval_total(&x);
        if best.as_ref().map_or(true, |b| b.p < p) {
            best = Some(Candidate { x, p });
        }
    }
    best
}
