//! Forward value and backward derivative passes over the network arena.
//!
//! Both passes run in the log domain and walk the arena in (reverse)
//! topological order, so shared children are visited exactly once. The
//! reduction order is the authored edge order; evaluating the same network
//! twice yields bit-identical results.

use crate::repr::assignment::{Indicator, PartialAssignment};
use crate::repr::spn::{Node, Spn};
use crate::repr::var_label::{NodeIndex, VarLabel};
use crate::util::logsumexp::{log_add, log_sum_exp_by};

/// Per-variable, per-state derivative totals produced by [`Spn::marginals`].
/// `get(var, v)` is an upper bound on the log-probability of any completion
/// of the evaluated indicator that assigns `var = v`.
#[derive(Debug, Clone)]
pub struct Marginals {
    d: Vec<Vec<f64>>,
}

impl Marginals {
    #[inline]
    pub fn get(&self, var: VarLabel, value: usize) -> f64 {
        self.d[var.value_usize()][value]
    }
}

impl Spn {
    /// Forward pass: the log-value of every node under the given indicator
    /// vector. The root entry is the network value.
    pub fn eval(&self, ind: &Indicator) -> Vec<f64> {
        let mut val = Vec::with_capacity(self.num_nodes());
        for node in self.nodes() {
            let v = match node {
                Node::Trm(t) => ind.weight(t.var, t.value).ln(),
                Node::Sum(s) => log_sum_exp_by(s.edges.len(), |k| {
                    s.edges[k].weight + val[s.edges[k].child.value()]
                }),
                Node::Prd(p) => p.edges.iter().map(|e| val[e.child.value()]).sum(),
            };
            val.push(v);
        }
        val
    }

    /// Log-probability of a total assignment.
    pub fn eval_total(&self, x: &[usize]) -> f64 {
        let val = self.eval(&Indicator::from_total(x, self.schema()));
        val[self.root().value()]
    }

    /// Root value with variables below `fixed` clamped to `x` and the rest
    /// marginalised: an optimistic upper bound on any completion of the
    /// prefix.
    pub fn eval_prefix(&self, x: &[usize], fixed: usize) -> f64 {
        let val = self.eval(&Indicator::from_prefix(x, fixed, self.schema()));
        val[self.root().value()]
    }

    /// Evaluates the sub-DAG rooted at `at` under a hard reading of a partial
    /// assignment: a terminal is `0` iff its variable is assigned its state,
    /// and `-inf` otherwise (free variables included).
    pub fn eval_at(&self, x: &PartialAssignment, at: NodeIndex) -> f64 {
        let mut val = Vec::with_capacity(at.value() + 1);
        for node in self.nodes().take(at.value() + 1) {
            let v = match node {
                Node::Trm(t) => {
                    if x.get(t.var) == Some(t.value) {
                        0.0
                    } else {
                        f64::NEG_INFINITY
                    }
                }
                Node::Sum(s) => log_sum_exp_by(s.edges.len(), |k| {
                    s.edges[k].weight + val[s.edges[k].child.value()]
                }),
                Node::Prd(p) => p.edges.iter().map(|e| val[e.child.value()]).sum(),
            };
            val.push(v);
        }
        val[at.value()]
    }

    /// Node values under the all-ones indicator (the partition function at
    /// the root, per-node marginals below it).
    pub fn partition(&self) -> Vec<f64> {
        self.eval(&Indicator::all_ones(self.schema()))
    }

    /// Backward pass: `dr[i] = log d(root)/d(node_i)`, the credit the root
    /// assigns to each node under the given indicator.
    ///
    /// At a product parent the credit pushed to a child is the product of its
    /// siblings. Forming it as `pr[parent] - pr[child]` is only legal when no
    /// child is `-inf`; with exactly one zero child the sibling product is
    /// re-accumulated explicitly, and with two or more every child gets
    /// `-inf`. This keeps `-inf - -inf` (a NaN) out of the pass entirely.
    pub fn derivative(&self, ind: &Indicator) -> Vec<f64> {
        let pr = self.eval(ind);
        let n = self.num_nodes();
        let mut dr = vec![f64::NEG_INFINITY; n];
        dr[n - 1] = 0.0;
        for i in (0..n).rev() {
            match self.node(NodeIndex::new(i)) {
                Node::Trm(_) => {}
                Node::Sum(s) => {
                    for e in &s.edges {
                        let c = e.child.value();
                        dr[c] = log_add(dr[c], dr[i] + e.weight);
                    }
                }
                Node::Prd(p) => {
                    let mut zero_cnt = 0;
                    for e in &p.edges {
                        if pr[e.child.value()] == f64::NEG_INFINITY {
                            zero_cnt += 1;
                            if zero_cnt == 2 {
                                break;
                            }
                        }
                    }
                    for e in &p.edges {
                        let c = e.child.value();
                        let other = match zero_cnt {
                            0 => pr[i] - pr[c],
                            1 if pr[c] == f64::NEG_INFINITY => p
                                .edges
                                .iter()
                                .map(|f| pr[f.child.value()])
                                .filter(|v| *v != f64::NEG_INFINITY)
                                .sum(),
                            _ => f64::NEG_INFINITY,
                        };
                        dr[c] = log_add(dr[c], dr[i] + other);
                    }
                }
            }
        }
        dr
    }

    /// Projects node derivatives down to variable states: for every terminal,
    /// its credit is accumulated into its `(var, value)` slot.
    pub fn marginals(&self, ind: &Indicator) -> Marginals {
        let dr = self.derivative(ind);
        let mut d: Vec<Vec<f64>> = self
            .schema()
            .iter()
            .map(|&card| vec![f64::NEG_INFINITY; card])
            .collect();
        for (i, node) in self.nodes().enumerate() {
            if let Node::Trm(t) = node {
                let slot = &mut d[t.var.value_usize()][t.value];
                *slot = log_add(*slot, dr[i]);
            }
        }
        Marginals { d }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::spn::Spn;
    use quickcheck::quickcheck;

    /// Reference evaluator: recursive, memo-free except for the call arena.
    fn eval_reference(spn: &Spn, ind: &Indicator, at: usize) -> f64 {
        match spn.node(NodeIndex::new(at)) {
            Node::Trm(t) => ind.weight(t.var, t.value).ln(),
            Node::Sum(s) => log_sum_exp_by(s.edges.len(), |k| {
                s.edges[k].weight + eval_reference(spn, ind, s.edges[k].child.value())
            }),
            Node::Prd(p) => p
                .edges
                .iter()
                .map(|e| eval_reference(spn, ind, e.child.value()))
                .sum(),
        }
    }

    fn all_assignments(num_vars: usize) -> Vec<Vec<usize>> {
        (0..1usize << num_vars)
            .map(|bits| (0..num_vars).map(|v| (bits >> v) & 1).collect())
            .collect()
    }

    #[test]
    fn test_eval_two_var_product() {
        let spn = Spn::from_string(&format!(
            "(2 2)\nv 0 0\nv 0 1\n+ 0 {} 1 {}\nv 1 0\nv 1 1\n+ 3 {} 4 {}\n* 2 5\nEOF\n",
            0.6f64.ln(),
            0.4f64.ln(),
            0.8f64.ln(),
            0.2f64.ln()
        ));
        let p = spn.eval_total(&[0, 0]);
        assert!((p - (0.6f64.ln() + 0.8f64.ln())).abs() < 1e-12);
        // the partition of a normalised network is 1
        assert!(spn.partition()[spn.root().value()].abs() < 1e-12);
    }

    #[test]
    fn test_eval_total_matches_indicator_eval() {
        let spn = Spn::from_string(&format!(
            "(2)\nv 0 0\nv 0 1\n+ 1 {} 0 {}\nEOF\n",
            0.7f64.ln(),
            0.3f64.ln()
        ));
        let ind = Indicator::from_total(&[1], spn.schema());
        assert_eq!(spn.eval_total(&[1]), spn.eval(&ind)[spn.root().value()]);
    }

    #[test]
    fn test_eval_prefix_bounds_completions() {
        let spn = Spn::from_string(&format!(
            "(2 2)\nv 0 0\nv 0 1\n+ 0 {} 1 {}\nv 1 0\nv 1 1\n+ 3 {} 4 {}\n* 2 5\nEOF\n",
            0.6f64.ln(),
            0.4f64.ln(),
            0.8f64.ln(),
            0.2f64.ln()
        ));
        let bound = spn.eval_prefix(&[1, 0], 1);
        for x1 in 0..2 {
            assert!(spn.eval_total(&[1, x1]) <= bound + 1e-12);
        }
    }

    quickcheck! {
        fn prop_eval_matches_reference(spn: Spn) -> bool {
            let ind = Indicator::all_ones(spn.schema());
            let val = spn.eval(&ind);
            let root = spn.root().value();
            (val[root] - eval_reference(&spn, &ind, root)).abs() < 1e-9
        }

        fn prop_derivative_bounds_completions(spn: Spn) -> bool {
            let m = spn.marginals(&Indicator::all_ones(spn.schema()));
            all_assignments(spn.num_vars()).iter().all(|x| {
                let p = spn.eval_total(x);
                (0..spn.num_vars()).all(|v| {
                    p <= m.get(VarLabel::new_usize(v), x[v]) + 1e-9
                })
            })
        }

        fn prop_derivative_of_total_is_exact_on_flips(spn: Spn) -> bool {
            // with a one-hot indicator, the credit at a terminal that
            // disagrees with x equals the value of x with that bit flipped
            let x: Vec<usize> = vec![0; spn.num_vars()];
            let dr = spn.derivative(&Indicator::from_total(&x, spn.schema()));
            spn.nodes().enumerate().all(|(i, node)| match node {
                Node::Trm(t) if x[t.var.value_usize()] != t.value => {
                    let mut flipped = x.clone();
                    flipped[t.var.value_usize()] = t.value;
                    let p = spn.eval_total(&flipped);
                    p == f64::NEG_INFINITY && dr[i] == f64::NEG_INFINITY
                        || (dr[i] - p).abs() < 1e-9
                }
                _ => true,
            })
        }
    }

    #[test]
    fn test_derivative_shared_children() {
        // two mixture branches over x0 share all four leaves of (x1, x2)
        let spn = Spn::from_string(&format!(
            concat!(
                "(2 2 2)\n",
                "v 0 0\nv 0 1\n",
                "v 1 0\nv 1 1\n",
                "v 2 0\nv 2 1\n",
                "+ 2 {} 3 {}\n",
                "+ 4 {} 5 {}\n",
                "+ 2 {} 3 {}\n",
                "+ 4 {} 5 {}\n",
                "* 0 6 7\n",
                "* 1 8 9\n",
                "+ 10 {} 11 {}\n",
                "EOF\n"
            ),
            0.9f64.ln(),
            0.1f64.ln(),
            0.2f64.ln(),
            0.8f64.ln(),
            0.3f64.ln(),
            0.7f64.ln(),
            0.6f64.ln(),
            0.4f64.ln(),
            0.5f64.ln(),
            0.5f64.ln()
        ));
        let m = spn.marginals(&Indicator::all_ones(spn.schema()));
        for x in all_assignments(3) {
            let p = spn.eval_total(&x);
            for v in 0..3 {
                assert!(
                    p <= m.get(VarLabel::new_usize(v), x[v]) + 1e-9,
                    "bound violated at {:?} var {}",
                    x,
                    v
                );
            }
        }
    }

    #[test]
    fn test_derivative_zero_product_children() {
        // clamping x0 = 1 zeroes the x0=0 terminal; the product above it must
        // route no credit through the impossible branch
        let spn = Spn::from_string(&format!(
            "(2 2)\nv 0 0\nv 1 0\nv 1 1\n+ 1 {} 2 {}\n* 0 3\nv 0 1\nv 1 0\nv 1 1\n+ 6 {} 7 {}\n* 5 8\n+ 4 {} 9 {}\nEOF\n",
            0.5f64.ln(),
            0.5f64.ln(),
            0.9f64.ln(),
            0.1f64.ln(),
            0.4f64.ln(),
            0.6f64.ln()
        ));
        let mut x = PartialAssignment::unassigned(2);
        x.set(VarLabel::new(0), 1);
        let dr = spn.derivative(&Indicator::from_partial(&x, spn.schema()));
        assert!(dr.iter().all(|d| !d.is_nan()));
        // the whole x0=0 branch is dead
        assert_eq!(dr[3], f64::NEG_INFINITY);
    }

    #[test]
    fn test_eval_at_uses_hard_indicators() {
        let spn = Spn::from_string(&format!(
            "(2)\nv 0 0\nv 0 1\n+ 1 {} 0 {}\nEOF\n",
            0.7f64.ln(),
            0.3f64.ln()
        ));
        let mut x = PartialAssignment::unassigned(1);
        x.set(VarLabel::new(0), 1);
        let p = spn.eval_at(&x, spn.root());
        assert!((p - 0.7f64.ln()).abs() < 1e-12);
        // a free variable reads as "matches nothing"
        let free = PartialAssignment::unassigned(1);
        assert_eq!(spn.eval_at(&free, spn.root()), f64::NEG_INFINITY);
    }
}
