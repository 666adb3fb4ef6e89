//! Specialising a network to a query: clamped and summed-out variables fold
//! into constant weights, maximised variables survive with remapped labels.
//!
//! The specialised network computes, over the surviving variables, exactly
//! the value the original root computes with the folded variables' indicators
//! clamped (or all-on for summed-out variables). Exact solvers use this to
//! stage a shrinking search; MAP-to-MAX preprocessing uses it to fold a query
//! string before solving.

use crate::repr::assignment::{Query, QueryVar};
use crate::repr::spn::{Node, Prd, PrdEdge, Spn, Sum, SumEdge, Trm};
use crate::repr::var_label::{NodeIndex, VarLabel};
use crate::util::logsumexp::log_sum_exp_by;

impl Spn {
    /// Folds a query into the network, producing a new network over only the
    /// maximised variables.
    ///
    /// Each original node either survives (gets a densely reassigned id in
    /// the new arena) or collapses to a scalar log-weight:
    /// - a terminal on a surviving variable is kept with a remapped label;
    /// - a terminal on a clamped variable folds to `0` when it matches the
    ///   clamp and `-inf` otherwise; on a summed-out variable it folds to `0`
    ///   unconditionally;
    /// - a sum whose children all collapsed folds to the log-sum-exp of its
    ///   shifted weights; otherwise its surviving edges absorb their child's
    ///   collapsed weight;
    /// - a product accumulates its collapsed children's weights and survives
    ///   if any child survived.
    ///
    /// The new root is always a sum: a surviving non-sum root is wrapped in a
    /// one-edge sum carrying its residual weight.
    ///
    /// Panics if the query maximises no variable or the whole network folds
    /// away; callers must leave at least one variable free.
    pub fn condition(&self, q: &Query) -> Spn {
        assert_eq!(
            q.len(),
            self.num_vars(),
            "query length must match the variable count"
        );
        let mut var_map: Vec<Option<VarLabel>> = vec![None; self.num_vars()];
        let mut schema = Vec::new();
        for (i, mark) in q.vars().iter().enumerate() {
            if *mark == QueryVar::Maximize {
                var_map[i] = Some(VarLabel::new_usize(schema.len()));
                schema.push(self.schema()[i]);
            }
        }
        assert!(!schema.is_empty(), "query maximises no variable");

        let mut nodes: Vec<Node> = Vec::with_capacity(self.num_nodes() + 1);
        let mut new_ids: Vec<Option<NodeIndex>> = vec![None; self.num_nodes()];
        let mut we = vec![0.0; self.num_nodes()];
        for (i, node) in self.nodes().enumerate() {
            match node {
                Node::Trm(t) => match q.get(t.var) {
                    QueryVar::Maximize => {
                        nodes.push(Node::Trm(Trm {
                            var: var_map[t.var.value_usize()].unwrap(),
                            value: t.value,
                        }));
                        new_ids[i] = Some(NodeIndex::new(nodes.len() - 1));
                    }
                    QueryVar::Clamped(v) => {
                        we[i] = if t.value == v { 0.0 } else { f64::NEG_INFINITY };
                    }
                    QueryVar::Marginalize => {
                        we[i] = 0.0;
                    }
                },
                Node::Sum(s) => {
                    // completeness makes the first child representative: its
                    // siblings collapse exactly when it does
                    if new_ids[s.edges[0].child.value()].is_none() {
                        we[i] = log_sum_exp_by(s.edges.len(), |k| {
                            s.edges[k].weight + we[s.edges[k].child.value()]
                        });
                    } else {
                        let edges = s
                            .edges
                            .iter()
                            .filter_map(|e| {
                                new_ids[e.child.value()].map(|child| SumEdge {
                                    weight: e.weight + we[e.child.value()],
                                    child,
                                })
                            })
                            .collect();
                        nodes.push(Node::Sum(Sum { edges }));
                        new_ids[i] = Some(NodeIndex::new(nodes.len() - 1));
                    }
                }
                Node::Prd(p) => {
                    let mut w = 0.0;
                    let mut edges = Vec::new();
                    for e in &p.edges {
                        w += we[e.child.value()];
                        if let Some(child) = new_ids[e.child.value()] {
                            edges.push(PrdEdge { child });
                        }
                    }
                    we[i] = w;
                    if !edges.is_empty() {
                        nodes.push(Node::Prd(Prd { edges }));
                        new_ids[i] = Some(NodeIndex::new(nodes.len() - 1));
                    }
                }
            }
        }

        let root = self.root().value();
        match new_ids[root] {
            Some(id) if matches!(nodes[id.value()], Node::Sum(_)) => {}
            Some(id) => {
                nodes.push(Node::Sum(Sum {
                    edges: vec![SumEdge {
                        weight: we[root],
                        child: id,
                    }],
                }));
            }
            None => panic!("conditioned network collapsed to a constant"),
        }
        Spn::new(nodes, schema)
    }
}
