//! The sum-product network representation: a topologically ordered arena of
//! terminal, sum, and product nodes, plus the line-oriented text format the
//! networks are distributed in.

use crate::repr::var_label::{NodeIndex, VarLabel};
use itertools::Itertools;
use quickcheck::{Arbitrary, Gen};
use std::fmt::{self, Display};
use std::fs;

/// An indicator terminal for `var = value`. Its log-value under an indicator
/// vector `ass` is `ln(ass[var][value])`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trm {
    pub var: VarLabel,
    pub value: usize,
}

/// A weighted edge of a sum node. The weight is already in the log domain and
/// the weights of a node need not be normalised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SumEdge {
    pub weight: f64,
    pub child: NodeIndex,
}

/// An edge of a product node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrdEdge {
    pub child: NodeIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sum {
    pub edges: Vec<SumEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prd {
    pub edges: Vec<PrdEdge>,
}

/// A node of the network. The variant set is closed; consumers match on it
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Trm(Trm),
    Sum(Sum),
    Prd(Prd),
}

/// An immutable sum-product network over integer-valued variables.
///
/// Nodes live in a contiguous arena in topological order: every edge points
/// at a strictly lower index, node ids equal arena positions, and the last
/// node is the root. The arena is a DAG, not a tree; children may be shared
/// between parents.
#[derive(Debug, Clone, PartialEq)]
pub struct Spn {
    nodes: Vec<Node>,
    schema: Vec<usize>,
}

impl Spn {
    /// Builds a network from an ordered node list and a per-variable
    /// cardinality schema. Panics if the topological-order invariant or the
    /// terminal bounds are violated; a malformed network is a programmer
    /// error, not a runtime condition.
    pub fn new(nodes: Vec<Node>, schema: Vec<usize>) -> Spn {
        assert!(!nodes.is_empty(), "a network needs at least one node");
        for (i, node) in nodes.iter().enumerate() {
            match node {
                Node::Trm(t) => {
                    assert!(
                        t.var.value_usize() < schema.len(),
                        "terminal {} references unknown variable {}",
                        i,
                        t.var
                    );
                    assert!(
                        t.value < schema[t.var.value_usize()],
                        "terminal {} state {} out of range for {}",
                        i,
                        t.value,
                        t.var
                    );
                }
                Node::Sum(s) => {
                    assert!(!s.edges.is_empty(), "sum node {} has no edges", i);
                    for e in &s.edges {
                        assert!(e.child.value() < i, "edge of node {} points forward", i);
                    }
                }
                Node::Prd(p) => {
                    assert!(!p.edges.is_empty(), "product node {} has no edges", i);
                    for e in &p.edges {
                        assert!(e.child.value() < i, "edge of node {} points forward", i);
                    }
                }
            }
        }
        Spn { nodes, schema }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_vars(&self) -> usize {
        self.schema.len()
    }

    pub fn schema(&self) -> &[usize] {
        &self.schema
    }

    /// The root is always the last node of the arena.
    pub fn root(&self) -> NodeIndex {
        NodeIndex::new(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeIndex) -> &Node {
        &self.nodes[id.value()]
    }

    /// Nodes in topological (id) order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Loads a network from the line-oriented text format:
    ///
    /// ```text
    /// (2 2 2)
    /// v 0 0
    /// v 0 1
    /// + 1 -0.35 0 -1.20
    /// EOF
    /// ```
    ///
    /// The first line is the schema, each following line one node in
    /// topological order (`v var value`, `+ id w id w ...`, `* id id ...`),
    /// and the final `EOF` line ends the network; trailing content after it
    /// is ignored. Panics on malformed input.
    pub fn from_string(input: &str) -> Spn {
        let lines: Vec<&str> = input.lines().collect();
        let end = lines
            .iter()
            .rposition(|l| l.trim_end() == "EOF")
            .expect("network file has no EOF line");
        let header = lines
            .first()
            .expect("network file is empty")
            .trim();
        assert!(
            header.starts_with('(') && header.ends_with(')'),
            "schema line must be parenthesised, got {:?}",
            header
        );
        let schema: Vec<usize> = header[1..header.len() - 1]
            .split_whitespace()
            .map(parse_usize)
            .collect();

        let mut nodes = Vec::with_capacity(end.saturating_sub(1));
        for ln in &lines[1..end] {
            let toks: Vec<&str> = ln.split_whitespace().collect();
            let node = match toks[0] {
                "v" => Node::Trm(Trm {
                    var: VarLabel::new_usize(parse_usize(toks[1])),
                    value: parse_usize(toks[2]),
                }),
                "+" => {
                    let edges = toks[1..]
                        .iter()
                        .copied()
                        .tuples()
                        .map(|(id, w)| SumEdge {
                            weight: parse_f64(w),
                            child: NodeIndex::new(parse_usize(id)),
                        })
                        .collect();
                    Node::Sum(Sum { edges })
                }
                "*" => {
                    let edges = toks[1..]
                        .iter()
                        .copied()
                        .map(|id| PrdEdge {
                            child: NodeIndex::new(parse_usize(id)),
                        })
                        .collect();
                    Node::Prd(Prd { edges })
                }
                other => panic!("unknown node tag {:?}", other),
            };
            nodes.push(node);
        }
        Spn::new(nodes, schema)
    }

    pub fn from_file(path: &str) -> Spn {
        let contents = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read {}: {}", path, e));
        Spn::from_string(&contents)
    }
}

fn parse_usize(s: &str) -> usize {
    s.parse()
        .unwrap_or_else(|e| panic!("bad integer {:?}: {}", s, e))
}

fn parse_f64(s: &str) -> f64 {
    s.parse()
        .unwrap_or_else(|e| panic!("bad float {:?}: {}", s, e))
}

impl Display for Spn {
    /// Writes the network back in the text format it is loaded from.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "({})", self.schema.iter().join(" "))?;
        for node in &self.nodes {
            match node {
                Node::Trm(t) => writeln!(f, "v {} {}", t.var.value(), t.value)?,
                Node::Sum(s) => {
                    write!(f, "+")?;
                    for e in &s.edges {
                        write!(f, " {} {}", e.child.value(), e.weight)?;
                    }
                    writeln!(f)?;
                }
                Node::Prd(p) => {
                    write!(f, "*")?;
                    for e in &p.edges {
                        write!(f, " {}", e.child.value())?;
                    }
                    writeln!(f)?;
                }
            }
        }
        writeln!(f, "EOF")
    }
}

impl Arbitrary for Spn {
    /// Generates a small random network over a binary schema that is complete
    /// (every sum child covers the same scope) and decomposable (product
    /// children cover disjoint scopes), with terminal nodes shared between
    /// mixture branches so the DAG is not a tree.
    fn arbitrary(g: &mut Gen) -> Spn {
        let num_vars = 1 + usize::arbitrary(g) % 5;
        let mut nodes = Vec::new();
        let mut terminals = Vec::with_capacity(num_vars);
        for v in 0..num_vars {
            let lo = NodeIndex::new(nodes.len());
            nodes.push(Node::Trm(Trm {
                var: VarLabel::new_usize(v),
                value: 0,
            }));
            let hi = NodeIndex::new(nodes.len());
            nodes.push(Node::Trm(Trm {
                var: VarLabel::new_usize(v),
                value: 1,
            }));
            terminals.push((lo, hi));
        }
        let scope: Vec<usize> = (0..num_vars).collect();
        gen_scope(g, &mut nodes, &terminals, &scope, 2);
        Spn::new(nodes, vec![2; num_vars])
    }
}

/// Appends a subnetwork covering `scope` and returns its root index. `depth`
/// bounds how many same-scope mixture layers may stack before the scope is
/// forced to split.
fn gen_scope(
    g: &mut Gen,
    nodes: &mut Vec<Node>,
    terminals: &[(NodeIndex, NodeIndex)],
    scope: &[usize],
    depth: usize,
) -> NodeIndex {
    if scope.len() == 1 {
        let (lo, hi) = terminals[scope[0]];
        nodes.push(Node::Sum(Sum {
            edges: vec![
                SumEdge {
                    weight: arbitrary_log_weight(g),
                    child: lo,
                },
                SumEdge {
                    weight: arbitrary_log_weight(g),
                    child: hi,
                },
            ],
        }));
        return NodeIndex::new(nodes.len() - 1);
    }
    if depth > 0 && bool::arbitrary(g) {
        // a mixture of two components over the same scope
        let a = gen_scope(g, nodes, terminals, scope, depth - 1);
        let b = gen_scope(g, nodes, terminals, scope, depth - 1);
        nodes.push(Node::Sum(Sum {
            edges: vec![
                SumEdge {
                    weight: arbitrary_log_weight(g),
                    child: a,
                },
                SumEdge {
                    weight: arbitrary_log_weight(g),
                    child: b,
                },
            ],
        }));
    } else {
        let cut = 1 + usize::arbitrary(g) % (scope.len() - 1);
        let l = gen_scope(g, nodes, terminals, &scope[..cut], depth);
        let r = gen_scope(g, nodes, terminals, &scope[cut..], depth);
        nodes.push(Node::Prd(Prd {
            edges: vec![PrdEdge { child: l }, PrdEdge { child: r }],
        }));
    }
    NodeIndex::new(nodes.len() - 1)
}

fn arbitrary_log_weight(g: &mut Gen) -> f64 {
    let percent = 1 + u8::arbitrary(g) % 99;
    (percent as f64 / 100.0).ln()
}

#[test]
fn test_parse_minimal() {
    let spn = Spn::from_string("(2)\nv 0 0\nv 0 1\n+ 1 -0.5 0 -1.5\nEOF\n");
    assert_eq!(spn.num_nodes(), 3);
    assert_eq!(spn.num_vars(), 1);
    assert_eq!(spn.root(), NodeIndex::new(2));
    match spn.node(spn.root()) {
        Node::Sum(s) => {
            assert_eq!(s.edges.len(), 2);
            assert_eq!(s.edges[0].child, NodeIndex::new(1));
            assert_eq!(s.edges[0].weight, -0.5);
        }
        _ => panic!("root should be a sum"),
    }
}

#[test]
fn test_parse_ignores_content_after_eof() {
    let spn = Spn::from_string("(2)\nv 0 0\nv 0 1\n+ 0 -0.1 1 -0.2\nEOF\ntrailing junk\n");
    assert_eq!(spn.num_nodes(), 3);
}

#[test]
fn test_display_round_trips() {
    let text = "(2 2)\nv 0 0\nv 0 1\n+ 0 -0.2 1 -1.7\nv 1 0\nv 1 1\n+ 3 -0.9 4 -0.5\n* 2 5\nEOF\n";
    let spn = Spn::from_string(text);
    let reparsed = Spn::from_string(&spn.to_string());
    assert_eq!(spn, reparsed);
}

#[test]
#[should_panic]
fn test_forward_edge_rejected() {
    Spn::new(
        vec![
            Node::Sum(Sum {
                edges: vec![SumEdge {
                    weight: 0.0,
                    child: NodeIndex::new(1),
                }],
            }),
            Node::Trm(Trm {
                var: VarLabel::new(0),
                value: 0,
            }),
        ],
        vec![2],
    );
}

#[test]
fn test_arbitrary_is_topological() {
    let mut g = Gen::new(40);
    for _ in 0..50 {
        let spn = Spn::arbitrary(&mut g);
        // Spn::new validated ordering; spot-check the root covers every variable
        assert!(spn.num_nodes() >= 2 * spn.num_vars() + 1);
    }
}
