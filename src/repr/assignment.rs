//! Assignments to network variables: dense indicator vectors, partial
//! instantiations, and specialisation queries.

use crate::repr::var_label::VarLabel;

/// A dense indicator vector: one weight in `[0, 1]` per state of each
/// variable. An all-ones row marginalises a variable, a one-hot row clamps
/// it. This is the input shape of the forward and backward passes.
#[derive(Debug, Clone, PartialEq)]
pub struct Indicator {
    weights: Vec<Vec<f64>>,
}

impl Indicator {
    /// Every state of every variable switched on (the partition-function
    /// input).
    pub fn all_ones(schema: &[usize]) -> Indicator {
        Indicator {
            weights: schema.iter().map(|&card| vec![1.0; card]).collect(),
        }
    }

    /// One-hot rows for a total assignment.
    pub fn from_total(x: &[usize], schema: &[usize]) -> Indicator {
        let mut ind = Indicator {
            weights: schema.iter().map(|&card| vec![0.0; card]).collect(),
        };
        for (i, &xi) in x.iter().enumerate() {
            ind.weights[i][xi] = 1.0;
        }
        ind
    }

    /// Variables below `fixed` are clamped to `x`; the rest stay free. The
    /// root value under this indicator is an optimistic bound on any
    /// completion of the prefix.
    pub fn from_prefix(x: &[usize], fixed: usize, schema: &[usize]) -> Indicator {
        let mut ind = Indicator::all_ones(schema);
        for i in 0..fixed {
            for v in 0..schema[i] {
                ind.weights[i][v] = if v == x[i] { 1.0 } else { 0.0 };
            }
        }
        ind
    }

    /// One-hot rows for assigned variables, all-ones rows for free ones.
    pub fn from_partial(x: &PartialAssignment, schema: &[usize]) -> Indicator {
        let mut ind = Indicator {
            weights: schema.iter().map(|&card| vec![0.0; card]).collect(),
        };
        for i in 0..x.len() {
            match x.get(VarLabel::new_usize(i)) {
                Some(v) => ind.weights[i][v] = 1.0,
                None => ind.weights[i].iter_mut().for_each(|w| *w = 1.0),
            }
        }
        ind
    }

    #[inline]
    pub fn weight(&self, var: VarLabel, value: usize) -> f64 {
        self.weights[var.value_usize()][value]
    }

    /// Switches a single state off. Used by forward checking to retract a
    /// pruned branch without rebuilding the indicator.
    pub fn clear(&mut self, var: VarLabel, value: usize) {
        self.weights[var.value_usize()][value] = 0.0;
    }
}

/// A possibly-partial instantiation of the network variables; `None` marks a
/// free variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAssignment {
    assignments: Vec<Option<usize>>,
}

impl PartialAssignment {
    pub fn unassigned(num_vars: usize) -> PartialAssignment {
        PartialAssignment {
            assignments: vec![None; num_vars],
        }
    }

    pub fn from_total(x: &[usize]) -> PartialAssignment {
        PartialAssignment {
            assignments: x.iter().map(|&v| Some(v)).collect(),
        }
    }

    pub fn set(&mut self, var: VarLabel, value: usize) {
        self.assignments[var.value_usize()] = Some(value);
    }

    pub fn get(&self, var: VarLabel) -> Option<usize> {
        self.assignments[var.value_usize()]
    }

    pub fn is_set(&self, var: VarLabel) -> bool {
        self.assignments[var.value_usize()].is_some()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn num_free(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_none()).count()
    }

    pub fn first_free(&self) -> Option<VarLabel> {
        self.assignments
            .iter()
            .position(|a| a.is_none())
            .map(VarLabel::new_usize)
    }

    /// Adopts every assigned entry of `other`. Callers merging product
    /// children rely on decomposability, so the assigned scopes are disjoint
    /// and the order of merging does not matter.
    pub fn union(&mut self, other: &PartialAssignment) {
        for (i, a) in other.assignments.iter().enumerate() {
            if a.is_some() {
                self.assignments[i] = *a;
            }
        }
    }

    pub fn as_slice(&self) -> &[Option<usize>] {
        &self.assignments
    }
}

/// Role of one variable in a specialisation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVar {
    /// Keep only this state's indicator; the variable folds away.
    Clamped(usize),
    /// Leave the variable in the specialised network (maximised over later).
    Maximize,
    /// Keep every state's indicator on; the variable is summed out.
    Marginalize,
}

/// A specialisation query over all network variables, built either from the
/// textual `{'0','1','?','*'}` alphabet or from a partial assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    vars: Vec<QueryVar>,
}

impl Query {
    /// Parses a query string: `'0'`/`'1'` clamp, `'?'` maximises, `'*'` sums
    /// the variable out. Panics on any other byte.
    pub fn from_string(q: &str) -> Query {
        let vars = q
            .bytes()
            .map(|b| match b {
                b'0' => QueryVar::Clamped(0),
                b'1' => QueryVar::Clamped(1),
                b'?' => QueryVar::Maximize,
                b'*' => QueryVar::Marginalize,
                other => panic!("invalid query byte {:?}", other as char),
            })
            .collect();
        Query { vars }
    }

    /// Free variables of the partial assignment become [`QueryVar::Maximize`].
    pub fn from_partial(x: &PartialAssignment) -> Query {
        let vars = x
            .as_slice()
            .iter()
            .map(|a| match a {
                Some(v) => QueryVar::Clamped(*v),
                None => QueryVar::Maximize,
            })
            .collect();
        Query { vars }
    }

    pub fn get(&self, var: VarLabel) -> QueryVar {
        self.vars[var.value_usize()]
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> &[QueryVar] {
        &self.vars
    }
}

#[test]
fn test_indicator_from_partial() {
    let mut x = PartialAssignment::unassigned(3);
    x.set(VarLabel::new(1), 1);
    let ind = Indicator::from_partial(&x, &[2, 2, 2]);
    assert_eq!(ind.weight(VarLabel::new(0), 0), 1.0);
    assert_eq!(ind.weight(VarLabel::new(0), 1), 1.0);
    assert_eq!(ind.weight(VarLabel::new(1), 0), 0.0);
    assert_eq!(ind.weight(VarLabel::new(1), 1), 1.0);
}

#[test]
fn test_indicator_prefix() {
    let ind = Indicator::from_prefix(&[1, 0], 1, &[2, 2]);
    assert_eq!(ind.weight(VarLabel::new(0), 0), 0.0);
    assert_eq!(ind.weight(VarLabel::new(0), 1), 1.0);
    assert_eq!(ind.weight(VarLabel::new(1), 0), 1.0);
    assert_eq!(ind.weight(VarLabel::new(1), 1), 1.0);
}

#[test]
fn test_query_parse() {
    let q = Query::from_string("01?*");
    assert_eq!(q.get(VarLabel::new(0)), QueryVar::Clamped(0));
    assert_eq!(q.get(VarLabel::new(1)), QueryVar::Clamped(1));
    assert_eq!(q.get(VarLabel::new(2)), QueryVar::Maximize);
    assert_eq!(q.get(VarLabel::new(3)), QueryVar::Marginalize);
}

#[test]
#[should_panic]
fn test_query_parse_rejects_garbage() {
    Query::from_string("0x1");
}

#[test]
fn test_partial_union_prefers_assigned() {
    let mut a = PartialAssignment::unassigned(3);
    a.set(VarLabel::new(0), 1);
    let mut b = PartialAssignment::unassigned(3);
    b.set(VarLabel::new(2), 0);
    a.union(&b);
    assert_eq!(a.get(VarLabel::new(0)), Some(1));
    assert_eq!(a.get(VarLabel::new(1)), None);
    assert_eq!(a.get(VarLabel::new(2)), Some(0));
    assert_eq!(a.num_free(), 1);
    assert_eq!(a.first_free(), Some(VarLabel::new(1)));
}
