//! Labels for network variables and arena positions of nodes
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A label for a distinct variable of the network
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
pub struct VarLabel(u64);

impl VarLabel {
    #[inline]
    pub fn new(v: u64) -> VarLabel {
        VarLabel(v)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn new_usize(v: usize) -> VarLabel {
        VarLabel(v as u64)
    }

    pub fn value_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for VarLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}", self.0)
    }
}

/// Position of a node in the topological ordering of an [`crate::repr::spn::Spn`]
/// arena. Edges always point at strictly lower indices, and the last index is
/// the root.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    #[inline]
    pub fn new(v: usize) -> NodeIndex {
        NodeIndex(v)
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}
