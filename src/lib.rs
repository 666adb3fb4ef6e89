//! `rspn` is a library for answering most-probable-explanation (MPE) queries
//! over sum-product networks: given a network representing a joint
//! distribution as a DAG of sum, product, and indicator nodes, find the
//! complete assignment with the highest log-probability.
//!
//! The crate is organised around an immutable, topologically ordered node
//! arena ([`repr::spn::Spn`]). On top of it sit the log-domain forward and
//! backward passes ([`eval`]), a specialisation operation that folds a
//! partial assignment into constant weights ([`condition`]), a family of
//! approximate solvers, and branch-and-bound exact solvers ([`solver`]).
pub mod condition;
pub mod eval;
pub mod repr;
pub mod solver;
pub mod util;
