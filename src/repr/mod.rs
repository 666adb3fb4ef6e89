//! Core datastructures for representing sum-product networks, variable
//! labels, and assignments to network variables
pub mod assignment;
pub mod spn;
pub mod var_label;
