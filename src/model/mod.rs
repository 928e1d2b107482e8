//! Scoring engine: a portable gradient-boosted tree ensemble.

pub mod ensemble;
pub mod file;

pub use ensemble::{Node, Tree, TreeEnsemble, logistic, logit};
