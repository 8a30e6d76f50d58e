//! Bayesian network model: loci, the dependency graph, and the readers.

pub mod bayesnet;
pub mod dag;
pub mod loci;
pub mod script;

pub use bayesnet::{BayesianNetwork, NetworkJson, NetworkSample};
pub use dag::Dag;
pub use loci::{Definition, DistributionCall, Loci, LociJson, LociKind};
pub use script::{bayes_net_from_script, parse_statement};
