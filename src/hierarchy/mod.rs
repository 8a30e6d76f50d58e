//! Hierarchy declaration and resolution.
//!
//! A [`NodeSet`] tree declares which network nodes each level of a simulated
//! population draws once per instance and which it resamples per child.
//! [`NodeSet::inject_bn`] resolves the declarations against a frozen network
//! into fixed, floating, exogenous, and listening sets plus an
//! [`ActorBlueprint`] for every floating node.

pub mod blueprint;
pub mod nodeset;
mod resolve;

pub use blueprint::{ActorBlueprint, BlueprintKind};
pub use nodeset::{NodeSet, ResolvedLevel};
