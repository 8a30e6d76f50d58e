//! # nestdag - Hierarchical simulation over Bayesian networks
//!
//! nestdag compiles a Bayesian network together with a declared hierarchy of
//! population levels into a simulation engine. Each level decides which
//! network nodes are drawn once per instance (fixed) and which are resampled
//! per child (floating); the engine works out the rest.
//!
//! ## Core Concepts
//!
//! - **Loci**: a typed network node (Value, ExoValue, Function, Distribution, Pseudo)
//! - **BayesianNetwork**: an acyclic network of loci with cached orderings
//! - **NodeSet**: one level of the declared hierarchy, resolved by `inject_bn`
//! - **SimulationCore**: the resolved hierarchy compiled into simulation groups
//! - **ParameterTree**: the live tree of instantiated parameter cores
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use indexmap::IndexMap;
//! use nestdag::{bayes_net_from_script, Impulse, NodeSet, Registry, SimulationConfig, SimulationCore};
//!
//! let bn = bayes_net_from_script(
//!     "PCore chain { a = 1; b = a + 3; c = b * 2; d ~ binom(b, 0.5); e = d + c }",
//!     Arc::new(Registry::standard()),
//! )?;
//!
//! let mut root = NodeSet::new("root").with_fixed(["a"]);
//! let med = root.add_child(NodeSet::new("med").with_fixed(["b"]).with_floating(["d"]))?;
//! med.add_child(NodeSet::new("leaf").with_fixed(["e"]))?;
//!
//! let core = Arc::new(SimulationCore::new(Arc::new(bn), root, SimulationConfig::seeded(7))?);
//! let mut tree = core.generate("world", &IndexMap::<String, f64>::new())?;
//! let med = tree.breed(tree.root(), "m1", "med")?;
//! tree.impulse(tree.root(), &Impulse::set([("a", 7.0)]))?;
//! assert_eq!(tree.value(med, "b"), Some(10.0));
//! # Ok::<(), nestdag::NestError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Foundations
pub mod config;
pub mod env;
pub mod error;
pub mod registry;

// Collaborators: expressions and distributions
pub mod distribution;
pub mod expr;

// Network, hierarchy, runtime
pub mod hierarchy;
pub mod model;
pub mod network;
pub mod simulation;

// Re-export primary types at crate root for convenience
pub use config::SimulationConfig;
pub use distribution::{Distribution, DistributionRegistry};
pub use env::{Empty, Layered, Lookup};
pub use error::{ExecutionError, NestError, NestResult, ValidationError};
pub use expr::{FunctionRegistry, MathExpression};
pub use hierarchy::{ActorBlueprint, BlueprintKind, NodeSet, ResolvedLevel};
pub use model::{BayesianModel, HierarchicalModel};
pub use network::{bayes_net_from_script, BayesianNetwork, Dag, Loci, LociKind, NetworkJson};
pub use registry::Registry;
pub use simulation::{Actor, Impulse, ParameterCore, ParameterTree, PcId, SimulationCore, SimulationGroup};
