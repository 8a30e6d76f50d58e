//! Simulation runtime.
//!
//! [`SimulationCore`] compiles a resolved hierarchy into one
//! [`SimulationGroup`] per level. Generating from the core yields a
//! [`ParameterTree`] of live [`ParameterCore`]s that breed children, sample
//! floating nodes through [`Actor`]s, and absorb [`Impulse`]s.

pub mod actor;
pub mod simcore;
pub mod group;
pub mod parcore;

pub use actor::Actor;
pub use simcore::{SimulationCore, DEFAULT_ROOT};
pub use group::{Generated, SimulationGroup};
pub use parcore::{Impulse, ParameterCore, ParameterTree, PcId};
