//! Live samplers for floating nodes.

use indexmap::IndexMap;
use rand::Rng;
use tracing::debug;

use crate::distribution::Distribution;
use crate::env::{Layered, Lookup};
use crate::error::{ExecutionError, NestResult};
use crate::hierarchy::{ActorBlueprint, BlueprintKind};
use crate::network::{BayesianNetwork, LociKind};

/// A realized [`ActorBlueprint`].
///
/// Actors read their inputs from the environment they are called with, which
/// is the chain of parameter cores above the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    /// Distribution evaluated once against fixed parents.
    ///
    /// A missing input at compose time is kept and reported on every draw
    /// until an update supplies it.
    Frozen {
        /// Target node.
        name: String,
        /// Parents the distribution was evaluated against.
        to_read: Vec<String>,
        /// Cached distribution.
        dist: Result<Distribution, ExecutionError>,
    },
    /// Parents read on every call; nothing resampled.
    Single {
        /// Target node.
        name: String,
        /// Parents read from the caller.
        to_read: Vec<String>,
    },
    /// Chain resampled into a scratch layer on every call.
    Compound {
        /// Target node.
        name: String,
        /// Inputs read from the caller.
        to_read: Vec<String>,
        /// Ancestors drawn fresh before the target, in order.
        to_sample: Vec<String>,
    },
}

impl Actor {
    /// Realize `blueprint` against `env`.
    ///
    /// # Errors
    ///
    /// Returns `PseudoNotRealizable` for Pseudo targets, `UnknownNode` for
    /// names missing from `bn`, and any non-missing-input evaluation error of
    /// a Frozen target.
    pub fn compose(blueprint: &ActorBlueprint, bn: &BayesianNetwork, env: &dyn Lookup) -> NestResult<Self> {
        let loci = bn.loci(&blueprint.name)?;
        if loci.kind() == LociKind::Pseudo {
            return Err(ExecutionError::PseudoNotRealizable {
                name: blueprint.name.clone(),
            }
            .into());
        }
        let name = blueprint.name.clone();
        let to_read = blueprint.to_read.clone();
        Ok(match blueprint.kind {
            BlueprintKind::Frozen => Self::Frozen {
                dist: freeze(bn, &name, env)?,
                name,
                to_read,
            },
            BlueprintKind::Single => Self::Single { name, to_read },
            BlueprintKind::Compound => Self::Compound {
                name,
                to_read,
                to_sample: blueprint.to_sample.clone(),
            },
        })
    }

    /// Target node.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Frozen { name, .. } | Self::Single { name, .. } | Self::Compound { name, .. } => name,
        }
    }

    /// Which blueprint kind this actor realizes.
    #[must_use]
    pub const fn kind(&self) -> BlueprintKind {
        match self {
            Self::Frozen { .. } => BlueprintKind::Frozen,
            Self::Single { .. } => BlueprintKind::Single,
            Self::Compound { .. } => BlueprintKind::Compound,
        }
    }

    /// Inputs read from the calling environment.
    #[must_use]
    pub fn to_read(&self) -> &[String] {
        match self {
            Self::Frozen { to_read, .. } | Self::Single { to_read, .. } | Self::Compound { to_read, .. } => {
                to_read
            }
        }
    }

    /// Cached distribution of a Frozen actor.
    #[must_use]
    pub fn distribution(&self) -> Option<&Distribution> {
        match self {
            Self::Frozen { dist: Ok(d), .. } => Some(d),
            _ => None,
        }
    }

    /// Draw one value of the target.
    ///
    /// # Errors
    ///
    /// Returns `MissingInput` when an input is absent from `env`, or any
    /// evaluation error of the chain.
    pub fn sample<R: Rng + ?Sized>(&self, bn: &BayesianNetwork, env: &dyn Lookup, rng: &mut R) -> NestResult<f64> {
        match self {
            Self::Frozen { dist, .. } => match dist {
                Ok(d) => Ok(d.sample(rng)?),
                Err(e) => Err(e.clone().into()),
            },
            Self::Single { name, .. } => Ok(bn.loci(name)?.sample(env, rng)?),
            Self::Compound { name, .. } => {
                let scratch = self.draw_chain(bn, env, rng)?;
                scratch.lookup(name).ok_or_else(|| ExecutionError::MissingInput { name: name.clone() }.into())
            }
        }
    }

    /// Draw the target together with every node resampled on the way.
    ///
    /// Only Compound actors resample mediators; the others return the target alone.
    ///
    /// # Errors
    ///
    /// Same as [`Actor::sample`].
    pub fn sample_with_mediators<R: Rng + ?Sized>(
        &self,
        bn: &BayesianNetwork,
        env: &dyn Lookup,
        rng: &mut R,
    ) -> NestResult<IndexMap<String, f64>> {
        if let Self::Compound { .. } = self {
            return Ok(self.draw_chain(bn, env, rng)?.top);
        }
        let value = self.sample(bn, env, rng)?;
        let mut out = IndexMap::new();
        out.insert(self.name().to_string(), value);
        Ok(out)
    }

    fn draw_chain<'e, R: Rng + ?Sized>(
        &self,
        bn: &BayesianNetwork,
        env: &'e dyn Lookup,
        rng: &mut R,
    ) -> NestResult<Layered<'e>> {
        let mut scratch = Layered::new(env);
        if let Self::Compound { name, to_sample, .. } = self {
            for node in to_sample.iter().chain(std::iter::once(name)) {
                let value = bn.loci(node)?.sample(&scratch, rng)?;
                scratch.insert(node.clone(), value);
            }
        }
        Ok(scratch)
    }

    /// Re-evaluate a Frozen actor against new parent values in place.
    ///
    /// Other kinds read their inputs per call and are left unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`Actor::compose`].
    pub fn update(&mut self, bn: &BayesianNetwork, env: &dyn Lookup) -> NestResult<()> {
        if let Self::Frozen { name, dist, .. } = self {
            *dist = freeze(bn, name, env)?;
        }
        Ok(())
    }
}

/// Evaluate `name` against `env`, deferring a missing input to draw time.
fn freeze(bn: &BayesianNetwork, name: &str, env: &dyn Lookup) -> NestResult<Result<Distribution, ExecutionError>> {
    match bn.loci(name)?.freeze(env) {
        Ok(d) => Ok(Ok(d)),
        Err(e @ ExecutionError::MissingInput { .. }) => {
            debug!(node = %name, error = %e, "frozen actor left unresolved");
            Ok(Err(e))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::network::bayes_net_from_script;
    use crate::registry::Registry;

    fn net() -> BayesianNetwork {
        bayes_net_from_script(
            "PCore T { al = 1; be = 1; p ~ beta(al, be); x ~ binom(n, p); z = f(p) }",
            Arc::new(Registry::standard()),
        )
        .unwrap()
    }

    fn env(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn frozen_caches_distribution() {
        let bn = net();
        let bp = ActorBlueprint::frozen("x", vec!["n".into(), "p".into()]);
        let mut actor = Actor::compose(&bp, &bn, &env(&[("n", 10.0), ("p", 0.5)])).unwrap();
        assert_eq!(actor.distribution(), Some(&Distribution::binomial(10.0, 0.5).unwrap()));

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x = actor.sample(&bn, &crate::env::Empty, &mut rng).unwrap();
        assert!((0.0..=10.0).contains(&x));

        actor.update(&bn, &env(&[("n", 3.0), ("p", 0.5)])).unwrap();
        assert_eq!(actor.distribution(), Some(&Distribution::binomial(3.0, 0.5).unwrap()));
    }

    #[test]
    fn frozen_defers_missing_input() {
        let bn = net();
        let bp = ActorBlueprint::frozen("x", vec!["n".into(), "p".into()]);
        let actor = Actor::compose(&bp, &bn, &env(&[("p", 0.5)])).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = actor.sample(&bn, &crate::env::Empty, &mut rng).unwrap_err();
        assert!(err.is_missing_input());
    }

    #[test]
    fn single_reads_caller() {
        let bn = net();
        let actor = Actor::compose(&ActorBlueprint::single("x", vec![]), &bn, &crate::env::Empty).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let x = actor.sample(&bn, &env(&[("n", 4.0), ("p", 1.0)]), &mut rng).unwrap();
        assert_eq!(x, 4.0);
    }

    #[test]
    fn compound_resamples_chain() {
        let bn = net();
        let bp = ActorBlueprint::compound("x", vec!["n".into()], vec!["p".into()]);
        let actor = Actor::compose(&bp, &bn, &crate::env::Empty).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let caller = env(&[("n", 5.0), ("al", 1.0), ("be", 1.0), ("p", 2.0)]);
        let drawn = actor.sample_with_mediators(&bn, &caller, &mut rng).unwrap();
        assert_eq!(drawn.keys().collect::<Vec<_>>(), ["p", "x"]);
        assert!(drawn["p"] <= 1.0);
        assert!(drawn["x"] <= 5.0);
    }

    #[test]
    fn pseudo_cannot_be_composed() {
        let bn = net();
        let err = Actor::compose(&ActorBlueprint::single("z", vec![]), &bn, &crate::env::Empty).unwrap_err();
        assert!(matches!(
            err,
            crate::error::NestError::Execution(ExecutionError::PseudoNotRealizable { .. })
        ));
    }
}
