//! Simulation groups: one compiled level of a resolved hierarchy.

use indexmap::IndexMap;
use rand::Rng;
use serde_json::{json, Value};
use tracing::warn;

use super::actor::Actor;
use crate::config::SimulationConfig;
use crate::env::{Layered, Lookup};
use crate::error::{ExecutionError, NestError, NestResult};
use crate::hierarchy::{ActorBlueprint, NodeSet};
use crate::network::{BayesianNetwork, LociKind};

/// Fixed values and prior produced by [`SimulationGroup::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Values of the fixed chain, in generation order.
    pub locus: IndexMap<String, f64>,
    /// Sum of the chain's log densities.
    pub log_prior: f64,
}

/// A resolved level paired with the network it draws from.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationGroup {
    name: String,
    parent: Option<String>,
    children: Vec<String>,
    fixed_chain: Vec<String>,
    floating: Vec<String>,
    exo: Vec<String>,
    listening: Vec<String>,
    local: IndexMap<String, ActorBlueprint>,
    shared: IndexMap<String, ActorBlueprint>,
}

impl SimulationGroup {
    /// Compile one resolved level.
    pub(crate) fn from_level(ns: &NodeSet, parent: Option<&str>) -> NestResult<Self> {
        let resolved = ns
            .resolved()
            .ok_or_else(|| NestError::internal(format!("level '{}' has not been resolved", ns.name())))?;
        Ok(Self {
            name: ns.name().to_string(),
            parent: parent.map(str::to_string),
            children: ns.children().iter().map(|c| c.name().to_string()).collect(),
            fixed_chain: resolved.fixed.clone(),
            floating: resolved.floating.clone(),
            exo: resolved.exo.clone(),
            listening: resolved.listening.clone(),
            local: resolved.local_samplers.clone(),
            shared: resolved.shared_samplers.clone(),
        })
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent group, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child group names.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Returns true if `group` can be bred from an instance of this group.
    #[must_use]
    pub fn has_child(&self, group: &str) -> bool {
        self.children.iter().any(|c| c == group)
    }

    /// Nodes drawn per instance, in generation order.
    #[must_use]
    pub fn fixed_chain(&self) -> &[String] {
        &self.fixed_chain
    }

    /// Nodes sampled per child.
    #[must_use]
    pub fn floating(&self) -> &[String] {
        &self.floating
    }

    /// Values the fixed chain reads from enclosing instances.
    #[must_use]
    pub fn exo(&self) -> &[String] {
        &self.exo
    }

    /// Values floating samplers read from enclosing instances.
    #[must_use]
    pub fn listening(&self) -> &[String] {
        &self.listening
    }

    /// Blueprints realized on each instance.
    #[must_use]
    pub fn local_blueprints(&self) -> &IndexMap<String, ActorBlueprint> {
        &self.local
    }

    /// Blueprints realized once on the parent instance when hoisting.
    #[must_use]
    pub fn shared_blueprints(&self) -> &IndexMap<String, ActorBlueprint> {
        &self.shared
    }

    /// Draw the fixed chain of a new instance.
    ///
    /// Values present in `exo` are used as given; everything else is sampled
    /// against the values drawn so far and `upper`, the enclosing instances.
    ///
    /// # Errors
    ///
    /// Returns `MissingInput` for an absent exogenous input under
    /// `strict_exogenous`, or any sampling error of the chain.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        bn: &BayesianNetwork,
        config: &SimulationConfig,
        exo: &dyn Lookup,
        upper: &dyn Lookup,
        rng: &mut R,
    ) -> NestResult<Generated> {
        let mut env = Layered::new(upper);
        let mut log_prior = 0.0;
        for name in &self.fixed_chain {
            let loci = bn.loci(name)?;
            let value = match exo.lookup(name) {
                Some(v) => v,
                None if loci.kind() == LociKind::ExoValue => match upper.lookup(name) {
                    Some(v) => v,
                    None if config.strict_exogenous => {
                        return Err(ExecutionError::MissingInput { name: name.clone() }.into());
                    }
                    None => {
                        warn!(group = %self.name, node = %name, "exogenous input not supplied");
                        continue;
                    }
                },
                None => loci.sample(&env, rng)?,
            };
            env.insert(name.clone(), value);
            log_prior += loci.evaluate(&env)?;
        }
        Ok(Generated {
            locus: env.top,
            log_prior,
        })
    }

    /// Realize the local blueprints against an instance's environment.
    ///
    /// # Errors
    ///
    /// See [`Actor::compose`].
    pub fn compose_local(&self, bn: &BayesianNetwork, env: &dyn Lookup) -> NestResult<IndexMap<String, Actor>> {
        compose_all(&self.local, bn, env)
    }

    /// Realize the shared blueprints against the parent instance's environment.
    ///
    /// # Errors
    ///
    /// See [`Actor::compose`].
    pub fn compose_shared(&self, bn: &BayesianNetwork, env: &dyn Lookup) -> NestResult<IndexMap<String, Actor>> {
        compose_all(&self.shared, bn, env)
    }

    /// Descriptive export.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let actors: IndexMap<&String, String> = self.local.iter().map(|(k, bp)| (k, bp.kind.to_string())).collect();
        json!({
            "Name": self.name,
            "Listening": self.listening,
            "BeFixed": self.fixed_chain,
            "BeRandom": self.floating,
            "BeActors": actors,
            "Children": self.children,
        })
    }
}

fn compose_all(
    blueprints: &IndexMap<String, ActorBlueprint>,
    bn: &BayesianNetwork,
    env: &dyn Lookup,
) -> NestResult<IndexMap<String, Actor>> {
    blueprints
        .iter()
        .map(|(name, bp)| Ok((name.clone(), Actor::compose(bp, bn, env)?)))
        .collect()
}
