//! Simulation core: a network compiled against a resolved hierarchy.

use std::sync::Arc;

use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use tracing::info;

use super::group::SimulationGroup;
use super::parcore::ParameterTree;
use crate::config::SimulationConfig;
use crate::env::Lookup;
use crate::error::{ExecutionError, NestResult, ValidationError};
use crate::hierarchy::NodeSet;
use crate::network::BayesianNetwork;

/// Name of the single level used when no hierarchy is given.
pub const DEFAULT_ROOT: &str = "root";

/// Compiled, queryable form of a resolved hierarchy.
///
/// Holds one [`SimulationGroup`] per level. Parameter trees keep an `Arc` to
/// the core they were generated from.
#[derive(Debug, Clone)]
pub struct SimulationCore {
    bn: Arc<BayesianNetwork>,
    hierarchy: NodeSet,
    root: String,
    groups: IndexMap<String, SimulationGroup>,
    config: SimulationConfig,
    fingerprint: String,
}

impl SimulationCore {
    /// Resolve `hierarchy` against `bn` (unless it already is) and compile it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad config, `NetworkNotFrozen`,
    /// `NetworkMismatch` for a hierarchy already resolved against another
    /// network, or any declaration error raised by resolution.
    pub fn new(bn: Arc<BayesianNetwork>, mut hierarchy: NodeSet, config: SimulationConfig) -> NestResult<Self> {
        config.validate()?;
        bn.require_frozen()?;
        let fingerprint = bn.fingerprint()?;
        if hierarchy.is_resolved() {
            if hierarchy.network_fingerprint() != Some(fingerprint.as_str()) {
                return Err(ValidationError::NetworkMismatch {
                    expected: hierarchy.network_fingerprint().unwrap_or_default().to_string(),
                    actual: fingerprint,
                }
                .into());
            }
        } else {
            hierarchy.inject_bn(&bn)?;
        }

        let mut groups = IndexMap::new();
        collect_groups(&hierarchy, None, &mut groups)?;
        info!(
            network = %bn.name(),
            groups = groups.len(),
            hoist = config.hoist,
            "simulation core ready"
        );
        Ok(Self {
            root: hierarchy.name().to_string(),
            bn,
            hierarchy,
            groups,
            config,
            fingerprint,
        })
    }

    /// Core with a single root level and nothing declared.
    ///
    /// # Errors
    ///
    /// Same as [`SimulationCore::new`].
    pub fn flat(bn: Arc<BayesianNetwork>, config: SimulationConfig) -> NestResult<Self> {
        Self::new(bn, NodeSet::new(DEFAULT_ROOT), config)
    }

    /// The compiled network.
    #[must_use]
    pub fn network(&self) -> &BayesianNetwork {
        &self.bn
    }

    /// Shared handle to the network.
    #[must_use]
    pub fn network_handle(&self) -> &Arc<BayesianNetwork> {
        &self.bn
    }

    /// The resolved hierarchy.
    #[must_use]
    pub fn hierarchy(&self) -> &NodeSet {
        &self.hierarchy
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Network fingerprint captured at construction.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Root group.
    ///
    /// # Errors
    ///
    /// Never fails for a core built by [`SimulationCore::new`].
    pub fn root_group(&self) -> NestResult<&SimulationGroup> {
        self.group(&self.root)
    }

    /// Group by name.
    ///
    /// # Errors
    ///
    /// Returns `ChildNotFound` for an unknown group name.
    pub fn group(&self, name: &str) -> NestResult<&SimulationGroup> {
        self.groups.get(name).ok_or_else(|| {
            ExecutionError::ChildNotFound {
                nickname: name.to_string(),
            }
            .into()
        })
    }

    /// Every group, parents before children.
    pub fn groups(&self) -> impl Iterator<Item = &SimulationGroup> {
        self.groups.values()
    }

    /// Instantiate the root group.
    ///
    /// The tree RNG is seeded from the config, or from OS entropy without one.
    ///
    /// # Errors
    ///
    /// See [`SimulationGroup::generate`].
    pub fn generate(self: &Arc<Self>, nickname: &str, exo: &dyn Lookup) -> NestResult<ParameterTree> {
        let rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        ParameterTree::generate(Arc::clone(self), nickname, exo, rng)
    }

    /// Instantiate the root group with an explicit seed.
    ///
    /// # Errors
    ///
    /// See [`SimulationGroup::generate`].
    pub fn generate_seeded(self: &Arc<Self>, nickname: &str, exo: &dyn Lookup, seed: u64) -> NestResult<ParameterTree> {
        ParameterTree::generate(Arc::clone(self), nickname, exo, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Independent copy over a copied network, re-resolved from the same declarations.
    ///
    /// # Errors
    ///
    /// Propagates network copy and resolution errors.
    pub fn deep_copy(&self) -> NestResult<Self> {
        let bn = Arc::new(self.bn.copy(None)?);
        let mut hierarchy = self.hierarchy.clone();
        hierarchy.defrost();
        Self::new(bn, hierarchy, self.config)
    }

    /// Descriptive export.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let groups: IndexMap<&String, Value> = self.groups.iter().map(|(k, g)| (k, g.to_json())).collect();
        json!({
            "Name": self.bn.name(),
            "BN": self.bn.to_json(),
            "RootSG": self.root,
            "SGs": groups,
            "Hoist": self.config.hoist,
        })
    }
}

fn collect_groups(
    ns: &NodeSet,
    parent: Option<&str>,
    groups: &mut IndexMap<String, SimulationGroup>,
) -> NestResult<()> {
    groups.insert(ns.name().to_string(), SimulationGroup::from_level(ns, parent)?);
    for child in ns.children() {
        collect_groups(child, Some(ns.name()), groups)?;
    }
    Ok(())
}
