//! Bayesian networks: typed loci over an acyclic dependency graph.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dag::Dag;
use super::loci::{Loci, LociJson, LociKind};
use crate::env::{Layered, Lookup};
use crate::error::{ExecutionError, NestError, NestResult, ValidationError};
use crate::registry::Registry;

/// Derived node lists, refreshed on every structural change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Caches {
    order: Vec<String>,
    roots: Vec<String>,
    rv_roots: Vec<String>,
    leaves: Vec<String>,
    exo: Vec<String>,
}

/// One joint draw from a network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSample {
    /// Realized values in topological order.
    pub values: IndexMap<String, f64>,
    /// Sum of the log-densities of the random nodes that were drawn or given.
    pub log_prior: f64,
}

/// A named DAG of loci.
///
/// Built incrementally, then frozen with [`BayesianNetwork::complete`]. Every
/// insertion is checked for cycles before anything is mutated, so a rejected
/// node leaves no trace, not even the exogenous placeholders it would have
/// introduced.
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    name: String,
    registry: Arc<Registry>,
    loci: IndexMap<String, Loci>,
    descriptions: IndexMap<String, String>,
    dag: Dag,
    caches: Caches,
    order_hint: Option<Vec<String>>,
    frozen: bool,
}

impl BayesianNetwork {
    /// An empty, unfrozen network.
    #[must_use]
    pub fn new(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            registry,
            loci: IndexMap::new(),
            descriptions: IndexMap::new(),
            dag: Dag::new(),
            caches: Caches::default(),
            order_hint: None,
            frozen: false,
        }
    }

    /// Network name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function and distribution tables used to compile definitions.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns true once [`BayesianNetwork::complete`] has been called.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loci.len()
    }

    /// Returns true if there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    /// Returns true if `name` is a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.loci.contains_key(name)
    }

    /// Look up a node.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Loci> {
        self.loci.get(name)
    }

    /// Look up a node, failing with `UnknownNode`.
    pub fn loci(&self, name: &str) -> Result<&Loci, ValidationError> {
        self.loci
            .get(name)
            .ok_or_else(|| ValidationError::UnknownNode { name: name.to_string() })
    }

    /// Node description, if one was given.
    #[must_use]
    pub fn description(&self, name: &str) -> Option<&str> {
        self.descriptions.get(name).map(String::as_str)
    }

    /// The dependency graph.
    #[must_use]
    pub const fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Append a node.
    ///
    /// Unknown parents are added as ExoValue placeholders. A placeholder may later
    /// be replaced by a real definition; any other redefinition is `DuplicateNode`.
    pub fn append_loci(&mut self, loci: Loci) -> Result<(), ValidationError> {
        self.insert(loci, None, false)
    }

    /// Append a node with a description.
    pub fn append_described(&mut self, loci: Loci, description: impl Into<String>) -> Result<(), ValidationError> {
        self.insert(loci, Some(description.into()), false)
    }

    fn insert(&mut self, loci: Loci, description: Option<String>, replace: bool) -> Result<(), ValidationError> {
        if self.frozen {
            return Err(ValidationError::NetworkFrozen { name: self.name.clone() });
        }
        let name = loci.name().to_string();
        if let Some(existing) = self.loci.get(&name) {
            if !replace && existing.kind() != LociKind::ExoValue {
                return Err(ValidationError::DuplicateNode { name });
            }
        }
        let parents = loci.parents();
        if self.dag.would_cycle(&name, &parents) {
            return Err(ValidationError::CyclicDependency { name });
        }

        // commit
        for p in &parents {
            if !self.loci.contains_key(p) {
                self.loci.insert(p.clone(), Loci::exo(p.as_str()));
                self.dag.add_node(p);
            }
        }
        self.dag.add_node(&name);
        self.dag.clear_parents(&name);
        for p in &parents {
            self.dag.add_edge(p, &name);
        }
        match description {
            Some(d) => {
                self.descriptions.insert(name.clone(), d);
            }
            None if replace => {
                self.descriptions.shift_remove(&name);
            }
            None => {}
        }
        self.loci.insert(name, loci);
        self.refresh();
        Ok(())
    }

    fn refresh(&mut self) {
        let order = match &self.order_hint {
            Some(hint) if self.dag.is_topological(hint) => hint.clone(),
            _ => self.dag.order(),
        };
        let rv_roots = order
            .iter()
            .filter(|n| self.is_rv(n))
            .filter(|n| !self.dag.ancestors(n).iter().any(|a| self.is_rv(a)))
            .cloned()
            .collect();
        let exo = order
            .iter()
            .filter(|n| self.loci.get(*n).is_some_and(|l| l.kind() == LociKind::ExoValue))
            .cloned()
            .collect();
        let roots = order
            .iter()
            .filter(|n| self.dag.parents(n).next().is_none())
            .cloned()
            .collect();
        let leaves = order
            .iter()
            .filter(|n| self.dag.children(n).next().is_none())
            .cloned()
            .collect();
        self.caches = Caches {
            order,
            roots,
            rv_roots,
            leaves,
            exo,
        };
    }

    /// Freeze the structure. Idempotent.
    pub fn complete(&mut self) {
        if !self.frozen {
            self.refresh();
            self.frozen = true;
            debug!(network = %self.name, nodes = self.loci.len(), "network completed");
        }
    }

    /// Reopen a frozen network for editing.
    pub fn defrost(&mut self) {
        self.frozen = false;
    }

    /// Fail unless the network is frozen.
    pub fn require_frozen(&self) -> Result<(), ValidationError> {
        if self.frozen {
            Ok(())
        } else {
            Err(ValidationError::NetworkNotFrozen { name: self.name.clone() })
        }
    }

    /// Topological order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.caches.order
    }

    /// Nodes with no parents.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.caches.roots
    }

    /// Random nodes with no random ancestor.
    #[must_use]
    pub fn rv_roots(&self) -> &[String] {
        &self.caches.rv_roots
    }

    /// Nodes with no children.
    #[must_use]
    pub fn leaves(&self) -> &[String] {
        &self.caches.leaves
    }

    /// ExoValue nodes.
    #[must_use]
    pub fn exo(&self) -> &[String] {
        &self.caches.exo
    }

    /// Returns true if `name` is a Distribution node.
    #[must_use]
    pub fn is_rv(&self, name: &str) -> bool {
        self.loci.get(name).is_some_and(Loci::is_random)
    }

    /// Returns true if `name` is an ExoValue or Pseudo node.
    #[must_use]
    pub fn is_exogenous(&self, name: &str) -> bool {
        self.loci.get(name).is_some_and(Loci::is_exogenous)
    }

    /// Returns true if computing `node` from `given` involves any random draw.
    ///
    /// A random node is random unless it is itself given.
    #[must_use]
    pub fn has_randomness(&self, node: &str, given: &BTreeSet<String>) -> bool {
        let target = [node.to_string()];
        self.dag
            .sufficient_nodes(&target, given)
            .iter()
            .filter(|n| !given.contains(*n))
            .any(|n| self.is_rv(n))
    }

    /// Members of `names` in topological order.
    #[must_use]
    pub fn sort<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let wanted: BTreeSet<&str> = names.into_iter().map(String::as_str).collect();
        self.caches
            .order
            .iter()
            .filter(|n| wanted.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Joint draw of every node. Values present in `cond` are taken as given.
    ///
    /// Pseudo nodes are skipped; anything depending on them fails with `MissingInput`.
    pub fn sample<R: Rng + ?Sized>(&self, cond: &dyn Lookup, rng: &mut R) -> NestResult<NetworkSample> {
        self.sample_nodes(self.caches.order.iter(), cond, rng)
    }

    /// Draw only what `included` needs, treating values in `cond` as given.
    pub fn sample_minimally<R: Rng + ?Sized>(
        &self,
        included: &[String],
        cond: &dyn Lookup,
        rng: &mut R,
    ) -> NestResult<NetworkSample> {
        for n in included {
            self.loci(n)?;
        }
        let given: Vec<String> = self
            .caches
            .order
            .iter()
            .filter(|n| cond.lookup(n).is_some())
            .cloned()
            .collect();
        let needed = self.dag.sufficient_nodes(included, &given);
        let nodes = self.sort(&needed);
        self.sample_nodes(nodes.iter(), cond, rng)
    }

    fn sample_nodes<'a, R: Rng + ?Sized>(
        &self,
        nodes: impl Iterator<Item = &'a String>,
        cond: &dyn Lookup,
        rng: &mut R,
    ) -> NestResult<NetworkSample> {
        let mut env = Layered::new(cond);
        let mut log_prior = 0.0;
        for name in nodes {
            let loci = self.loci(name)?;
            if loci.kind() == LociKind::Pseudo {
                continue;
            }
            let value = match cond.lookup(name) {
                Some(v) => v,
                None => loci.sample(&env, rng)?,
            };
            env.insert(name.clone(), value);
            log_prior += loci.evaluate(&env)?;
        }
        Ok(NetworkSample {
            values: env.top,
            log_prior,
        })
    }

    /// Log prior density of a full assignment.
    pub fn evaluate(&self, values: &dyn Lookup) -> Result<f64, ExecutionError> {
        let mut total = 0.0;
        for name in &self.caches.order {
            if let Some(loci) = self.loci.get(name) {
                if loci.is_random() {
                    total += loci.evaluate(values)?;
                }
            }
        }
        Ok(total)
    }

    /// JSON form. Node entries keep insertion order.
    #[must_use]
    pub fn to_json(&self) -> NetworkJson {
        NetworkJson {
            name: self.name.clone(),
            nodes: self
                .loci
                .values()
                .map(|l| l.to_json(self.description(l.name())))
                .collect(),
            order: self.caches.order.clone(),
            roots: self.caches.roots.clone(),
            leaves: self.caches.leaves.clone(),
            exo: self.caches.exo.clone(),
        }
    }

    /// JSON text.
    pub fn to_json_string(&self) -> NestResult<String> {
        serde_json::to_string(&self.to_json()).map_err(|e| NestError::internal(e.to_string()))
    }

    /// Rebuild a frozen network from JSON.
    ///
    /// Node insertion order follows `Nodes`. A non-empty `Order` must be a valid
    /// topological order and is kept as given; `Roots`, `Leaves`, and `Exo` must
    /// agree with the structure.
    pub fn from_json(js: &NetworkJson, registry: Arc<Registry>) -> Result<Self, ValidationError> {
        let mut bn = Self::new(&js.name, registry);
        for node in &js.nodes {
            let loci = Loci::from_json(node, &bn.registry)?;
            bn.insert(loci, node.des.clone(), false)?;
        }
        let wanted: Vec<&str> = js.nodes.iter().map(|n| n.name.as_str()).collect();
        bn.reorder(&wanted);

        if !js.order.is_empty() {
            if !bn.dag.is_topological(&js.order) {
                return Err(ValidationError::InconsistentJson {
                    reason: "Order is not a topological order of Nodes".to_string(),
                });
            }
            bn.order_hint = Some(js.order.clone());
            bn.refresh();
        }
        let same = |a: &[String], b: &[String]| {
            b.is_empty() || a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
        };
        if !same(&bn.caches.roots, &js.roots) || !same(&bn.caches.leaves, &js.leaves) || !same(&bn.caches.exo, &js.exo) {
            return Err(ValidationError::InconsistentJson {
                reason: "Roots, Leaves, or Exo disagree with Nodes".to_string(),
            });
        }
        bn.complete();
        Ok(bn)
    }

    /// Parse JSON text into a frozen network.
    pub fn from_json_str(json: &str, registry: Arc<Registry>) -> NestResult<Self> {
        let js: NetworkJson = serde_json::from_str(json).map_err(|e| ValidationError::Parse {
            input: "network json".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_json(&js, registry)?)
    }

    /// Put nodes listed in `names` first, in that order; keep the rest after them.
    fn reorder(&mut self, names: &[&str]) {
        let mut loci = IndexMap::with_capacity(self.loci.len());
        for n in names {
            if let Some((k, v)) = self.loci.shift_remove_entry(*n) {
                loci.insert(k, v);
            }
        }
        loci.extend(self.loci.drain(..));
        self.loci = loci;

        let mut dag = Dag::new();
        for n in self.loci.keys() {
            dag.add_node(n);
        }
        for n in self.loci.keys() {
            for p in self.dag.parents(n) {
                dag.add_edge(p, n);
            }
        }
        self.dag = dag;
        self.refresh();
    }

    /// Independent copy that goes through the JSON form.
    pub fn copy(&self, name: Option<&str>) -> Result<Self, ValidationError> {
        let mut js = self.to_json();
        if let Some(n) = name {
            js.name = n.to_string();
        }
        let mut bn = Self::from_json(&js, Arc::clone(&self.registry))?;
        if !self.frozen {
            bn.defrost();
        }
        Ok(bn)
    }

    /// A new network where every non-exogenous definition of `other` replaces or
    /// extends this network's.
    ///
    /// Edges that no longer match a definition are dropped, and ExoValue nodes
    /// whose last child was redefined away are removed. Inputs that had no
    /// children to begin with are kept.
    pub fn merge(&self, name: &str, other: &Self) -> Result<Self, ValidationError> {
        let mut bn = self.copy(Some(name))?;
        bn.defrost();
        bn.order_hint = None;
        let bare: BTreeSet<String> = bn
            .loci
            .values()
            .filter(|l| l.kind() == LociKind::ExoValue)
            .filter(|l| bn.dag.children(l.name()).next().is_none())
            .map(|l| l.name().to_string())
            .collect();
        for node in other.order() {
            let loci = other.loci(node)?;
            if loci.is_exogenous() {
                continue;
            }
            bn.insert(loci.clone(), other.description(node).map(str::to_string), true)?;
        }
        let orphans: Vec<String> = bn
            .loci
            .values()
            .filter(|l| l.kind() == LociKind::ExoValue)
            .filter(|l| bn.dag.children(l.name()).next().is_none())
            .filter(|l| !bare.contains(l.name()))
            .map(|l| l.name().to_string())
            .collect();
        for o in orphans {
            bn.loci.shift_remove(&o);
            bn.descriptions.shift_remove(&o);
            bn.dag.remove_node(&o);
        }
        bn.refresh();
        bn.complete();
        Ok(bn)
    }

    /// Script form, one statement per node in topological order.
    #[must_use]
    pub fn to_script(&self) -> String {
        let mut out = format!("PCore {} {{\n", self.name);
        for name in &self.caches.order {
            if let Some(loci) = self.loci.get(name) {
                out.push('\t');
                out.push_str(&loci.to_string());
                if let Some(d) = self.description(name) {
                    out.push_str(" # ");
                    out.push_str(d);
                }
                out.push('\n');
            }
        }
        out.push('}');
        out
    }

    /// Stable hash of the canonical JSON form.
    pub fn fingerprint(&self) -> NestResult<String> {
        let bytes = serde_json::to_vec(&self.to_json()).map_err(|e| NestError::internal(e.to_string()))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

impl fmt::Display for BayesianNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_script())
    }
}

/// JSON form of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkJson {
    /// Network name.
    pub name: String,
    /// Every node, in topological order.
    pub nodes: Vec<LociJson>,
    /// Topological order; must agree with the edges when present.
    #[serde(default)]
    pub order: Vec<String>,
    /// Nodes without parents.
    #[serde(default)]
    pub roots: Vec<String>,
    /// Nodes without children.
    #[serde(default)]
    pub leaves: Vec<String>,
    /// ExoValue nodes.
    #[serde(default)]
    pub exo: Vec<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn reg() -> Arc<Registry> {
        Arc::new(Registry::standard())
    }

    fn chain() -> BayesianNetwork {
        let r = reg();
        let mut bn = BayesianNetwork::new("chain", Arc::clone(&r));
        bn.append_loci(Loci::value("a", 1.0)).unwrap();
        bn.append_loci(Loci::function("b", "a + 3", &r).unwrap()).unwrap();
        bn.append_loci(Loci::function("c", "b * 2", &r).unwrap()).unwrap();
        bn.append_loci(Loci::distribution("d", "binom(b, 0.5)", &r).unwrap())
            .unwrap();
        bn.append_loci(Loci::function("e", "d + c", &r).unwrap()).unwrap();
        bn.complete();
        bn
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_caches() {
        let bn = chain();
        assert_eq!(bn.order(), ["a", "b", "c", "d", "e"]);
        assert_eq!(bn.roots(), ["a"]);
        assert_eq!(bn.leaves(), ["e"]);
        assert_eq!(bn.rv_roots(), ["d"]);
        assert!(bn.exo().is_empty());
    }

    #[test]
    fn test_placeholder_then_definition() {
        let r = reg();
        let mut bn = BayesianNetwork::new("t", Arc::clone(&r));
        bn.append_loci(Loci::function("y", "x + 1", &r).unwrap()).unwrap();
        assert_eq!(bn.get("x").unwrap().kind(), LociKind::ExoValue);
        bn.append_loci(Loci::value("x", 2.0)).unwrap();
        assert_eq!(bn.get("x").unwrap().kind(), LociKind::Value);
        assert!(matches!(
            bn.append_loci(Loci::value("x", 3.0)),
            Err(ValidationError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_cycle_rolls_back_placeholders() {
        let r = reg();
        let mut bn = BayesianNetwork::new("t", Arc::clone(&r));
        bn.append_loci(Loci::function("y", "x + 1", &r).unwrap()).unwrap();
        let before = bn.len();
        // x = y + z would close x -> y -> x and introduce z
        let err = bn
            .append_loci(Loci::function("x", "y + z", &r).unwrap())
            .unwrap_err();
        assert!(matches!(err, ValidationError::CyclicDependency { .. }));
        assert_eq!(bn.len(), before);
        assert!(!bn.contains("z"));
        assert_eq!(bn.get("x").unwrap().kind(), LociKind::ExoValue);
    }

    #[test]
    fn test_frozen_rejects_append() {
        let mut bn = chain();
        assert!(matches!(
            bn.append_loci(Loci::value("z", 1.0)),
            Err(ValidationError::NetworkFrozen { .. })
        ));
        bn.defrost();
        bn.append_loci(Loci::value("z", 1.0)).unwrap();
    }

    #[test]
    fn test_has_randomness() {
        let bn = chain();
        assert!(!bn.has_randomness("c", &set(&[])));
        assert!(bn.has_randomness("e", &set(&["b", "c"])));
        assert!(!bn.has_randomness("e", &set(&["d", "c"])));
        assert!(bn.has_randomness("d", &set(&["b"])));
        assert!(!bn.has_randomness("d", &set(&["d"])));
    }

    #[test]
    fn test_sample_and_evaluate() {
        let bn = chain();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let s = bn.sample(&HashMap::<String, f64>::new(), &mut rng).unwrap();
        assert_eq!(s.values["b"], 4.0);
        assert_eq!(s.values["c"], 8.0);
        assert_eq!(s.values["e"], s.values["d"] + 8.0);
        let lp = bn.evaluate(&s.values).unwrap();
        assert!((lp - s.log_prior).abs() < 1e-12);
    }

    #[test]
    fn test_sample_with_condition() {
        let bn = chain();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let mut cond = HashMap::new();
        cond.insert("a".to_string(), 7.0);
        let s = bn.sample(&cond, &mut rng).unwrap();
        assert_eq!(s.values["b"], 10.0);
    }

    #[test]
    fn test_sample_minimally() {
        let bn = chain();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let mut cond = HashMap::new();
        cond.insert("b".to_string(), 2.0);
        let s = bn.sample_minimally(&["c".to_string()], &cond, &mut rng).unwrap();
        assert_eq!(s.values.keys().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(s.values["c"], 4.0);
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let bn = chain();
        let js = bn.to_json_string().unwrap();
        let back = BayesianNetwork::from_json_str(&js, reg()).unwrap();
        assert_eq!(back.to_json_string().unwrap(), js);
        assert_eq!(back.fingerprint().unwrap(), bn.fingerprint().unwrap());
        assert!(back.is_frozen());
    }

    #[test]
    fn test_from_json_rejects_bad_order() {
        let mut js = chain().to_json();
        js.order.swap(0, 1);
        assert!(matches!(
            BayesianNetwork::from_json(&js, reg()),
            Err(ValidationError::InconsistentJson { .. })
        ));
    }

    #[test]
    fn test_merge_replaces_definitions() {
        let r = reg();
        let base = chain();
        let mut patch = BayesianNetwork::new("patch", Arc::clone(&r));
        patch.append_loci(Loci::function("e", "c * 10", &r).unwrap()).unwrap();
        patch.complete();

        let merged = base.merge("merged", &patch).unwrap();
        assert_eq!(merged.name(), "merged");
        assert_eq!(merged.get("e").unwrap().definition_text(), "c * 10");
        assert_eq!(merged.dag().parents("e").collect::<Vec<_>>(), ["c"]);
        assert!(merged.is_frozen());
        // the patch's placeholder for c does not replace the real definition
        assert_eq!(merged.get("c").unwrap().kind(), LociKind::Function);
    }

    #[test]
    fn test_merge_keeps_declared_inputs() {
        let r = reg();
        let mut base = BayesianNetwork::new("base", Arc::clone(&r));
        base.append_loci(Loci::exo("k")).unwrap();
        base.append_loci(Loci::function("y", "n * 2", &r).unwrap()).unwrap();
        base.complete();
        assert_eq!(base.get("n").unwrap().kind(), LociKind::ExoValue);

        let mut patch = BayesianNetwork::new("patch", Arc::clone(&r));
        patch.append_loci(Loci::value("y", 4.0)).unwrap();
        patch.complete();

        let merged = base.merge("merged", &patch).unwrap();
        assert_eq!(merged.get("k").unwrap().kind(), LociKind::ExoValue);
        assert!(merged.get("n").is_none());
        assert_eq!(merged.dag().parents("y").count(), 0);
    }

    #[test]
    fn test_script_form() {
        let bn = chain();
        let script = bn.to_script();
        assert!(script.starts_with("PCore chain {\n"));
        assert!(script.contains("\td ~ binom(b, 0.5)\n"));
        assert!(script.ends_with('}'));
    }
}
