//! Node-set declarations and their resolved form.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};

use super::blueprint::ActorBlueprint;
use super::resolve;
use crate::error::ValidationError;
use crate::network::BayesianNetwork;

/// What resolution assigned to one level.
///
/// Every list is in the network's topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResolvedLevel {
    /// Drawn once per instance of this level, in generation order.
    pub fixed: Vec<String>,
    /// Resampled for each child instance.
    pub floating: Vec<String>,
    /// Read by the fixed chain from enclosing levels.
    pub exo: Vec<String>,
    /// Read by floating samplers from enclosing levels.
    pub listening: Vec<String>,
    /// Floating anywhere below this level.
    pub will_be_floating: Vec<String>,
    /// Samplers used by an instance of this level.
    pub local_samplers: IndexMap<String, ActorBlueprint>,
    /// Samplers shared by all sibling instances of this level through their parent.
    pub shared_samplers: IndexMap<String, ActorBlueprint>,
    /// Rounds taken by the floating-to-fixed fixed point.
    pub rounds: usize,
}

/// One level of a hierarchy declaration.
///
/// A level names the network nodes it wants drawn once per instance
/// (`as_fixed`) and the nodes it wants resampled per child (`as_floating`).
/// Everything else is inferred by [`NodeSet::inject_bn`].
///
/// ```
/// use nestdag::NodeSet;
///
/// let mut root = NodeSet::new("root").with_fixed(["a"]);
/// let med = root.add_child(NodeSet::new("med").with_fixed(["b"]).with_floating(["d"])).unwrap();
/// med.add_child(NodeSet::new("leaf").with_fixed(["e"])).unwrap();
/// assert_eq!(root.levels().count(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSet {
    name: String,
    as_fixed: BTreeSet<String>,
    as_floating: BTreeSet<String>,
    children: Vec<NodeSet>,
    resolved: Option<ResolvedLevel>,
    unplaced: Vec<String>,
    network: Option<String>,
}

impl NodeSet {
    /// Create an empty level.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            as_fixed: BTreeSet::new(),
            as_floating: BTreeSet::new(),
            children: Vec::new(),
            resolved: None,
            unplaced: Vec::new(),
            network: None,
        }
    }

    /// Declare nodes drawn once per instance.
    #[must_use]
    pub fn with_fixed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.as_fixed.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare nodes resampled per child instance.
    #[must_use]
    pub fn with_floating<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.as_floating.extend(names.into_iter().map(Into::into));
        self
    }

    /// Attach a child level and return it for further nesting.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyFrozen` once this level has been resolved.
    pub fn add_child(&mut self, child: NodeSet) -> Result<&mut NodeSet, ValidationError> {
        if self.resolved.is_some() {
            return Err(ValidationError::HierarchyFrozen {
                level: self.name.clone(),
            });
        }
        let index = self.children.len();
        self.children.push(child);
        Ok(&mut self.children[index])
    }

    /// Shorthand for `add_child` with freshly declared sets.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyFrozen` once this level has been resolved.
    pub fn new_child<I, J, S, T>(&mut self, name: &str, fixed: I, floating: J) -> Result<&mut NodeSet, ValidationError>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.add_child(NodeSet::new(name).with_fixed(fixed).with_floating(floating))
    }

    /// Level name, also the simulation group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fixed nodes.
    #[must_use]
    pub fn as_fixed(&self) -> &BTreeSet<String> {
        &self.as_fixed
    }

    /// Declared floating nodes.
    #[must_use]
    pub fn as_floating(&self) -> &BTreeSet<String> {
        &self.as_floating
    }

    /// Direct children.
    #[must_use]
    pub fn children(&self) -> &[NodeSet] {
        &self.children
    }

    /// Direct child by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&NodeSet> {
        self.children.iter().find(|c| c.name == name)
    }

    /// This level and all levels below it, parents before children.
    pub fn levels(&self) -> impl Iterator<Item = &NodeSet> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    /// Any level in this subtree by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&NodeSet> {
        self.levels().find(|l| l.name == name)
    }

    /// Returns true once `inject_bn` has run.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Fingerprint of the network this tree was resolved against.
    #[must_use]
    pub fn network_fingerprint(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Resolution result for this level.
    #[must_use]
    pub fn resolved(&self) -> Option<&ResolvedLevel> {
        self.resolved.as_ref()
    }

    /// Resolved fixed nodes in generation order. Empty before resolution.
    #[must_use]
    pub fn fixed_nodes(&self) -> &[String] {
        self.resolved.as_ref().map_or(&[], |r| &r.fixed)
    }

    /// Resolved floating nodes. Empty before resolution.
    #[must_use]
    pub fn floating_nodes(&self) -> &[String] {
        self.resolved.as_ref().map_or(&[], |r| &r.floating)
    }

    /// Resolved exogenous requirements. Empty before resolution.
    #[must_use]
    pub fn exo_nodes(&self) -> &[String] {
        self.resolved.as_ref().map_or(&[], |r| &r.exo)
    }

    /// Resolved listening requirements. Empty before resolution.
    #[must_use]
    pub fn listening_nodes(&self) -> &[String] {
        self.resolved.as_ref().map_or(&[], |r| &r.listening)
    }

    /// Sampler blueprints for instances of this level.
    #[must_use]
    pub fn local_samplers(&self) -> Option<&IndexMap<String, ActorBlueprint>> {
        self.resolved.as_ref().map(|r| &r.local_samplers)
    }

    /// Sampler blueprints shared through the parent instance.
    #[must_use]
    pub fn shared_samplers(&self) -> Option<&IndexMap<String, ActorBlueprint>> {
        self.resolved.as_ref().map(|r| &r.shared_samplers)
    }

    /// Nodes that no level could place. Only recorded on the root.
    #[must_use]
    pub fn unplaced(&self) -> &[String] {
        &self.unplaced
    }

    /// Resolve the whole tree against a frozen network.
    ///
    /// Declarations are validated before anything is written; on error the
    /// tree is left untouched. Afterwards the tree is frozen.
    ///
    /// # Errors
    ///
    /// Returns `NetworkNotFrozen`, `HierarchyFrozen`, or any declaration error.
    pub fn inject_bn(&mut self, bn: &BayesianNetwork) -> Result<(), ValidationError> {
        if let Some(level) = self.levels().find(|l| l.is_resolved()) {
            return Err(ValidationError::HierarchyFrozen {
                level: level.name.clone(),
            });
        }
        let resolution = resolve::resolve(self, bn)?;
        let mut levels = resolution.levels.into_iter();
        self.assign(&mut levels);
        self.unplaced = resolution.unplaced;
        self.network = bn.fingerprint().ok();
        Ok(())
    }

    fn assign(&mut self, levels: &mut impl Iterator<Item = ResolvedLevel>) {
        self.resolved = levels.next();
        for child in &mut self.children {
            child.assign(levels);
        }
    }

    /// Drop every resolution result so the tree can be edited again.
    pub fn defrost(&mut self) {
        self.resolved = None;
        self.unplaced.clear();
        self.network = None;
        for child in &mut self.children {
            child.defrost();
        }
    }

    /// Descriptive export of the resolved tree.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let r = self.resolved.clone().unwrap_or_default();
        let children: Vec<Value> = self.children.iter().map(NodeSet::to_json).collect();
        json!({
            "Name": self.name,
            "Listening": r.listening,
            "BeFixed": r.fixed,
            "Exogenous": r.exo,
            "Floating": r.floating,
            "Children": children,
        })
    }

    /// Indented text tree of the resolved sets.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        self.write_summary(&mut out, 0);
        if !self.unplaced.is_empty() {
            let _ = writeln!(out, "unplaced: {}", self.unplaced.join(", "));
        }
        out
    }

    fn write_summary(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let _ = writeln!(out, "{pad}{}", self.name);
        if let Some(r) = &self.resolved {
            for (label, nodes) in [
                ("fixed", &r.fixed),
                ("floating", &r.floating),
                ("exo", &r.exo),
                ("listening", &r.listening),
            ] {
                if !nodes.is_empty() {
                    let _ = writeln!(out, "{pad}  {label}: {}", nodes.join(", "));
                }
            }
            for bp in r.local_samplers.values() {
                let _ = writeln!(out, "{pad}  sampler: {bp}");
            }
        }
        for child in &self.children {
            child.write_summary(out, depth + 1);
        }
    }
}
