//! Hierarchy resolution.
//!
//! The declared tree is flattened into an arena (parents before children) and
//! resolved in passes:
//!
//! 1. local resolution, top-down: mediators, the floating-to-fixed fixed
//!    point, and the exogenous / listening requirements of each level;
//! 2. raise-up, bottom-up: what floats anywhere below each level;
//! 3. relations, top-down: who draws each exogenous requirement, and which
//!    listening requirements are deterministic enough to be fixed;
//! 4. blueprints, top-down: how every floating node is sampled.
//!
//! Between 3 and 4, undeclared nodes are pushed down to the first level that
//! can compute them and duplicates along a path are pruned.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::blueprint::ActorBlueprint;
use super::nodeset::{NodeSet, ResolvedLevel};
use crate::error::ValidationError;
use crate::network::{BayesianNetwork, LociKind};

pub(crate) struct Resolution {
    /// One entry per level, parents before children.
    pub levels: Vec<ResolvedLevel>,
    pub unplaced: Vec<String>,
}

#[derive(Default)]
struct Level {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    as_fixed: BTreeSet<String>,
    as_floating: BTreeSet<String>,
    fixed: BTreeSet<String>,
    floating: BTreeSet<String>,
    exo: BTreeSet<String>,
    listening: BTreeSet<String>,
    will_be_floating: BTreeSet<String>,
    local: IndexMap<String, ActorBlueprint>,
    shared: IndexMap<String, ActorBlueprint>,
    rounds: usize,
}

struct Resolver<'a> {
    bn: &'a BayesianNetwork,
    levels: Vec<Level>,
    unplaced: Vec<String>,
}

pub(crate) fn resolve(root: &NodeSet, bn: &BayesianNetwork) -> Result<Resolution, ValidationError> {
    bn.require_frozen()?;
    let mut r = Resolver {
        bn,
        levels: Vec::new(),
        unplaced: Vec::new(),
    };
    r.flatten(root, None);
    r.validate()?;

    r.resolve_local();
    r.raise_up_floating();
    r.resolve_relations();
    r.locate_undefined();
    r.prune();
    r.raise_up_floating();
    r.define_blueprints()?;
    Ok(r.finish())
}

impl Resolver<'_> {
    fn flatten(&mut self, ns: &NodeSet, parent: Option<usize>) {
        let index = self.levels.len();
        self.levels.push(Level {
            name: ns.name().to_string(),
            parent,
            as_fixed: ns.as_fixed().clone(),
            as_floating: ns.as_floating().clone(),
            ..Level::default()
        });
        if let Some(p) = parent {
            self.levels[p].children.push(index);
        }
        for child in ns.children() {
            self.flatten(child, Some(index));
        }
    }

    fn path_above(&self, i: usize) -> impl Iterator<Item = &Level> {
        std::iter::successors(self.levels[i].parent, |&p| self.levels[p].parent).map(|p| &self.levels[p])
    }

    /// Union of every ancestor's fixed set.
    fn ancestor_fixed(&self, i: usize) -> BTreeSet<String> {
        self.path_above(i).flat_map(|l| l.fixed.iter().cloned()).collect()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let dag = self.bn.dag();
        let mut names = HashSet::new();
        for (i, level) in self.levels.iter().enumerate() {
            if !names.insert(level.name.as_str()) {
                return Err(ValidationError::DuplicateGroup {
                    name: level.name.clone(),
                });
            }
            for node in level.as_fixed.iter().chain(&level.as_floating) {
                let loci = self.bn.loci(node)?;
                if loci.kind() == LociKind::Pseudo {
                    return Err(ValidationError::PseudoDeclared {
                        level: level.name.clone(),
                        node: node.clone(),
                    });
                }
            }
            if let Some(node) = level.as_fixed.intersection(&level.as_floating).next() {
                return Err(ValidationError::DuplicateDeclaration {
                    level: level.name.clone(),
                    node: node.clone(),
                });
            }
            for above in self.path_above(i) {
                let clash = level
                    .as_fixed
                    .iter()
                    .chain(&level.as_floating)
                    .find(|n| above.as_fixed.contains(*n) || above.as_floating.contains(*n));
                if let Some(node) = clash {
                    return Err(ValidationError::DuplicateDeclaration {
                        level: level.name.clone(),
                        node: node.clone(),
                    });
                }
            }
            for floating in &level.as_floating {
                if let Some(fixed) = level.as_fixed.iter().find(|f| dag.ancestors(f).contains(floating)) {
                    return Err(ValidationError::OrderingViolation {
                        level: level.name.clone(),
                        floating: floating.clone(),
                        fixed: fixed.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Move floating nodes that turned deterministic into the fixed set until nothing moves.
    ///
    /// Each round that does not stop removes at least one floating node, so
    /// there are at most `|floating| + 1` rounds.
    fn settle(
        &self,
        fixed: &mut BTreeSet<String>,
        floating: &mut BTreeSet<String>,
        all: &mut BTreeSet<String>,
    ) -> usize {
        let limit = floating.len() + 1;
        let mut rounds = 0;
        while rounds < limit {
            rounds += 1;
            let mut moved = false;
            for d in self.bn.sort(floating.iter()) {
                if !self.bn.has_randomness(&d, all) {
                    floating.remove(&d);
                    all.insert(d.clone());
                    fixed.insert(d);
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        rounds
    }

    fn resolve_local(&mut self) {
        let bn = self.bn;
        let dag = bn.dag();
        let declared_anywhere: BTreeSet<String> = self
            .levels
            .iter()
            .flat_map(|l| l.as_fixed.iter().chain(&l.as_floating).cloned())
            .collect();

        for i in 0..self.levels.len() {
            let above = self.ancestor_fixed(i);
            let level = &self.levels[i];
            let declared: BTreeSet<String> = level.as_fixed.union(&level.as_floating).cloned().collect();
            let mini = dag.minimal_dag(&declared).order();
            let upstream = dag.ancestors_of(level.as_fixed.iter().map(String::as_str));

            let mut fixed = level.as_fixed.clone();
            let mut floating = level.as_floating.clone();
            let mut all: BTreeSet<String> = above.union(&fixed).cloned().collect();
            for d in mini.iter().filter(|d| !declared.contains(*d)) {
                if upstream.contains(d) || !self.bn.has_randomness(d, &all) {
                    fixed.insert(d.clone());
                    all.insert(d.clone());
                } else {
                    floating.insert(d.clone());
                }
            }
            let rounds = self.settle(&mut fixed, &mut floating, &mut all);

            if level.parent.is_none() {
                for root in self.bn.roots() {
                    let external = matches!(
                        self.bn.get(root).map(|l| l.kind()),
                        Some(LociKind::Value | LociKind::ExoValue)
                    );
                    if external && !declared_anywhere.contains(root) {
                        fixed.insert(root.clone());
                    }
                }
            }

            let mut exo = BTreeSet::new();
            let mut listening = BTreeSet::new();
            for (k, node) in mini.iter().enumerate() {
                let req = dag.minimal_requirements(node, &mini[..k]);
                if floating.contains(node) {
                    listening.extend(req);
                } else {
                    exo.extend(req);
                }
            }
            let in_mini: BTreeSet<&String> = mini.iter().collect();
            listening.retain(|n| !in_mini.contains(n));
            exo.retain(|n| !fixed.contains(n) && !floating.contains(n));

            let level = &mut self.levels[i];
            level.fixed = fixed;
            level.floating = floating;
            level.exo = exo;
            level.listening = listening;
            level.rounds = rounds;
        }
    }

    fn raise_up_floating(&mut self) {
        for i in (0..self.levels.len()).rev() {
            let mut below = BTreeSet::new();
            for &c in &self.levels[i].children {
                let child = &self.levels[c];
                below.extend(child.will_be_floating.iter().cloned());
                below.extend(child.floating.iter().cloned());
            }
            self.levels[i].will_be_floating = below;
        }
    }

    fn resolve_relations(&mut self) {
        let bn = self.bn;
        let dag = bn.dag();
        for i in 0..self.levels.len() {
            let above = self.ancestor_fixed(i);
            let parent = self.levels[i].parent;
            let to_shift = self.bn.sort(self.levels[i].exo.iter().filter(|d| !above.contains(*d)));
            for d in to_shift {
                match parent {
                    Some(p) if !self.bn.has_randomness(&d, &above) => {
                        let target = [d.clone()];
                        let closure = dag.sufficient_nodes(&target, &above);
                        debug!(level = %self.levels[i].name, node = %d, "hoisting requirement to parent level");
                        self.levels[p]
                            .fixed
                            .extend(closure.into_iter().filter(|n| !above.contains(n)));
                    }
                    _ => {
                        let level = &mut self.levels[i];
                        level.exo.remove(&d);
                        level.fixed.insert(d);
                    }
                }
            }

            let above = self.ancestor_fixed(i);
            let level = &self.levels[i];
            let mut given: BTreeSet<String> = above.iter().chain(&level.fixed).chain(&level.exo).cloned().collect();
            let pending = self.bn.sort(
                level
                    .listening
                    .iter()
                    .filter(|d| !above.contains(*d) && !self.bn.is_exogenous(d)),
            );
            let mut fixed = Vec::new();
            let mut floating = Vec::new();
            for d in pending {
                if self.bn.has_randomness(&d, &given) {
                    floating.push(d);
                } else {
                    given.insert(d.clone());
                    fixed.push(d);
                }
            }
            let level = &mut self.levels[i];
            level.fixed.extend(fixed);
            level.floating.extend(floating);
            let Level {
                fixed,
                floating,
                exo,
                listening,
                ..
            } = level;
            listening.retain(|n| !fixed.contains(n) && !floating.contains(n) && !exo.contains(n));
        }
    }

    fn placed(&self) -> BTreeSet<String> {
        self.levels
            .iter()
            .flat_map(|l| l.fixed.iter().chain(&l.floating).cloned())
            .collect()
    }

    fn locate_undefined(&mut self) {
        let placed = self.placed();
        let pending: Vec<String> = self
            .bn
            .order()
            .iter()
            .filter(|n| !placed.contains(*n) && !self.bn.is_exogenous(n))
            .cloned()
            .collect();
        if pending.is_empty() || self.levels.is_empty() {
            return;
        }
        self.pass_down(0, BTreeSet::new(), BTreeSet::new(), pending.clone());

        let placed = self.placed();
        self.unplaced = pending.into_iter().filter(|n| !placed.contains(n)).collect();
        for node in &self.unplaced {
            warn!(node = %node, "node could not be placed at any level");
        }
    }

    fn pass_down(&mut self, i: usize, mut fixed_above: BTreeSet<String>, mut floating_above: BTreeSet<String>, nodes: Vec<String>) {
        fixed_above.extend(self.levels[i].fixed.iter().cloned());
        floating_above.extend(self.levels[i].floating.iter().cloned());
        floating_above.extend(fixed_above.iter().cloned());

        let mut remaining = Vec::new();
        for node in nodes {
            let parents: Vec<String> = self.bn.dag().parents(&node).map(str::to_string).collect();
            let level = &mut self.levels[i];
            if parents.iter().all(|p| fixed_above.contains(p)) {
                if self.bn.is_rv(&node) {
                    level.floating.insert(node.clone());
                } else {
                    level.fixed.insert(node.clone());
                    fixed_above.insert(node.clone());
                }
                floating_above.insert(node);
            } else if parents.iter().all(|p| floating_above.contains(p)) {
                level.floating.insert(node.clone());
                floating_above.insert(node);
            } else {
                remaining.push(node);
            }
        }
        if remaining.is_empty() {
            return;
        }
        for c in self.levels[i].children.clone() {
            self.pass_down(c, fixed_above.clone(), floating_above.clone(), remaining.clone());
        }
    }

    /// Drop anything an ancestor already fixes and make the four sets disjoint.
    fn prune(&mut self) {
        for i in 0..self.levels.len() {
            let above = self.ancestor_fixed(i);
            let level = &mut self.levels[i];
            let duplicated: Vec<String> = level.fixed.intersection(&above).cloned().collect();
            for d in duplicated {
                warn!(level = %level.name, node = %d, "node is already fixed above; dropping it here");
                level.fixed.remove(&d);
            }
            let shadowed: Vec<String> = level.floating.intersection(&above).cloned().collect();
            for d in shadowed {
                warn!(level = %level.name, node = %d, "floating node is fixed above; listening instead");
                level.floating.remove(&d);
                level.listening.insert(d);
            }
            let Level {
                fixed,
                floating,
                exo,
                listening,
                ..
            } = level;
            // a hoisted requirement can land on a node this level already floats
            floating.retain(|n| !fixed.contains(n));
            exo.retain(|n| !fixed.contains(n) && !floating.contains(n));
            listening.retain(|n| !fixed.contains(n) && !floating.contains(n) && !exo.contains(n));
        }
    }

    fn define_blueprints(&mut self) -> Result<(), ValidationError> {
        let bn = self.bn;
        let dag = bn.dag();
        for i in 0..self.levels.len() {
            let mut known = self.ancestor_fixed(i);
            let level = &self.levels[i];
            known.extend(level.fixed.iter().cloned());
            let targets: BTreeSet<&String> = level.floating.iter().chain(&level.will_be_floating).collect();

            let mut local = IndexMap::new();
            let mut shared = IndexMap::new();
            for d in self.bn.sort(targets) {
                let parents: BTreeSet<String> = self.bn.loci(&d)?.parents().into_iter().collect();
                let (own, group) = if parents.is_subset(&known) {
                    let to_read = self.bn.sort(&parents);
                    let frozen = ActorBlueprint::frozen(&d, to_read.clone());
                    let group = if parents.iter().any(|p| level.fixed.contains(p)) {
                        ActorBlueprint::single(&d, to_read)
                    } else {
                        frozen.clone()
                    };
                    (frozen, group)
                } else {
                    let target = [d.clone()];
                    let mut needed = dag.sufficient_nodes(&target, &known);
                    needed.remove(&d);
                    let (read, sample): (BTreeSet<String>, BTreeSet<String>) = needed
                        .into_iter()
                        .partition(|n| known.contains(n) || self.bn.is_exogenous(n));
                    let compound = ActorBlueprint::compound(&d, self.bn.sort(&read), self.bn.sort(&sample));
                    (compound.clone(), compound)
                };
                local.insert(d.clone(), own);
                shared.insert(d, group);
            }
            let level = &mut self.levels[i];
            level.local = local;
            level.shared = shared;
        }
        Ok(())
    }

    fn finish(self) -> Resolution {
        let bn = self.bn;
        let levels = self
            .levels
            .into_iter()
            .map(|l| {
                debug!(
                    level = %l.name,
                    fixed = l.fixed.len(),
                    floating = l.floating.len(),
                    exo = l.exo.len(),
                    listening = l.listening.len(),
                    rounds = l.rounds,
                    "resolved level"
                );
                ResolvedLevel {
                    fixed: bn.sort(&l.fixed),
                    floating: bn.sort(&l.floating),
                    exo: bn.sort(&l.exo),
                    listening: bn.sort(&l.listening),
                    will_be_floating: bn.sort(&l.will_be_floating),
                    local_samplers: l.local,
                    shared_samplers: l.shared,
                    rounds: l.rounds,
                }
            })
            .collect();
        Resolution {
            levels,
            unplaced: self.unplaced,
        }
    }
}
