//! The live instance tree.
//!
//! Parameter cores live in an arena owned by [`ParameterTree`]. A core refers
//! to its parent and children by [`PcId`]; the parent link is used only for
//! upward lookups, so detaching a child frees its whole subtree and nothing
//! else can keep it alive.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace};

use super::actor::Actor;
use super::simcore::SimulationCore;
use crate::env::{Empty, Layered, Lookup};
use crate::error::{ExecutionError, NestResult, ValidationError};
use crate::network::LociKind;

/// Handle to a parameter core inside its tree.
///
/// Slots are reused after a core is removed; the generation tells a stale
/// handle from the core that took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PcId {
    index: usize,
    generation: u32,
}

impl PcId {
    /// Arena slot.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// How many times the slot had been vacated when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// One instantiated level.
#[derive(Debug, Clone)]
pub struct ParameterCore {
    nickname: String,
    group: String,
    locus: IndexMap<String, f64>,
    log_prior: f64,
    log_likelihood: f64,
    parent: Option<PcId>,
    children: IndexMap<String, PcId>,
    actors: IndexMap<String, Actor>,
    children_actors: IndexMap<String, IndexMap<String, Actor>>,
}

impl ParameterCore {
    fn new(nickname: &str, group: &str, locus: IndexMap<String, f64>, log_prior: f64, parent: Option<PcId>) -> Self {
        Self {
            nickname: nickname.to_string(),
            group: group.to_string(),
            locus,
            log_prior,
            log_likelihood: 0.0,
            parent,
            children: IndexMap::new(),
            actors: IndexMap::new(),
            children_actors: IndexMap::new(),
        }
    }

    /// Name given at generation or breeding.
    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Simulation group this core instantiates.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Fixed values drawn for this core.
    #[must_use]
    pub fn locus(&self) -> &IndexMap<String, f64> {
        &self.locus
    }

    /// Log prior of the fixed values drawn for this core.
    #[must_use]
    pub fn log_prior(&self) -> f64 {
        self.log_prior
    }

    /// Log likelihood recorded for this core.
    #[must_use]
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Parent core.
    #[must_use]
    pub fn parent(&self) -> Option<PcId> {
        self.parent
    }

    /// Children by nickname.
    #[must_use]
    pub fn children(&self) -> &IndexMap<String, PcId> {
        &self.children
    }

    /// Samplers owned by this core.
    #[must_use]
    pub fn actors(&self) -> &IndexMap<String, Actor> {
        &self.actors
    }

    /// Samplers this core holds on behalf of all its children in `group`.
    #[must_use]
    pub fn children_actors(&self, group: &str) -> Option<&IndexMap<String, Actor>> {
        self.children_actors.get(group)
    }
}

/// An intervention on a parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Impulse {
    /// Override values.
    Set(IndexMap<String, f64>),
    /// Forget values and draw them again.
    Forget(Vec<String>),
}

impl Impulse {
    /// Override each named value.
    pub fn set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self::Set(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Redraw each named value.
    pub fn forget<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Forget(names.into_iter().map(Into::into).collect())
    }

    /// Targeted nodes.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::Set(values) => values.keys().cloned().collect(),
            Self::Forget(names) => names.clone(),
        }
    }

    fn value(&self, name: &str) -> Option<f64> {
        match self {
            Self::Set(values) => values.get(name).copied(),
            Self::Forget(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    core: Option<ParameterCore>,
}

/// Slot storage with a free list of vacated indices.
#[derive(Debug, Clone, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl Arena {
    fn get(&self, id: PcId) -> Option<&ParameterCore> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.core.as_ref())
    }

    fn get_mut(&mut self, id: PcId) -> Option<&mut ParameterCore> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.core.as_mut())
    }

    fn insert(&mut self, core: ParameterCore) -> PcId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.core = Some(core);
            return PcId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            core: Some(core),
        });
        PcId {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    fn release(&mut self, id: PcId) {
        let Some(slot) = self.slots.get_mut(id.index) else {
            return;
        };
        if slot.generation == id.generation && slot.core.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
        }
    }

    fn cores_mut(&mut self) -> impl Iterator<Item = &mut ParameterCore> {
        self.slots.iter_mut().filter_map(|s| s.core.as_mut())
    }
}

/// Upward view from one core through its ancestors.
struct CoreView<'a> {
    arena: &'a Arena,
    id: Option<PcId>,
}

impl Lookup for CoreView<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        let mut current = self.id;
        while let Some(id) = current {
            let pc = self.arena.get(id)?;
            if let Some(v) = pc.locus.get(name) {
                return Some(*v);
            }
            current = pc.parent;
        }
        None
    }
}

/// Upward view that reads loci staged by an impulse before the stored ones.
struct StagedView<'a> {
    arena: &'a Arena,
    staged: &'a HashMap<PcId, IndexMap<String, f64>>,
    id: Option<PcId>,
}

impl Lookup for StagedView<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        let mut current = self.id;
        while let Some(id) = current {
            let pc = self.arena.get(id)?;
            let locus = self.staged.get(&id).unwrap_or(&pc.locus);
            if let Some(v) = locus.get(name) {
                return Some(*v);
            }
            current = pc.parent;
        }
        None
    }
}

#[derive(Debug, Default)]
struct StagedImpulse {
    loci: HashMap<PcId, IndexMap<String, f64>>,
    priors: Vec<(PcId, f64)>,
    actors: Vec<ActorUpdate>,
}

#[derive(Debug)]
struct ActorUpdate {
    core: PcId,
    group: Option<String>,
    name: String,
    actor: Actor,
}

fn slot(arena: &Arena, id: PcId) -> NestResult<&ParameterCore> {
    arena
        .get(id)
        .ok_or_else(|| ExecutionError::CoreNotFound { index: id.index }.into())
}

fn slot_mut(arena: &mut Arena, id: PcId) -> NestResult<&mut ParameterCore> {
    arena
        .get_mut(id)
        .ok_or_else(|| ExecutionError::CoreNotFound { index: id.index }.into())
}

/// Sampler lookup: the core's own actors, then those its parent holds for its group.
fn find_actor<'a>(arena: &'a Arena, id: PcId, name: &str) -> NestResult<&'a Actor> {
    let pc = slot(arena, id)?;
    if let Some(actor) = pc.actors.get(name) {
        return Ok(actor);
    }
    if let Some(parent) = pc.parent {
        let hoisted = slot(arena, parent)?
            .children_actors
            .get(&pc.group)
            .and_then(|m| m.get(name));
        if let Some(actor) = hoisted {
            return Ok(actor);
        }
    }
    Err(ExecutionError::SamplerNotFound {
        name: name.to_string(),
        core: pc.nickname.clone(),
    }
    .into())
}

/// A tree of parameter cores generated from one [`SimulationCore`].
///
/// The tree owns its RNG, so a tree generated from a seeded core is
/// reproducible call for call. Access must be serialized by the caller.
#[derive(Debug)]
pub struct ParameterTree {
    core: Arc<SimulationCore>,
    arena: Arena,
    root: PcId,
    rng: ChaCha8Rng,
}

impl ParameterTree {
    pub(crate) fn generate(
        core: Arc<SimulationCore>,
        nickname: &str,
        exo: &dyn Lookup,
        mut rng: ChaCha8Rng,
    ) -> NestResult<Self> {
        let group = core.root_group()?;
        let bn = core.network();
        let drawn = group.generate(bn, core.config(), exo, &Empty, &mut rng)?;
        let actors = group.compose_local(bn, &drawn.locus)?;

        let mut pc = ParameterCore::new(nickname, group.name(), drawn.locus, drawn.log_prior, None);
        pc.actors = actors;
        info!(nickname = %nickname, group = %group.name(), fixed = pc.locus.len(), "generated parameter tree");
        let mut arena = Arena::default();
        let root = arena.insert(pc);
        Ok(Self {
            core,
            arena,
            root,
            rng,
        })
    }

    /// The core this tree was generated from.
    #[must_use]
    pub fn core(&self) -> &Arc<SimulationCore> {
        &self.core
    }

    /// Root handle.
    #[must_use]
    pub const fn root(&self) -> PcId {
        self.root
    }

    /// Number of live cores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.live
    }

    /// Slots held by the arena, live or vacated.
    #[must_use]
    pub fn allocated_slots(&self) -> usize {
        self.arena.slots.len()
    }

    /// A tree always holds its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Core by handle.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a detached or foreign handle.
    pub fn get(&self, id: PcId) -> NestResult<&ParameterCore> {
        slot(&self.arena, id)
    }

    /// Value of `name` at `id`, looked up through the ancestors.
    #[must_use]
    pub fn value(&self, id: PcId, name: &str) -> Option<f64> {
        CoreView {
            arena: &self.arena,
            id: Some(id),
        }
        .lookup(name)
    }

    /// Every value visible from `id`: ancestors first, then the core's own.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn values(&self, id: PcId) -> NestResult<IndexMap<String, f64>> {
        let mut path = vec![slot(&self.arena, id)?];
        while let Some(parent) = path[path.len() - 1].parent {
            path.push(slot(&self.arena, parent)?);
        }
        let mut out = IndexMap::new();
        for pc in path.iter().rev() {
            out.extend(pc.locus.iter().map(|(k, v)| (k.clone(), *v)));
        }
        Ok(out)
    }

    /// Child of `id` by nickname.
    ///
    /// # Errors
    ///
    /// Returns `ChildNotFound` if there is none.
    pub fn child(&self, id: PcId, nickname: &str) -> NestResult<PcId> {
        slot(&self.arena, id)?.children.get(nickname).copied().ok_or_else(|| {
            ExecutionError::ChildNotFound {
                nickname: nickname.to_string(),
            }
            .into()
        })
    }

    /// Follow an address such as `"Country@City@Agent"` down from `id`.
    ///
    /// The first segment names `id` itself and is skipped.
    ///
    /// # Errors
    ///
    /// Returns `ChildNotFound` at the first missing segment.
    pub fn find_descendant(&self, id: PcId, address: &str) -> NestResult<PcId> {
        let mut current = id;
        for nickname in address.split('@').skip(1) {
            current = self.child(current, nickname)?;
        }
        Ok(current)
    }

    /// Instantiate a child of `parent` in `group`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` if `group` is not a child group of the parent's
    /// group, `DuplicateNickname` if the nickname is taken, or any sampling error.
    /// Nothing is changed on error.
    pub fn breed(&mut self, parent: PcId, nickname: &str, group: &str) -> NestResult<PcId> {
        self.breed_with(parent, nickname, group, &Empty)
    }

    /// Instantiate a child with some fixed values given.
    ///
    /// # Errors
    ///
    /// Same as [`ParameterTree::breed`].
    pub fn breed_with(&mut self, parent: PcId, nickname: &str, group: &str, exo: &dyn Lookup) -> NestResult<PcId> {
        let core = Arc::clone(&self.core);
        let bn = core.network();
        let pc = slot(&self.arena, parent)?;
        let parent_group = core.group(&pc.group)?;
        if !parent_group.has_child(group) {
            return Err(ValidationError::UnknownGroup {
                parent: parent_group.name().to_string(),
                group: group.to_string(),
            }
            .into());
        }
        if pc.children.contains_key(nickname) {
            return Err(ValidationError::DuplicateNickname {
                parent: pc.nickname.clone(),
                nickname: nickname.to_string(),
            }
            .into());
        }
        let child_group = core.group(group)?;
        let hoist = core.config().hoist;
        let needs_shared = hoist && !pc.children_actors.contains_key(group);

        let upper = CoreView {
            arena: &self.arena,
            id: Some(parent),
        };
        let drawn = child_group.generate(bn, core.config(), exo, &upper, &mut self.rng)?;
        let shared = if needs_shared {
            Some(child_group.compose_shared(bn, &upper)?)
        } else {
            None
        };
        let actors = if hoist {
            IndexMap::new()
        } else {
            let mut env = Layered::new(&upper);
            env.top.clone_from(&drawn.locus);
            child_group.compose_local(bn, &env)?
        };

        let mut child = ParameterCore::new(nickname, group, drawn.locus, drawn.log_prior, Some(parent));
        child.actors = actors;
        let id = self.arena.insert(child);
        let pc = slot_mut(&mut self.arena, parent)?;
        pc.children.insert(nickname.to_string(), id);
        if let Some(shared) = shared {
            pc.children_actors.insert(group.to_string(), shared);
        }
        debug!(parent = %pc.nickname, nickname = %nickname, group = %group, id = %id, "bred parameter core");
        Ok(id)
    }

    /// Detach a child and free its subtree.
    ///
    /// # Errors
    ///
    /// Returns `ChildNotFound` if `parent` has no such child.
    pub fn remove(&mut self, parent: PcId, nickname: &str) -> NestResult<()> {
        let id = self.child(parent, nickname)?;
        let doomed = self.subtree(id)?;
        slot_mut(&mut self.arena, parent)?.children.shift_remove(nickname);
        for d in doomed {
            self.arena.release(d);
        }
        Ok(())
    }

    /// `id` and every core below it, parents before children.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn subtree(&self, id: PcId) -> NestResult<Vec<PcId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let pc = slot(&self.arena, next)?;
            out.push(next);
            stack.extend(pc.children.values().rev().copied());
        }
        Ok(out)
    }

    /// Sampler for `name` as seen from `id`.
    ///
    /// # Errors
    ///
    /// Returns `SamplerNotFound` if neither the core nor its parent holds one.
    pub fn get_sampler(&self, id: PcId, name: &str) -> NestResult<&Actor> {
        find_actor(&self.arena, id, name)
    }

    /// Names of every sampler reachable from `id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn list_samplers(&self, id: PcId) -> NestResult<Vec<String>> {
        let pc = slot(&self.arena, id)?;
        let mut names: Vec<String> = pc.actors.keys().cloned().collect();
        if let Some(parent) = pc.parent {
            if let Some(hoisted) = slot(&self.arena, parent)?.children_actors.get(&pc.group) {
                names.extend(hoisted.keys().filter(|k| !pc.actors.contains_key(*k)).cloned());
            }
        }
        Ok(names)
    }

    /// Draw one value of a floating node from `id`.
    ///
    /// # Errors
    ///
    /// Returns `SamplerNotFound`, or whatever the actor reports.
    pub fn sample(&mut self, id: PcId, name: &str) -> NestResult<f64> {
        let actor = find_actor(&self.arena, id, name)?;
        let view = CoreView {
            arena: &self.arena,
            id: Some(id),
        };
        actor.sample(self.core.network(), &view, &mut self.rng)
    }

    /// Draw `n` values (at least one).
    ///
    /// # Errors
    ///
    /// Returns `BatchTooLarge` above the configured limit, or any draw error.
    pub fn sample_n(&mut self, id: PcId, name: &str, n: usize) -> NestResult<Vec<f64>> {
        let n = n.max(1);
        let max = self.core.config().max_sample_batch;
        if n > max {
            return Err(ExecutionError::BatchTooLarge { requested: n, max }.into());
        }
        let actor = find_actor(&self.arena, id, name)?;
        let view = CoreView {
            arena: &self.arena,
            id: Some(id),
        };
        (0..n)
            .map(|_| actor.sample(self.core.network(), &view, &mut self.rng))
            .collect()
    }

    /// Draw a floating node together with the mediators resampled for it.
    ///
    /// # Errors
    ///
    /// Same as [`ParameterTree::sample`].
    pub fn sample_with_mediators(&mut self, id: PcId, name: &str) -> NestResult<IndexMap<String, f64>> {
        let actor = find_actor(&self.arena, id, name)?;
        let view = CoreView {
            arena: &self.arena,
            id: Some(id),
        };
        actor.sample_with_mediators(self.core.network(), &view, &mut self.rng)
    }

    /// Apply an intervention at `id` and cascade it through the subtree.
    ///
    /// Every fixed node downstream of the impulse is overwritten or redrawn in
    /// chain order, log priors are recomputed, and cached Frozen samplers of
    /// affected nodes are updated in place.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` for a name outside the network, or any
    /// resampling or sampler update error. Nothing is changed on error.
    pub fn impulse(&mut self, id: PcId, impulse: &Impulse) -> NestResult<()> {
        let core = Arc::clone(&self.core);
        let bn = core.network();
        let names = impulse.names();
        for name in &names {
            bn.loci(name)?;
        }
        let mut shocked: BTreeSet<String> = bn.dag().descendants_of(names.iter().map(String::as_str));
        shocked.extend(names);

        let order = self.subtree(id)?;
        let rng = self.rng.clone();
        match self.stage_impulse(&core, &order, impulse, &shocked) {
            Ok(staged) => self.commit_impulse(staged),
            Err(e) => {
                self.rng = rng;
                Err(e)
            }
        }
    }

    /// Compute every visited core's new locus, prior and samplers without touching the tree.
    fn stage_impulse(
        &mut self,
        core: &SimulationCore,
        order: &[PcId],
        impulse: &Impulse,
        shocked: &BTreeSet<String>,
    ) -> NestResult<StagedImpulse> {
        let bn = core.network();
        let mut staged = StagedImpulse::default();
        for &id in order {
            let pc = slot(&self.arena, id)?;
            let group = core.group(&pc.group)?;
            trace!(nickname = %pc.nickname, group = %pc.group, "impulse visit");

            let upper = StagedView {
                arena: &self.arena,
                staged: &staged.loci,
                id: pc.parent,
            };
            let mut env = Layered::new(&upper);
            env.top.clone_from(&pc.locus);
            let mut log_prior = 0.0;
            for name in group.fixed_chain() {
                let loci = bn.loci(name)?;
                if let Some(v) = impulse.value(name) {
                    env.insert(name.clone(), v);
                } else if shocked.contains(name) && loci.kind() != LociKind::ExoValue {
                    let v = loci.sample(&env, &mut self.rng)?;
                    env.insert(name.clone(), v);
                }
                if env.top.contains_key(name) {
                    log_prior += loci.evaluate(&env)?;
                }
            }
            let locus = env.top;
            staged.loci.insert(id, locus);
            staged.priors.push((id, log_prior));

            let view = StagedView {
                arena: &self.arena,
                staged: &staged.loci,
                id: Some(id),
            };
            let own = pc.actors.iter().map(|(name, a)| (None, name, a));
            let hoisted = pc
                .children_actors
                .iter()
                .flat_map(|(g, actors)| actors.iter().map(move |(name, a)| (Some(g), name, a)));
            let mut updates = Vec::new();
            for (g, name, actor) in own.chain(hoisted).filter(|(_, _, a)| shocked.contains(a.name())) {
                let mut fresh = actor.clone();
                fresh.update(bn, &view)?;
                updates.push(ActorUpdate {
                    core: id,
                    group: g.cloned(),
                    name: name.clone(),
                    actor: fresh,
                });
            }
            staged.actors.extend(updates);
        }
        Ok(staged)
    }

    /// Write staged values over existing entries so sampler addresses stay put.
    fn commit_impulse(&mut self, mut staged: StagedImpulse) -> NestResult<()> {
        for (id, log_prior) in staged.priors {
            let pc = slot_mut(&mut self.arena, id)?;
            if let Some(locus) = staged.loci.remove(&id) {
                pc.locus = locus;
            }
            pc.log_prior = log_prior;
        }
        for update in staged.actors {
            let pc = slot_mut(&mut self.arena, update.core)?;
            let target = match &update.group {
                None => pc.actors.get_mut(&update.name),
                Some(g) => pc.children_actors.get_mut(g).and_then(|m| m.get_mut(&update.name)),
            };
            if let Some(actor) = target {
                *actor = update.actor;
            }
        }
        Ok(())
    }

    /// Log prior of `id` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn deep_log_prior(&self, id: PcId) -> NestResult<f64> {
        self.subtree(id)?
            .into_iter()
            .map(|d| slot(&self.arena, d).map(ParameterCore::log_prior))
            .sum()
    }

    /// Record a log likelihood on `id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn set_log_likelihood(&mut self, id: PcId, value: f64) -> NestResult<()> {
        slot_mut(&mut self.arena, id)?.log_likelihood = value;
        Ok(())
    }

    /// Log prior plus log likelihood of `id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreNotFound` for a bad handle.
    pub fn log_posterior(&self, id: PcId) -> NestResult<f64> {
        let pc = slot(&self.arena, id)?;
        Ok(pc.log_prior + pc.log_likelihood)
    }

    /// Independent copy regenerated from the drawn values.
    ///
    /// Every core is generated again with its own locus as given input and
    /// its children are bred again in order, so samplers are freshly composed
    /// and nothing is shared with this tree. With `copy_core` the copy also
    /// gets its own simulation core. The copy draws from a new RNG stream.
    ///
    /// # Errors
    ///
    /// Propagates generation errors.
    pub fn clone_tree(&mut self, copy_core: bool) -> NestResult<ParameterTree> {
        let core = if copy_core {
            Arc::new(self.core.deep_copy()?)
        } else {
            Arc::clone(&self.core)
        };
        let rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
        let root = slot(&self.arena, self.root)?;
        let mut tree = ParameterTree::generate(core, &root.nickname, &root.locus, rng)?;
        let new_root = tree.root;
        tree.set_log_likelihood(new_root, root.log_likelihood)?;
        self.clone_children(self.root, &mut tree, new_root)?;
        Ok(tree)
    }

    fn clone_children(&self, from: PcId, tree: &mut ParameterTree, to: PcId) -> NestResult<()> {
        for (nickname, &child) in &slot(&self.arena, from)?.children {
            let pc = slot(&self.arena, child)?;
            let copied = tree.breed_with(to, nickname, &pc.group, &pc.locus)?;
            tree.set_log_likelihood(copied, pc.log_likelihood)?;
            self.clone_children(child, tree, copied)?;
        }
        Ok(())
    }

    /// Attach this tree to another core compiled from the same network.
    ///
    /// Drawn values are kept; samplers are composed again under the new core.
    ///
    /// # Errors
    ///
    /// Returns `NetworkMismatch` for a different network, `UnknownGroup` if
    /// the new core lacks a group in use, or any compose error. The tree is
    /// unchanged on error.
    pub fn reset_core(&mut self, core: Arc<SimulationCore>) -> NestResult<()> {
        if core.fingerprint() != self.core.fingerprint() {
            return Err(ValidationError::NetworkMismatch {
                expected: self.core.fingerprint().to_string(),
                actual: core.fingerprint().to_string(),
            }
            .into());
        }
        let bn = core.network();
        let mut local = Vec::new();
        let mut hoisted = Vec::new();
        for id in self.subtree(self.root)? {
            let pc = slot(&self.arena, id)?;
            let group = core.group(&pc.group).map_err(|_| ValidationError::UnknownGroup {
                parent: core.hierarchy().name().to_string(),
                group: pc.group.clone(),
            })?;
            let view = CoreView {
                arena: &self.arena,
                id: Some(id),
            };
            if pc.parent.is_none() || !core.config().hoist {
                local.push((id, group.compose_local(bn, &view)?));
            }
            if core.config().hoist {
                for child_group in group.children() {
                    let child = core.group(child_group)?;
                    let used = pc
                        .children
                        .values()
                        .any(|c| slot(&self.arena, *c).is_ok_and(|c| c.group == *child_group));
                    if used {
                        hoisted.push((id, child_group.clone(), child.compose_shared(bn, &view)?));
                    }
                }
            }
        }

        for pc in self.arena.cores_mut() {
            pc.actors.clear();
            pc.children_actors.clear();
        }
        for (id, actors) in local {
            slot_mut(&mut self.arena, id)?.actors = actors;
        }
        for (id, group, actors) in hoisted {
            slot_mut(&mut self.arena, id)?.children_actors.insert(group, actors);
        }
        self.core = core;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SimulationConfig;
    use crate::hierarchy::{BlueprintKind, NodeSet};
    use crate::network::bayes_net_from_script;
    use crate::registry::Registry;

    fn tree(script: &str, ns: NodeSet, config: SimulationConfig, exo: &[(&str, f64)]) -> ParameterTree {
        let bn = bayes_net_from_script(script, Arc::new(Registry::standard())).unwrap();
        let core = Arc::new(SimulationCore::new(Arc::new(bn), ns, config).unwrap());
        let exo: IndexMap<String, f64> = exo.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        core.generate("T", &exo).unwrap()
    }

    const BETABIN: &str = "PCore T { p ~ beta(1, 1); x ~ binom(n, p) }";

    fn country_agent() -> NodeSet {
        let mut ns = NodeSet::new("country").with_fixed(["p"]);
        ns.add_child(NodeSet::new("agent").with_floating(["x"])).unwrap();
        ns
    }

    #[test]
    fn test_generate_reads_exogenous() {
        let t = tree(BETABIN, NodeSet::new("root"), SimulationConfig::seeded(1), &[("n", 10.0)]);
        assert_eq!(t.value(t.root(), "n"), Some(10.0));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_missing_exogenous_fails_on_sampling() {
        let mut t = tree(BETABIN, NodeSet::new("root"), SimulationConfig::seeded(1), &[]);
        let root = t.root();
        assert!(t.get_sampler(root, "x").is_ok());
        assert!(t.sample(root, "x").unwrap_err().is_missing_input());
    }

    #[test]
    fn test_hoisted_samplers_are_shared() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(2), &[("n", 10.0)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        let b = t.breed(root, "B", "agent").unwrap();
        let xa = t.get_sampler(a, "x").unwrap();
        let xb = t.get_sampler(b, "x").unwrap();
        assert!(std::ptr::eq(xa, xb));
        assert_eq!(xa.kind(), BlueprintKind::Frozen);
        assert!(t.get(a).unwrap().actors().is_empty());
        assert_eq!(t.list_samplers(a).unwrap(), ["x"]);
        let x = t.sample(a, "x").unwrap();
        assert!((0.0..=10.0).contains(&x));
    }

    #[test]
    fn test_without_hoisting_each_child_owns_samplers() {
        let config = SimulationConfig::seeded(3).with_hoist(false);
        let mut t = tree(BETABIN, country_agent(), config, &[("n", 10.0)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        let b = t.breed(root, "B", "agent").unwrap();
        assert!(!std::ptr::eq(t.get_sampler(a, "x").unwrap(), t.get_sampler(b, "x").unwrap()));
        assert!(t.get(root).unwrap().children_actors("agent").is_none());
    }

    #[test]
    fn test_breed_errors_leave_tree_unchanged() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(4), &[("n", 10.0)]);
        let root = t.root();
        t.breed(root, "A", "agent").unwrap();
        let dup = t.breed(root, "A", "agent").unwrap_err();
        assert!(dup.is_validation());
        let unknown = t.breed(root, "B", "city").unwrap_err();
        assert!(unknown.is_validation());
        assert_eq!(t.len(), 2);
        assert!(t.get_sampler(root, "nope").unwrap_err().is_lookup());
    }

    #[test]
    fn test_sample_n_bounds() {
        let config = SimulationConfig {
            max_sample_batch: 5,
            ..SimulationConfig::seeded(5)
        };
        let mut t = tree(BETABIN, country_agent(), config, &[("n", 10.0)]);
        let root = t.root();
        assert_eq!(t.sample_n(root, "x", 0).unwrap().len(), 1);
        assert_eq!(t.sample_n(root, "x", 5).unwrap().len(), 5);
        assert!(matches!(
            t.sample_n(root, "x", 6),
            Err(crate::error::NestError::Execution(ExecutionError::BatchTooLarge { .. }))
        ));
    }

    #[test]
    fn test_find_and_remove_descendants() {
        let mut ns = NodeSet::new("country").with_fixed(["p"]);
        ns.add_child(NodeSet::new("city"))
            .unwrap()
            .add_child(NodeSet::new("agent").with_floating(["x"]))
            .unwrap();
        let mut t = tree(BETABIN, ns, SimulationConfig::seeded(6), &[("n", 3.0)]);
        let root = t.root();
        let city = t.breed(root, "Leeds", "city").unwrap();
        let agent = t.breed(city, "Ann", "agent").unwrap();
        assert_eq!(t.find_descendant(root, "T@Leeds@Ann").unwrap(), agent);
        assert!(t.find_descendant(root, "T@York").unwrap_err().is_lookup());

        t.remove(root, "Leeds").unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.get(agent).unwrap_err().is_lookup());
        assert!(t.get(root).unwrap().children().is_empty());
    }

    #[test]
    fn test_values_walk_ancestors() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(7), &[("n", 10.0), ("p", 0.3)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        let values = t.values(a).unwrap();
        assert_eq!(values["n"], 10.0);
        assert_eq!(values["p"], 0.3);
        assert!(t.get(a).unwrap().locus().is_empty());
    }

    #[test]
    fn test_impulse_updates_frozen_in_place() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(8), &[("n", 10.0), ("p", 0.3)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        let before: *const Actor = t.get_sampler(a, "x").unwrap();

        t.impulse(root, &Impulse::set([("n", 4.0)])).unwrap();
        let after = t.get_sampler(a, "x").unwrap();
        assert!(std::ptr::eq(before, after));
        assert_eq!(
            after.distribution(),
            Some(&crate::distribution::Distribution::binomial(4.0, 0.3).unwrap())
        );
        assert_eq!(t.value(a, "n"), Some(4.0));
    }

    #[test]
    fn test_failed_impulse_leaves_tree_unchanged() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(12), &[("n", 10.0), ("p", 0.3)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        let locus = t.get(root).unwrap().locus().clone();
        let prior = t.get(root).unwrap().log_prior();

        assert!(t.impulse(root, &Impulse::set([("p", 2.0)])).is_err());
        assert_eq!(t.get(root).unwrap().locus(), &locus);
        assert_eq!(t.get(root).unwrap().log_prior(), prior);
        assert_eq!(t.value(root, "p"), Some(0.3));
        assert_eq!(
            t.get_sampler(a, "x").unwrap().distribution(),
            Some(&crate::distribution::Distribution::binomial(10.0, 0.3).unwrap())
        );
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(13), &[("n", 10.0)]);
        let root = t.root();
        for i in 0..1000 {
            t.breed(root, &format!("a{i}"), "agent").unwrap();
            t.remove(root, &format!("a{i}")).unwrap();
        }
        assert_eq!(t.len(), 1);
        assert!(t.allocated_slots() <= 2);
    }

    #[test]
    fn test_stale_handles_are_rejected() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(14), &[("n", 10.0)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();
        t.remove(root, "A").unwrap();
        let b = t.breed(root, "B", "agent").unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(t.get(a).unwrap_err().is_lookup());
        assert!(t.sample(a, "x").unwrap_err().is_lookup());
        assert_eq!(t.get(b).unwrap().nickname(), "B");
    }

    #[test]
    fn test_impulse_rejects_unknown_nodes() {
        let mut t = tree(BETABIN, NodeSet::new("root"), SimulationConfig::seeded(9), &[("n", 1.0)]);
        let root = t.root();
        assert!(t.impulse(root, &Impulse::forget(["zzz"])).unwrap_err().is_validation());
    }

    #[test]
    fn test_log_posterior() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(10), &[("n", 10.0), ("p", 0.5)]);
        let root = t.root();
        t.set_log_likelihood(root, -2.5).unwrap();
        assert_eq!(t.log_posterior(root).unwrap(), -2.5);
        assert_eq!(t.deep_log_prior(root).unwrap(), 0.0);
    }

    #[test]
    fn test_reset_core_checks_network() {
        let mut t = tree(BETABIN, country_agent(), SimulationConfig::seeded(11), &[("n", 10.0)]);
        let root = t.root();
        let a = t.breed(root, "A", "agent").unwrap();

        let same = Arc::new(t.core().deep_copy().unwrap());
        t.reset_core(Arc::clone(&same)).unwrap();
        assert!(Arc::ptr_eq(t.core(), &same));
        assert!(t.get_sampler(a, "x").is_ok());

        let other = bayes_net_from_script("PCore U { q ~ beta(2, 2) }", Arc::new(Registry::standard())).unwrap();
        let other = Arc::new(SimulationCore::flat(Arc::new(other), SimulationConfig::default()).unwrap());
        assert!(t.reset_core(other).unwrap_err().is_validation());
    }
}
