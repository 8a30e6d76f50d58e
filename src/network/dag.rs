//! Directed acyclic graph over node names and the closure queries built on it.
//!
//! All queries are pure. Set-valued results are `BTreeSet`s so iteration order
//! is stable; callers that need dependency order pass them through [`Dag::sort`].

use std::collections::{BTreeSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Links {
    parents: IndexSet<String>,
    children: IndexSet<String>,
}

/// A DAG keyed by node name. Nodes keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag {
    nodes: IndexMap<String, Links>,
}

impl Dag {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(node, parents)` pairs. Missing parents are added as nodes.
    ///
    /// Does not check for cycles; see [`Dag::is_acyclic`].
    pub fn from_edges<'a, I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, P)>,
        P: IntoIterator<Item = &'a str>,
    {
        let mut dag = Self::new();
        for (node, parents) in entries {
            dag.add_node(node);
            for p in parents {
                dag.add_node(p);
                dag.add_edge(p, node);
            }
        }
        dag
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `name` is a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Add a node if absent.
    pub fn add_node(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), Links::default());
        }
    }

    /// Add an edge between two existing nodes. Returns false if either is missing.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        if let Some(l) = self.nodes.get_mut(from) {
            l.children.insert(to.to_string());
        }
        if let Some(l) = self.nodes.get_mut(to) {
            l.parents.insert(from.to_string());
        }
        true
    }

    /// Remove every edge into `name`.
    pub fn clear_parents(&mut self, name: &str) {
        let parents = match self.nodes.get_mut(name) {
            Some(l) => std::mem::take(&mut l.parents),
            None => return,
        };
        for p in parents {
            if let Some(l) = self.nodes.get_mut(&p) {
                l.children.shift_remove(name);
            }
        }
    }

    /// Remove a node and its edges, keeping the order of the others.
    pub fn remove_node(&mut self, name: &str) {
        self.clear_parents(name);
        if let Some(links) = self.nodes.shift_remove(name) {
            for c in links.children {
                if let Some(l) = self.nodes.get_mut(&c) {
                    l.parents.shift_remove(name);
                }
            }
        }
    }

    /// Direct parents.
    pub fn parents(&self, name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(name)
            .into_iter()
            .flat_map(|l| l.parents.iter().map(String::as_str))
    }

    /// Direct children.
    pub fn children(&self, name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(name)
            .into_iter()
            .flat_map(|l| l.children.iter().map(String::as_str))
    }

    fn reach<'a, F, I>(&'a self, starts: impl IntoIterator<Item = &'a str>, next: F) -> BTreeSet<String>
    where
        F: Fn(&'a Self, &'a str) -> I,
        I: Iterator<Item = &'a str>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = starts.into_iter().collect();
        while let Some(n) = queue.pop_front() {
            for m in next(self, n) {
                if seen.insert(m.to_string()) {
                    queue.push_back(m);
                }
            }
        }
        seen
    }

    /// All nodes with a path to `name`, excluding `name`.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        self.ancestors_of([name])
    }

    /// All nodes reachable from `name`, excluding `name`.
    #[must_use]
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        self.descendants_of([name])
    }

    /// Union of the ancestors of every node in `names`.
    ///
    /// A member of `names` is included only if it is an ancestor of another member.
    pub fn ancestors_of<'a>(&'a self, names: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        self.reach(names, |g, n| g.parents(n))
    }

    /// Union of the descendants of every node in `names`.
    pub fn descendants_of<'a>(&'a self, names: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        self.reach(names, |g, n| g.children(n))
    }

    /// Returns true if adding edges `parents -> name` would close a cycle.
    #[must_use]
    pub fn would_cycle(&self, name: &str, parents: &[String]) -> bool {
        if parents.iter().any(|p| p == name) {
            return true;
        }
        let below = self.descendants(name);
        parents.iter().any(|p| below.contains(p))
    }

    /// Topological order. Ties are broken by insertion order, so the result is deterministic.
    ///
    /// Nodes on a cycle are left out; compare lengths or use [`Dag::is_acyclic`].
    #[must_use]
    pub fn order(&self) -> Vec<String> {
        let mut indegree: Vec<usize> = self.nodes.values().map(|l| l.parents.len()).collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_first() {
            let Some((name, links)) = self.nodes.get_index(i) else {
                continue;
            };
            out.push(name.clone());
            for c in &links.children {
                if let Some(j) = self.nodes.get_index_of(c) {
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        ready.insert(j);
                    }
                }
            }
        }
        out
    }

    /// Returns true if every node can be ordered.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        self.order().len() == self.nodes.len()
    }

    /// Returns true if `order` lists every node once, each after all of its parents.
    #[must_use]
    pub fn is_topological(&self, order: &[String]) -> bool {
        if order.len() != self.nodes.len() {
            return false;
        }
        let mut pos = IndexMap::with_capacity(order.len());
        for (i, n) in order.iter().enumerate() {
            if !self.contains(n) || pos.insert(n.as_str(), i).is_some() {
                return false;
            }
        }
        self.nodes.iter().all(|(n, l)| {
            l.parents
                .iter()
                .all(|p| pos.get(p.as_str()) < pos.get(n.as_str()))
        })
    }

    /// Nodes with no parents, in order.
    #[must_use]
    pub fn roots(&self) -> Vec<String> {
        self.order()
            .into_iter()
            .filter(|n| self.nodes.get(n).is_some_and(|l| l.parents.is_empty()))
            .collect()
    }

    /// Nodes with no children, in order.
    #[must_use]
    pub fn leaves(&self) -> Vec<String> {
        self.order()
            .into_iter()
            .filter(|n| self.nodes.get(n).is_some_and(|l| l.children.is_empty()))
            .collect()
    }

    /// The members of `names` that are nodes, in topological order.
    #[must_use]
    pub fn sort<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let wanted: BTreeSet<&str> = names.into_iter().map(String::as_str).collect();
        self.order()
            .into_iter()
            .filter(|n| wanted.contains(n.as_str()))
            .collect()
    }

    /// Induced subgraph on `names`.
    #[must_use]
    pub fn subgraph(&self, names: &BTreeSet<String>) -> Self {
        let mut sub = Self::new();
        for (n, _) in self.nodes.iter().filter(|(n, _)| names.contains(*n)) {
            sub.add_node(n);
        }
        for (n, l) in self.nodes.iter().filter(|(n, _)| names.contains(*n)) {
            for p in l.parents.iter().filter(|p| names.contains(*p)) {
                sub.add_edge(p, n);
            }
        }
        sub
    }

    /// Induced subgraph covering every path between members of `names`.
    ///
    /// The extra nodes are the mediators implied by the chosen set.
    #[must_use]
    pub fn minimal_dag(&self, names: &BTreeSet<String>) -> Self {
        let starts = names.iter().map(String::as_str).filter(|n| self.contains(n));
        let below = self.descendants_of(starts.clone());
        let above = self.ancestors_of(starts);
        let mut keep: BTreeSet<String> = below.intersection(&above).cloned().collect();
        keep.extend(names.iter().filter(|n| self.contains(n)).cloned());
        self.subgraph(&keep)
    }

    /// Ancestors of `target` that still matter once `given` are known.
    ///
    /// Every `given` node that is itself an ancestor of `target` hides its own history.
    #[must_use]
    pub fn minimal_requirements<'a, I>(&self, target: &str, given: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut req = self.ancestors(target);
        let gates: Vec<&str> = given
            .into_iter()
            .filter(|g| req.contains(*g))
            .map(String::as_str)
            .collect();
        for hidden in self.ancestors_of(gates) {
            req.remove(&hidden);
        }
        req
    }

    /// Copy of the graph with every edge into `given` removed.
    #[must_use]
    pub fn severed<'a, I>(&self, given: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut g = self.clone();
        for n in given {
            g.clear_parents(n);
        }
        g
    }

    /// Nodes needed to compute `included` when `given` are supplied externally.
    ///
    /// Ancestors are taken on a copy whose in-edges into `given` are cut.
    #[must_use]
    pub fn sufficient_nodes<'a, I, J>(&self, included: I, given: J) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
        J: IntoIterator<Item = &'a String>,
    {
        let cut = self.severed(given);
        let included: Vec<&str> = included
            .into_iter()
            .map(String::as_str)
            .filter(|n| cut.contains(n))
            .collect();
        let mut out = cut.ancestors_of(included.iter().copied());
        out.extend(included.iter().map(|s| (*s).to_string()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Dag {
        // A -> B, B -> C, B -> D, C -> D
        Dag::from_edges([("A", vec![]), ("B", vec!["A"]), ("C", vec!["B"]), ("D", vec!["B", "C"])])
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_ancestors_descendants() {
        let g = diamond();
        assert_eq!(g.ancestors("D"), set(&["A", "B", "C"]));
        assert_eq!(g.descendants("B"), set(&["C", "D"]));
        assert!(g.ancestors("A").is_empty());
    }

    #[test]
    fn test_minimal_dag_finds_mediators() {
        let g = diamond();
        let m = g.minimal_dag(&set(&["B", "D"]));
        assert!(m.contains("C"));
        assert!(!m.contains("A"));
        assert_eq!(m.order(), vec!["B", "C", "D"]);
    }

    #[test]
    fn test_minimal_requirements() {
        let g = diamond();
        assert_eq!(g.minimal_requirements("D", &set(&[])), set(&["A", "B", "C"]));
        assert_eq!(g.minimal_requirements("D", &set(&["B"])), set(&["B", "C"]));
        assert_eq!(g.minimal_requirements("B", &set(&[])), set(&["A"]));
        // a given node outside the ancestry has no effect
        assert_eq!(g.minimal_requirements("C", &set(&["D"])), set(&["A", "B"]));
    }

    #[test]
    fn test_sufficient_nodes_cuts_given() {
        let g = diamond();
        assert_eq!(g.sufficient_nodes(&set(&["D"]), &set(&["B"])), set(&["B", "C", "D"]));
        assert_eq!(g.sufficient_nodes(&set(&["D"]), &set(&["C"])), set(&["A", "B", "C", "D"]));
        assert_eq!(g.sufficient_nodes(&set(&["C"]), &set(&["C"])), set(&["C"]));
        // the source graph is untouched
        assert_eq!(g.ancestors("D").len(), 3);
    }

    #[test]
    fn test_order_is_deterministic() {
        let g = Dag::from_edges([("z", vec![]), ("y", vec!["z"]), ("a", vec![]), ("b", vec!["a", "y"])]);
        assert_eq!(g.order(), vec!["z", "y", "a", "b"]);
        assert!(g.is_topological(&g.order()));
        assert_eq!(g.roots(), vec!["z", "a"]);
        assert_eq!(g.leaves(), vec!["b"]);
        assert_eq!(g.sort(&set(&["b", "z"])), vec!["z", "b"]);
    }

    #[test]
    fn test_would_cycle() {
        let g = diamond();
        assert!(g.would_cycle("A", &["D".to_string()]));
        assert!(g.would_cycle("E", &["E".to_string()]));
        assert!(!g.would_cycle("E", &["D".to_string()]));
    }

    #[test]
    fn test_remove_node_keeps_others() {
        let mut g = diamond();
        g.remove_node("C");
        assert_eq!(g.order(), vec!["A", "B", "D"]);
        assert_eq!(g.parents("D").collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_is_topological_rejects_bad_orders() {
        let g = diamond();
        let bad: Vec<String> = ["B", "A", "C", "D"].iter().map(|s| (*s).to_string()).collect();
        assert!(!g.is_topological(&bad));
        let short: Vec<String> = ["A", "B"].iter().map(|s| (*s).to_string()).collect();
        assert!(!g.is_topological(&short));
    }
}
