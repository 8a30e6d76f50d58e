use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use proptest::prelude::*;

use nestdag::{bayes_net_from_script, BayesianNetwork, NodeSet, Registry, SimulationConfig, SimulationCore};

/// Node `i` draws parents from `v0..v{i-1}` through the bits of its mask.
fn script(nodes: &[(u32, bool)]) -> String {
    let mut out = String::from("PCore Random {\n");
    for (i, (mask, stochastic)) in nodes.iter().enumerate() {
        let parents: Vec<String> = (0..i).filter(|j| mask & (1 << j) != 0).map(|j| format!("v{j}")).collect();
        let sum = if parents.is_empty() {
            "0".to_string()
        } else {
            parents.join(" + ")
        };
        let line = match (stochastic, parents.is_empty()) {
            (true, _) => format!("v{i} ~ norm({sum}, 1)"),
            (false, true) => format!("v{i} = 1"),
            (false, false) => format!("v{i} = {sum} + 1"),
        };
        out.push_str("    ");
        out.push_str(&line);
        out.push('\n');
    }
    out.push('}');
    out
}

fn network(nodes: &[(u32, bool)]) -> BayesianNetwork {
    bayes_net_from_script(&script(nodes), Arc::new(Registry::standard())).unwrap()
}

/// What each level of the generated tree declares.
///
/// The tree is `root -> {a -> g, b}`; `b` repeats the declarations of `a` so
/// the two siblings overlap.
struct Declarations {
    root: BTreeSet<String>,
    a_fixed: BTreeSet<String>,
    a_floating: BTreeSet<String>,
    g_fixed: BTreeSet<String>,
    g_floating: BTreeSet<String>,
}

impl Declarations {
    /// Role of node `i` is `roles[i] % 6`: none, root fixed, `a` fixed, `a`
    /// floating, `g` fixed, `g` floating. Floating picks that feed a fixed
    /// node on the same or a higher level are dropped.
    fn new(bn: &BayesianNetwork, roles: &[u8]) -> Self {
        let pick = |role: u8| -> BTreeSet<String> {
            (0..bn.len())
                .filter(|&i| roles.get(i).map(|r| r % 6) == Some(role))
                .map(|i| format!("v{i}"))
                .collect()
        };
        let root = pick(1);
        let a_fixed = pick(2);
        let g_fixed = pick(4);
        let dag = bn.dag();
        let above_a = dag.ancestors_of(root.iter().chain(&a_fixed).map(String::as_str));
        let above_g = dag.ancestors_of(root.iter().chain(&a_fixed).chain(&g_fixed).map(String::as_str));
        let a_floating = pick(3).into_iter().filter(|v| !above_a.contains(v)).collect();
        let g_floating = pick(5).into_iter().filter(|v| !above_g.contains(v)).collect();
        Self {
            root,
            a_fixed,
            a_floating,
            g_fixed,
            g_floating,
        }
    }

    fn tree(&self) -> NodeSet {
        let sibling = |name: &str| {
            NodeSet::new(name)
                .with_fixed(self.a_fixed.iter().cloned())
                .with_floating(self.a_floating.iter().cloned())
        };
        let mut root = NodeSet::new("root").with_fixed(self.root.iter().cloned());
        root.add_child(sibling("a"))
            .unwrap()
            .add_child(
                NodeSet::new("g")
                    .with_fixed(self.g_fixed.iter().cloned())
                    .with_floating(self.g_floating.iter().cloned()),
            )
            .unwrap();
        root.add_child(sibling("b")).unwrap();
        root
    }
}

const PATHS: [&[&str]; 2] = [&["root", "a", "g"], &["root", "b"]];

/// Fixed on `path[at]` or any level above it.
fn fixed_along(ns: &NodeSet, path: &[&str], at: usize, node: &str) -> bool {
    path[..=at]
        .iter()
        .any(|l| ns.find(l).unwrap().fixed_nodes().iter().any(|f| f == node))
}

fn nodes_strategy() -> impl Strategy<Value = Vec<(u32, bool)>> {
    prop::collection::vec((any::<u32>(), any::<bool>()), 2..8)
}

fn roles_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 8)
}

proptest! {
    #[test]
    fn order_is_topological(nodes in nodes_strategy()) {
        let bn = network(&nodes);
        prop_assert_eq!(bn.len(), nodes.len());
        prop_assert!(bn.dag().is_topological(bn.order()));
        for name in bn.order() {
            for p in bn.dag().parents(name) {
                let pos = |n: &str| bn.order().iter().position(|x| x == n);
                prop_assert!(pos(p) < pos(name));
            }
        }
    }

    #[test]
    fn json_round_trip_keeps_fingerprint(nodes in nodes_strategy()) {
        let bn = network(&nodes);
        let text = bn.to_json_string().unwrap();
        let back = BayesianNetwork::from_json_str(&text, Arc::new(Registry::standard())).unwrap();
        prop_assert_eq!(back.fingerprint().unwrap(), bn.fingerprint().unwrap());
    }

    #[test]
    fn resolved_levels_partition_nodes(nodes in nodes_strategy(), roles in roles_strategy()) {
        let bn = network(&nodes);
        let mut ns = Declarations::new(&bn, &roles).tree();
        ns.inject_bn(&bn).unwrap();
        prop_assert!(ns.unplaced().is_empty());

        for level in ns.levels() {
            let fixed: BTreeSet<&String> = level.fixed_nodes().iter().collect();
            let floating: BTreeSet<&String> = level.floating_nodes().iter().collect();
            let listening: BTreeSet<&String> = level.listening_nodes().iter().collect();
            prop_assert!(fixed.is_disjoint(&floating));
            prop_assert!(fixed.is_disjoint(&listening));
            prop_assert!(floating.is_disjoint(&listening));
            prop_assert_eq!(bn.sort(level.fixed_nodes()), level.fixed_nodes().to_vec());
        }

        // siblings may fix the same node; one path may not
        for path in PATHS {
            let mut seen: BTreeSet<&String> = BTreeSet::new();
            for name in path {
                for f in ns.find(name).unwrap().fixed_nodes() {
                    prop_assert!(seen.insert(f), "{} fixed twice along {:?}", f, path);
                }
            }
        }
    }

    #[test]
    fn declared_nodes_land_on_their_path(nodes in nodes_strategy(), roles in roles_strategy()) {
        let bn = network(&nodes);
        let decl = Declarations::new(&bn, &roles);
        let mut ns = decl.tree();
        ns.inject_bn(&bn).unwrap();

        for v in &decl.root {
            prop_assert!(fixed_along(&ns, &["root"], 0, v));
        }
        for (path, at, fixed, floating) in [
            (PATHS[0], 1, &decl.a_fixed, &decl.a_floating),
            (PATHS[1], 1, &decl.a_fixed, &decl.a_floating),
            (PATHS[0], 2, &decl.g_fixed, &decl.g_floating),
        ] {
            let level = ns.find(path[at]).unwrap();
            for v in fixed {
                prop_assert!(fixed_along(&ns, path, at, v), "{} not fixed on {:?}", v, &path[..=at]);
            }
            for v in floating {
                let here = level.floating_nodes().contains(v) || level.fixed_nodes().contains(v);
                prop_assert!(here || fixed_along(&ns, path, at, v), "{} lost from {}", v, path[at]);
            }
        }
    }

    #[test]
    fn resolution_is_idempotent(nodes in nodes_strategy(), roles in roles_strategy()) {
        let bn = network(&nodes);
        let mut first = Declarations::new(&bn, &roles).tree();
        first.inject_bn(&bn).unwrap();
        let snapshot = first.clone();
        first.defrost();
        first.inject_bn(&bn).unwrap();
        prop_assert_eq!(first, snapshot);
    }

    #[test]
    fn every_sampler_can_draw(nodes in nodes_strategy(), roles in roles_strategy(), seed in any::<u64>()) {
        let bn = network(&nodes);
        let ns = Declarations::new(&bn, &roles).tree();
        let core = Arc::new(SimulationCore::new(Arc::new(bn), ns, SimulationConfig::seeded(seed)).unwrap());
        let mut tree = core.generate("T", &IndexMap::<String, f64>::new()).unwrap();
        let root = tree.root();
        let a = tree.breed(root, "a1", "a").unwrap();
        let g = tree.breed(a, "g1", "g").unwrap();
        let b = tree.breed(root, "b1", "b").unwrap();
        for id in [root, a, g, b] {
            for name in tree.list_samplers(id).unwrap() {
                let v = tree.sample(id, &name).unwrap();
                prop_assert!(v.is_finite());
            }
        }
        prop_assert!(tree.deep_log_prior(root).unwrap().is_finite());
    }
}
