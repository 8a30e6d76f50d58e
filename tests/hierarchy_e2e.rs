use std::sync::Arc;

use indexmap::IndexMap;

use nestdag::{
    bayes_net_from_script, BlueprintKind, Impulse, NodeSet, ParameterTree, PcId, Registry, SimulationConfig,
    SimulationCore,
};

const CHAIN: &str = "
PCore chain {
    a = 1
    b = a + 3      # shifted
    c = b * 2
    d ~ binom(b, 0.5)
    e = d + c
}
";

fn chain_core(config: SimulationConfig) -> Arc<SimulationCore> {
    let bn = bayes_net_from_script(CHAIN, Arc::new(Registry::standard())).unwrap();
    let mut root = NodeSet::new("root").with_fixed(["a"]);
    let med = root
        .add_child(NodeSet::new("med").with_fixed(["b"]).with_floating(["d"]))
        .unwrap();
    med.add_child(NodeSet::new("leaf").with_fixed(["e"])).unwrap();
    Arc::new(SimulationCore::new(Arc::new(bn), root, config).unwrap())
}

struct World {
    tree: ParameterTree,
    m1: PcId,
    l1: PcId,
    m2: PcId,
    l2: PcId,
}

fn world() -> World {
    let core = chain_core(SimulationConfig::seeded(2024));
    let mut tree = core.generate("world", &IndexMap::<String, f64>::new()).unwrap();
    let root = tree.root();
    let m1 = tree.breed(root, "m1", "med").unwrap();
    let l1 = tree.breed(m1, "l1", "leaf").unwrap();
    let m2 = tree.breed(root, "m2", "med").unwrap();
    let l2 = tree.breed(m2, "l2", "leaf").unwrap();
    World { tree, m1, l1, m2, l2 }
}

fn local(tree: &ParameterTree, id: PcId, name: &str) -> f64 {
    tree.get(id).unwrap().locus()[name]
}

#[test]
fn resolved_sets_place_each_node_where_it_is_drawn() {
    let core = chain_core(SimulationConfig::default());
    let ns = core.hierarchy();
    assert_eq!(ns.fixed_nodes(), ["a"]);

    let med = ns.find("med").unwrap();
    assert_eq!(med.fixed_nodes(), ["b", "c"]);
    assert_eq!(med.floating_nodes(), ["d"]);

    let leaf = ns.find("leaf").unwrap();
    assert_eq!(leaf.fixed_nodes(), ["d", "e"]);
    assert_eq!(leaf.exo_nodes(), ["a", "b", "c"]);

    let med_group = core.group("med").unwrap();
    assert_eq!(med_group.fixed_chain(), ["b", "c"]);
    assert_eq!(med_group.shared_blueprints()["d"].kind, BlueprintKind::Single);
}

#[test]
fn generation_follows_the_chain() {
    let w = world();
    assert_eq!(local(&w.tree, w.tree.root(), "a"), 1.0);
    assert_eq!(local(&w.tree, w.m1, "b"), 4.0);
    assert_eq!(local(&w.tree, w.m1, "c"), 8.0);

    let d = local(&w.tree, w.l1, "d");
    assert!((0.0..=4.0).contains(&d));
    assert_eq!(local(&w.tree, w.l1, "e"), d + 8.0);
    assert!(w.tree.get(w.l1).unwrap().log_prior() <= 0.0);
}

#[test]
fn impulse_at_root_cascades_to_every_level() {
    let mut w = world();
    let root = w.tree.root();
    w.tree.impulse(root, &Impulse::set([("a", 7.0)])).unwrap();

    assert_eq!(local(&w.tree, root, "a"), 7.0);
    for (med, leaf) in [(w.m1, w.l1), (w.m2, w.l2)] {
        assert_eq!(local(&w.tree, med, "b"), 10.0);
        assert_eq!(local(&w.tree, med, "c"), 20.0);
        let d = local(&w.tree, leaf, "d");
        assert!((0.0..=10.0).contains(&d));
        assert_eq!(local(&w.tree, leaf, "e"), d + 20.0);
    }

    let d = w.tree.sample(w.m1, "d").unwrap();
    assert!((0.0..=10.0).contains(&d));
}

#[test]
fn impulse_on_one_branch_leaves_siblings_alone() {
    let mut w = world();
    let before_m2 = w.tree.get(w.m2).unwrap().locus().clone();
    let before_l2 = w.tree.get(w.l2).unwrap().locus().clone();

    w.tree.impulse(w.m1, &Impulse::set([("b", 20.0)])).unwrap();

    assert_eq!(local(&w.tree, w.m1, "b"), 20.0);
    assert_eq!(local(&w.tree, w.m1, "c"), 40.0);
    let d = local(&w.tree, w.l1, "d");
    assert_eq!(local(&w.tree, w.l1, "e"), d + 40.0);

    assert_eq!(w.tree.get(w.m2).unwrap().locus(), &before_m2);
    assert_eq!(w.tree.get(w.l2).unwrap().locus(), &before_l2);
}

#[test]
fn forgetting_redraws_only_downstream_values() {
    let mut w = world();
    w.tree.impulse(w.l1, &Impulse::forget(["d"])).unwrap();
    let d = local(&w.tree, w.l1, "d");
    assert!((0.0..=4.0).contains(&d));
    assert_eq!(local(&w.tree, w.l1, "e"), d + 8.0);
    assert_eq!(local(&w.tree, w.m1, "b"), 4.0);
}

#[test]
fn log_priors_add_up_over_the_tree() {
    let w = world();
    let root = w.tree.root();
    let parts: f64 = [root, w.m1, w.l1, w.m2, w.l2]
        .iter()
        .map(|id| w.tree.get(*id).unwrap().log_prior())
        .sum();
    let deep = w.tree.deep_log_prior(root).unwrap();
    assert!((deep - parts).abs() < 1e-12);
    assert!(deep <= 0.0);
}

#[test]
fn seeded_worlds_are_reproducible() {
    let a = world();
    let b = world();
    assert_eq!(local(&a.tree, a.l1, "d"), local(&b.tree, b.l1, "d"));
    assert_eq!(local(&a.tree, a.l2, "d"), local(&b.tree, b.l2, "d"));
}

#[test]
fn hierarchy_exports_describe_resolution() {
    let core = chain_core(SimulationConfig::default());
    let js = core.hierarchy().to_json();
    assert_eq!(js["Name"], "root");
    assert_eq!(js["Children"][0]["BeFixed"], serde_json::json!(["b", "c"]));
    assert_eq!(js["Children"][0]["Children"][0]["Exogenous"], serde_json::json!(["a", "b", "c"]));

    let summary = core.hierarchy().summary();
    assert!(summary.contains("med"));
    assert!(summary.contains("fixed: b, c"));

    let sg = core.to_json();
    assert_eq!(sg["SGs"]["med"]["BeRandom"], serde_json::json!(["d"]));
    assert_eq!(sg["Hoist"], true);
}
