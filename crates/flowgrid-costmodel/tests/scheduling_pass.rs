//! End-to-end scheduling passes against the cost model.
//!
//! Drives the model the way a flow scheduler does: register machines and
//! tasks, enumerate class arcs, price them, apply placements through a
//! stats refresh, and tear everything down again.

use std::sync::Once;

use flowgrid_core::{
    Affinity, Cost, CostModelConfig, EquivClass, Label, LabelSelector, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PodAffinity, PodAffinityTerm, PreferredSchedulingTerm,
    ResourceDescriptor, ResourceId, ResourceTopologyNode, ResourceType, ResourceVector, SelectorType, TaskDescriptor,
    TaskState,
};
use flowgrid_costmodel::{CostModel, CostModelError};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=flowgrid_costmodel=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Cluster fixtures ─────────────────────────────────────────────

const CONFIG: &str = r#"
unscheduled_cost = 2560000
preemption_margin = 1000
max_multi_arcs_per_machine = 8

[weights]
cpu_mem = 1
balanced_res = 1
node_affinity_soft = 1
"#;

fn make_machine(id: &str, cpu: f64, ram: u64, labels: &[(&str, &str)], pus: usize) -> ResourceTopologyNode {
    let mut rd = ResourceDescriptor::machine(id, id, ResourceVector::new(cpu, ram));
    for (k, v) in labels {
        rd = rd.with_label(*k, *v);
    }
    let per_pu = ResourceVector::new(cpu / pus.max(1) as f64, ram / pus.max(1) as u64);
    let mut node = ResourceTopologyNode::leaf(rd);
    for i in 0..pus {
        let pu_id = format!("{id}/pu{i}");
        node = node.with_child(ResourceTopologyNode::leaf(ResourceDescriptor {
            resource_type: ResourceType::Pu,
            ..ResourceDescriptor::machine(pu_id.clone(), pu_id, per_pu)
        }));
    }
    node
}

fn web_task(uid: u64) -> TaskDescriptor {
    let mut td = TaskDescriptor::new(uid, "web", ResourceVector::new(1.0, 1024));
    td.labels = vec![Label::new("app", "web")];
    td.affinity = Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required: None,
            preferred: vec![PreferredSchedulingTerm {
                weight: 10,
                preference: NodeSelectorTerm {
                    match_expressions: vec![NodeSelectorRequirement::new("zone", "In", ["a"])],
                },
            }],
        }),
        ..Affinity::default()
    });
    td
}

fn gpu_task(uid: u64) -> TaskDescriptor {
    let mut td = TaskDescriptor::new(uid, "batch", ResourceVector::new(2.0, 2048));
    td.affinity = Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required: Some(NodeSelector {
                terms: vec![NodeSelectorTerm {
                    match_expressions: vec![NodeSelectorRequirement::new("gpu", "Exists", Vec::<String>::new())],
                }],
            }),
            preferred: vec![],
        }),
        ..Affinity::default()
    });
    td
}

fn loner_task(uid: u64) -> TaskDescriptor {
    let mut td = TaskDescriptor::new(uid, "loner", ResourceVector::new(1.0, 1024));
    td.affinity = Some(Affinity {
        pod_anti_affinity: Some(PodAffinity {
            required: vec![PodAffinityTerm {
                label_selector: vec![LabelSelector::new("app", SelectorType::InSet, ["web"])],
                topology_key: String::new(),
            }],
            preferred: vec![],
        }),
        ..Affinity::default()
    });
    td
}

fn cluster() -> CostModel {
    init_tracing();
    let config = CostModelConfig::from_toml_str(CONFIG).unwrap();
    let mut model = CostModel::new(config).unwrap();
    model
        .add_machine(&make_machine("m-a", 4.0, 8192, &[("zone", "a")], 2))
        .unwrap();
    model
        .add_machine(&make_machine("m-b", 8.0, 16384, &[("zone", "b")], 2))
        .unwrap();
    model
        .add_machine(&make_machine("m-c", 2.0, 4096, &[("zone", "a"), ("gpu", "t4")], 1))
        .unwrap();
    model
}

fn id(s: &str) -> ResourceId {
    s.to_string()
}

/// Machine each class arc routes to, with its slot index.
fn arc_targets(model: &CostModel, arcs: &[EquivClass]) -> Vec<(ResourceId, u64)> {
    arcs.iter()
        .map(|ec| {
            let (machine, index) = model.index().machine_for_class(*ec).unwrap();
            (machine.clone(), index)
        })
        .collect()
}

fn first_slot_cost(model: &CostModel, task_ec: EquivClass, machine: &str) -> Cost {
    let machine_ec = model.index().machine_classes(&id(machine)).unwrap()[0];
    model.equiv_class_to_equiv_class(task_ec, machine_ec).unwrap().cost
}

// ── Tests ─────────────────────────────────────────────────────────

#[test]
fn full_pass_prices_every_compatible_slot() {
    let mut model = cluster();
    let web: Vec<EquivClass> = (1..=3).map(|uid| model.add_task(web_task(uid)).unwrap()).collect();
    let batch = model.add_task(gpu_task(10)).unwrap();
    assert!(web.windows(2).all(|w| w[0] == w[1]));
    assert_ne!(web[0], batch);
    let web = web[0];

    let arcs = model.get_equiv_class_to_equiv_classes_arcs(web).unwrap();
    let targets = arc_targets(&model, &arcs);
    let count = |m: &str| targets.iter().filter(|(machine, _)| machine == m).count();
    assert_eq!(count("m-a"), 4);
    assert_eq!(count("m-b"), 8);
    assert_eq!(count("m-c"), 2);

    let max = model.config().max_flattened_cost();
    for ec in &arcs {
        let arc = model.equiv_class_to_equiv_class(web, *ec).unwrap();
        assert_eq!(arc.capacity, 1);
        assert!((0..=max).contains(&arc.cost), "cost {} out of range", arc.cost);
        assert!(arc.cost < model.infinity());
    }

    // The preferred zone is cheaper than the other one on comparable machines.
    assert!(first_slot_cost(&model, web, "m-a") < first_slot_cost(&model, web, "m-b"));

    // The gpu task can only go to m-c, and only once.
    let batch_arcs = model.get_equiv_class_to_equiv_classes_arcs(batch).unwrap();
    assert_eq!(arc_targets(&model, &batch_arcs), vec![(id("m-c"), 0)]);
    assert_eq!(model.task_to_resource_node(10, &id("m-a")).unwrap().capacity, 0);
    assert_eq!(model.task_to_resource_node(10, &id("m-c")).unwrap().capacity, 1);

    // Waiting is always worse than any placement.
    let unscheduled = model.task_to_unscheduled_agg(1).unwrap();
    assert!(unscheduled.cost > max);
    assert_eq!(model.unscheduled_agg_to_sink("web").capacity, 3);
}

#[test]
fn placement_feedback_through_stats() {
    let mut model = cluster();
    let web = model.add_task(web_task(1)).unwrap();
    model.add_task(web_task(2)).unwrap();
    let before = model.get_equiv_class_to_equiv_classes_arcs(web).unwrap();
    let cost_before = first_slot_cost(&model, web, "m-a");

    // Task 1 lands on the first PU of m-a.
    let mut placed = web_task(1);
    placed.state = TaskState::Running;
    placed.scheduled_to = Some(id("m-a/pu0"));
    assert_eq!(model.add_task(placed).unwrap(), web);

    let total = model.refresh_stats(&id("m-a")).unwrap();
    assert_eq!(total.running_tasks, 1);
    assert_eq!(model.machine(&id("m-a")).unwrap().available_resources.cpu_cores, 3.0);

    let after = model.get_equiv_class_to_equiv_classes_arcs(web).unwrap();
    assert_eq!(before.len() - after.len(), 1);
    assert!(first_slot_cost(&model, web, "m-a") > cost_before);

    assert_eq!(model.unscheduled_agg_to_sink("web").capacity, 1);
    let continuation = model.task_continuation(1).unwrap();
    let preemption = model.task_preemption(1).unwrap();
    assert!(preemption.cost > continuation.cost);
}

#[test]
fn anti_affinity_sees_tasks_on_sub_machine_resources() {
    let mut model = cluster();
    let mut placed = web_task(1);
    placed.state = TaskState::Running;
    placed.scheduled_to = Some(id("m-b/pu1"));
    model.add_task(placed).unwrap();
    model.refresh_stats(&id("m-b")).unwrap();

    let loner = model.add_task(loner_task(20)).unwrap();
    let arcs = model.get_equiv_class_to_equiv_classes_arcs(loner).unwrap();
    assert!(arc_targets(&model, &arcs).iter().any(|(m, _)| m == "m-b"));

    let on_b = model.priorities().scores(loner, &id("m-b")).unwrap();
    let on_a = model.priorities().scores(loner, &id("m-a")).unwrap();
    assert!(!on_b.pod_affinity_priority.satisfy);
    assert!(on_a.pod_affinity_priority.satisfy);
    assert!(on_b.soft_cost() > on_a.soft_cost());
}

#[test]
fn teardown_releases_everything() {
    let mut model = cluster();
    let web = model.add_task(web_task(1)).unwrap();
    let batch = model.add_task(gpu_task(10)).unwrap();
    model.get_equiv_class_to_equiv_classes_arcs(web).unwrap();

    let m_c_classes = model.index().machine_classes(&id("m-c")).unwrap().to_vec();
    model.remove_machine(&id("m-c")).unwrap();
    assert!(model.get_equiv_class_to_equiv_classes_arcs(batch).unwrap().is_empty());
    for ec in m_c_classes {
        assert!(!model.index().is_machine_class(ec));
    }
    assert!(matches!(
        model.resource(&id("m-c/pu0")),
        Err(CostModelError::UnknownResource(_))
    ));

    model.remove_task(1).unwrap();
    model.remove_task(10).unwrap();
    assert!(matches!(
        model.get_equiv_class_to_equiv_classes_arcs(web),
        Err(CostModelError::UnknownEquivClass(_))
    ));
    assert!(model.priorities().min_max(web).is_none());
    assert!(model.index().task_classes().is_empty());

    // Removing twice is reported, not ignored.
    assert!(matches!(model.remove_task(1), Err(CostModelError::UnknownTask(1))));
    assert!(matches!(
        model.remove_machine(&id("m-c")),
        Err(CostModelError::UnknownMachine(_))
    ));
}

#[test]
fn machine_added_after_tasks_is_linked() {
    let mut model = cluster();
    let batch = model.add_task(gpu_task(10)).unwrap();
    model
        .add_machine(&make_machine("m-d", 16.0, 32768, &[("gpu", "a100")], 4))
        .unwrap();

    let compatible: Vec<ResourceId> = model.index().compatible_machines(batch).unwrap().iter().cloned().collect();
    assert_eq!(compatible, vec![id("m-c"), id("m-d")]);

    let arcs = model.get_equiv_class_to_equiv_classes_arcs(batch).unwrap();
    let on_d = arc_targets(&model, &arcs).iter().filter(|(m, _)| m == "m-d").count();
    assert_eq!(on_d, 8);
    assert!(
        model
            .machine_equiv_classes(&id("m-d"))
            .unwrap()
            .contains(&batch)
    );
}
