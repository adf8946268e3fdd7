use std::path::Path;

use anyhow::Context;
use flowgrid_core::{Cost, CostModelConfig, EquivClass, ResourceId, ResourceTopologyNode, TaskDescriptor, TaskId};
use flowgrid_costmodel::CostModel;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input document: machines with their topology, and every known task.
#[derive(Debug, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub machines: Vec<ResourceTopologyNode>,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct SlotArc {
    pub machine: ResourceId,
    pub slot: u64,
    pub cost: Cost,
    pub capacity: u64,
}

#[derive(Debug, Serialize)]
pub struct ClassReport {
    pub ec: EquivClass,
    pub tasks: Vec<TaskId>,
    pub unscheduled_cost: Cost,
    pub arcs: Vec<SlotArc>,
}

#[derive(Debug, Serialize)]
pub struct PassReport {
    pub machines: usize,
    pub tasks: usize,
    pub infinity: Cost,
    pub classes: Vec<ClassReport>,
}

pub fn load_snapshot(path: &Path) -> anyhow::Result<ClusterSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Register the snapshot, fold running tasks into availability and price
/// every task class.
pub fn run_pass(snapshot: ClusterSnapshot, config: CostModelConfig) -> anyhow::Result<PassReport> {
    let mut model = CostModel::new(config)?;
    let machines: Vec<ResourceId> = snapshot.machines.iter().map(|m| m.resource_desc.uuid.clone()).collect();
    let task_count = snapshot.tasks.len();

    for machine in &snapshot.machines {
        model.add_machine(machine)?;
    }
    for td in snapshot.tasks {
        model.add_task(td)?;
    }
    for machine in &machines {
        model.refresh_stats(machine)?;
    }

    let mut classes = Vec::new();
    for ec in model.index().task_classes() {
        let pref_ecs = model.get_equiv_class_to_equiv_classes_arcs(ec)?;
        let mut arcs = Vec::with_capacity(pref_ecs.len());
        for machine_ec in pref_ecs {
            let arc = model.equiv_class_to_equiv_class(ec, machine_ec)?;
            let (machine, slot) = model.index().machine_for_class(machine_ec)?;
            arcs.push(SlotArc {
                machine: machine.clone(),
                slot,
                cost: arc.cost,
                capacity: arc.capacity,
            });
        }
        let tasks: Vec<TaskId> = model.index().ec_members(ec)?.iter().copied().collect();
        let unscheduled_cost = match tasks.first() {
            Some(task) => model.task_to_unscheduled_agg(*task)?.cost,
            None => model.config().unscheduled_cost,
        };
        debug!(ec, tasks = tasks.len(), arcs = arcs.len(), "class priced");
        classes.push(ClassReport {
            ec,
            tasks,
            unscheduled_cost,
            arcs,
        });
    }

    Ok(PassReport {
        machines: machines.len(),
        tasks: task_count,
        infinity: model.infinity(),
        classes,
    })
}

pub fn format_report(report: &PassReport) -> String {
    let mut out = format!(
        "{} machines, {} tasks, {} classes (infinity {})\n",
        report.machines,
        report.tasks,
        report.classes.len(),
        report.infinity
    );
    for class in &report.classes {
        out.push_str(&format!(
            "\nclass {:#018x}  tasks {:?}  unscheduled {}\n",
            class.ec, class.tasks, class.unscheduled_cost
        ));
        if class.arcs.is_empty() {
            out.push_str("  (no machine fits)\n");
        }
        for arc in &class.arcs {
            out.push_str(&format!(
                "  {:<24} slot {:>3}  cost {:>6}  cap {}\n",
                arc.machine, arc.slot, arc.cost, arc.capacity
            ));
        }
    }
    out
}

pub fn arcs(cluster: &str, config: Option<&str>, format: &str) -> anyhow::Result<()> {
    let snapshot = load_snapshot(Path::new(cluster))?;
    let config = match config {
        Some(path) => CostModelConfig::from_file(Path::new(path))?,
        None => CostModelConfig::default(),
    };
    let report = run_pass(snapshot, config)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print!("{}", format_report(&report));
        }
    }

    Ok(())
}
