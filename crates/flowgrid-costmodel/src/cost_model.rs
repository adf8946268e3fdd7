//! CPU/memory cost model for the scheduling flow network.
//!
//! Supplies the cost and capacity of every arc kind the flow solver asks
//! for, and keeps the equivalence-class index and priority state in step
//! with machine and task arrivals and departures.
//!
//! # Arc costs
//!
//! ```text
//! task ──► task class ──► machine class k ──► machine ──► ... ──► PU ──► sink
//!   │                        (cost of the (k+1)-th task on the machine)
//!   └──► unscheduled aggregator ──► sink
//! ```
//!
//! Placement costs are a three-dimensional vector, each dimension in
//! `[0, OMEGA]`:
//!
//! - **cpu/mem**: mean cpu and ram utilization of the machine after placement
//! - **balanced resources**: gap between cpu and ram utilization
//! - **soft affinity**: `OMEGA` minus the normalized priority score
//!
//! flattened into a scalar by a weighted sum.
//!
//! # Concurrency
//!
//! Lifecycle hooks, stats refreshes and priority computation take
//! `&mut self` and belong to the single writer of a scheduling pass. Arc
//! cost queries take `&self` and may run in parallel once the pass has
//! finished mutating; the only state they touch is the atomic `infinity`
//! watermark.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use flowgrid_affinity::satisfies_affinity;
use flowgrid_core::{
    ArcDescriptor, Cost, CostModelConfig, EquivClass, OMEGA, ResourceDescriptor, ResourceId,
    ResourceTopologyNode, ResourceVector, TaskDescriptor, TaskId,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::equiv_class::{EquivClassIndex, task_signature};
use crate::error::{CostModelError, CostModelResult};
use crate::knowledge_base::{KnowledgeBase, NoKnowledgeBase};
use crate::priority::{ClusterView, PriorityScorer, PriorityScoresList};
use crate::stats::{self, ResourceStats};

/// Breakdown of a placement cost before flattening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CostVector {
    pub cpu_mem_cost: Cost,
    pub balanced_res_cost: Cost,
    pub node_affinity_soft_cost: Cost,
}

impl CostVector {
    pub const DIMENSIONS: usize = 3;

    /// Every dimension clamped to `[0, OMEGA]`.
    pub fn clamped(self) -> Self {
        Self {
            cpu_mem_cost: self.cpu_mem_cost.clamp(0, OMEGA),
            balanced_res_cost: self.balanced_res_cost.clamp(0, OMEGA),
            node_affinity_soft_cost: self.node_affinity_soft_cost.clamp(0, OMEGA),
        }
    }
}

/// How many more tasks requesting `request` fit in `available`.
///
/// Bandwidth is only enforced on machines that declare a bandwidth capacity.
fn slots_available(request: &ResourceVector, rd: &ResourceDescriptor) -> u64 {
    let available = &rd.available_resources;
    let mut slots = u64::MAX;
    if request.cpu_cores > 0.0 {
        // Absorb float error so that e.g. 0.3 / 0.1 counts as 3.
        let fit = ((available.cpu_cores.max(0.0) + 1e-9) / request.cpu_cores).floor();
        slots = slots.min(fit as u64);
    }
    if request.ram_cap > 0 {
        slots = slots.min(available.ram_cap / request.ram_cap);
    }
    if request.net_rx_bw > 0 && rd.resource_capacity.net_rx_bw > 0 {
        slots = slots.min(available.net_rx_bw / request.net_rx_bw);
    }
    slots
}

fn utilization(capacity: f64, remaining: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    ((capacity - remaining) / capacity).clamp(0.0, 1.0)
}

fn scaled(fraction: f64) -> Cost {
    (fraction * OMEGA as f64).round() as Cost
}

/// Resource part of the cost of running `tasks` tasks of `request` on
/// `rd`, or `None` if they do not fit. Least-requested and balanced
/// allocation: emptier, better balanced machines are cheaper.
fn resource_fit_cost(request: &ResourceVector, rd: &ResourceDescriptor, tasks: u64) -> Option<CostVector> {
    if tasks == 0 || slots_available(request, rd) < tasks {
        return None;
    }
    let available = &rd.available_resources;
    let capacity = &rd.resource_capacity;

    let cpu_after = available.cpu_cores - request.cpu_cores * tasks as f64;
    let ram_after = available.ram_cap.saturating_sub(request.ram_cap.saturating_mul(tasks));

    let cpu_fraction = utilization(capacity.cpu_cores, cpu_after);
    let ram_fraction = utilization(capacity.ram_cap as f64, ram_after as f64);

    Some(CostVector {
        cpu_mem_cost: scaled((cpu_fraction + ram_fraction) / 2.0),
        balanced_res_cost: scaled((cpu_fraction - ram_fraction).abs()),
        node_affinity_soft_cost: 0,
    })
}

pub struct CostModel {
    config: CostModelConfig,
    knowledge_base: Arc<dyn KnowledgeBase>,
    /// Largest cost handed out so far, plus one.
    infinity: AtomicI64,
    /// Every registered topology node, machines included.
    resources: HashMap<ResourceId, ResourceDescriptor>,
    children: HashMap<ResourceId, Vec<ResourceId>>,
    /// Topology node → the machine it belongs to.
    machine_of: HashMap<ResourceId, ResourceId>,
    tasks: HashMap<TaskId, TaskDescriptor>,
    index: EquivClassIndex,
    priorities: PriorityScorer,
}

impl CostModel {
    /// Create a cost model with no machines or tasks.
    pub fn new(config: CostModelConfig) -> CostModelResult<Self> {
        config.validate()?;
        let floor = config
            .max_flattened_cost()
            .max(config.unscheduled_cost)
            .max(config.preemption_margin.saturating_add(OMEGA));
        Ok(Self {
            config,
            knowledge_base: Arc::new(NoKnowledgeBase),
            infinity: AtomicI64::new(floor.saturating_add(1)),
            resources: HashMap::new(),
            children: HashMap::new(),
            machine_of: HashMap::new(),
            tasks: HashMap::new(),
            index: EquivClassIndex::new(),
            priorities: PriorityScorer::new(),
        })
    }

    /// Set the knowledge base consulted for runtime hints.
    pub fn with_knowledge_base(mut self, knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge_base = knowledge_base;
        self
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    pub fn index(&self) -> &EquivClassIndex {
        &self.index
    }

    pub fn priorities(&self) -> &PriorityScorer {
        &self.priorities
    }

    /// Sentinel "worst cost", strictly above every cost handed out so far.
    pub fn infinity(&self) -> Cost {
        self.infinity.load(Ordering::Relaxed)
    }

    fn observe_cost(&self, cost: Cost) {
        self.infinity.fetch_max(cost.saturating_add(1), Ordering::Relaxed);
    }

    fn arc(&self, cost: Cost, capacity: u64) -> ArcDescriptor {
        self.observe_cost(cost);
        ArcDescriptor::new(cost, capacity, 0)
    }

    // ── lookups ───────────────────────────────────────────────────

    pub fn task(&self, task_id: TaskId) -> CostModelResult<&TaskDescriptor> {
        self.tasks.get(&task_id).ok_or(CostModelError::UnknownTask(task_id))
    }

    pub fn resource(&self, res_id: &ResourceId) -> CostModelResult<&ResourceDescriptor> {
        self.resources
            .get(res_id)
            .ok_or_else(|| CostModelError::UnknownResource(res_id.clone()))
    }

    pub fn machine(&self, res_id: &ResourceId) -> CostModelResult<&ResourceDescriptor> {
        match self.resources.get(res_id) {
            Some(rd) if rd.is_machine() => Ok(rd),
            Some(_) => Err(CostModelError::NotAMachine(res_id.clone())),
            None => Err(CostModelError::UnknownMachine(res_id.clone())),
        }
    }

    /// The machine a topology node belongs to.
    pub fn machine_res_id_for_resource(&self, res_id: &ResourceId) -> CostModelResult<&ResourceId> {
        self.machine_of
            .get(res_id)
            .ok_or_else(|| CostModelError::UnknownResource(res_id.clone()))
    }

    pub fn task_equiv_class(&self, task_id: TaskId) -> CostModelResult<EquivClass> {
        self.index.task_equiv_class(task_id)
    }

    pub fn machine_equiv_classes(&self, res_id: &ResourceId) -> CostModelResult<Vec<EquivClass>> {
        self.index.machine_equiv_classes(res_id)
    }

    fn soft_cost(&self, ec: EquivClass, machine: &ResourceId) -> CostModelResult<Cost> {
        self.priorities
            .scores(ec, machine)
            .and_then(PriorityScoresList::soft_cost)
            .ok_or_else(|| CostModelError::UnscoredPair {
                ec,
                machine: machine.clone(),
            })
    }

    // ── cost vector ───────────────────────────────────────────────

    /// Weighted sum of the clamped dimensions. The result lies in
    /// `[0, OMEGA * (sum of weights)]`.
    pub fn flatten_cost_vector(&self, cv: CostVector) -> Cost {
        let cv = cv.clamped();
        let weights = &self.config.weights;
        let cost = Cost::from(weights.cpu_mem) * cv.cpu_mem_cost
            + Cost::from(weights.balanced_res) * cv.balanced_res_cost
            + Cost::from(weights.node_affinity_soft) * cv.node_affinity_soft_cost;
        self.observe_cost(cost);
        cost
    }

    // ── unscheduled ──────────────────────────────────────────────

    pub fn task_to_unscheduled_agg(&self, task_id: TaskId) -> CostModelResult<ArcDescriptor> {
        self.task(task_id)?;
        Ok(self.arc(self.config.unscheduled_cost, 1))
    }

    /// Capacity is the number of the job's tasks that are not running.
    pub fn unscheduled_agg_to_sink(&self, job_id: &str) -> ArcDescriptor {
        let waiting = self
            .tasks
            .values()
            .filter(|td| td.job_id == job_id && !td.is_running())
            .count() as u64;
        self.arc(0, waiting)
    }

    // ── placement ─────────────────────────────────────────────────

    /// Direct task → resource arc. A task that does not fit, or whose hard
    /// constraints reject the machine, gets a zero-capacity arc.
    ///
    /// The task's class must already be scored against the machine, either
    /// by [`Self::get_equiv_class_to_equiv_classes_arcs`] for the class or by
    /// [`Self::calculate_priorities_cost`] for the pair. Otherwise a fitting
    /// machine yields [`CostModelError::UnscoredPair`].
    pub fn task_to_resource_node(&self, task_id: TaskId, res_id: &ResourceId) -> CostModelResult<ArcDescriptor> {
        let td = self.task(task_id)?;
        let ec = self.index.task_equiv_class(task_id)?;
        let machine_id = self.machine_res_id_for_resource(res_id)?;
        let rd = self.machine(machine_id)?;

        if !satisfies_affinity(rd, td)? {
            return Ok(ArcDescriptor::new(0, 0, 0));
        }
        let request = self.index.task_requirement(task_id)?;
        let Some(mut cv) = resource_fit_cost(request, rd, 1) else {
            return Ok(ArcDescriptor::new(0, 0, 0));
        };
        cv.node_affinity_soft_cost = self.soft_cost(ec, machine_id)?;
        Ok(self.arc(self.flatten_cost_vector(cv), 1))
    }

    // ── topology ──────────────────────────────────────────────────

    fn leaves_under(&self, res_id: &ResourceId) -> u64 {
        match self.children.get(res_id) {
            Some(children) if !children.is_empty() => {
                children.iter().map(|child| self.leaves_under(child)).sum()
            }
            _ => 1,
        }
    }

    /// Zero-cost arc inside the topology; capacity is what the
    /// destination subtree can run.
    pub fn resource_node_to_resource_node(
        &self,
        source: &ResourceDescriptor,
        destination: &ResourceDescriptor,
    ) -> CostModelResult<ArcDescriptor> {
        self.resource(&source.uuid)?;
        self.resource(&destination.uuid)?;
        let capacity = self.leaves_under(&destination.uuid) * self.config.max_tasks_per_pu;
        Ok(self.arc(0, capacity))
    }

    pub fn leaf_resource_node_to_sink(&self, res_id: &ResourceId) -> CostModelResult<ArcDescriptor> {
        self.resource(res_id)?;
        Ok(self.arc(0, self.config.max_tasks_per_pu))
    }

    // ── running tasks ─────────────────────────────────────────────

    fn running_task(&self, task_id: TaskId) -> CostModelResult<&TaskDescriptor> {
        let td = self.task(task_id)?;
        if !td.is_running() {
            return Err(CostModelError::TaskNotRunning(task_id));
        }
        Ok(td)
    }

    /// Keeping a running task where it is costs nothing.
    pub fn task_continuation(&self, task_id: TaskId) -> CostModelResult<ArcDescriptor> {
        self.running_task(task_id)?;
        Ok(self.arc(0, 1))
    }

    /// Preempting costs the configured margin plus the work expected to be
    /// lost, in seconds of mean runtime capped at `OMEGA`.
    pub fn task_preemption(&self, task_id: TaskId) -> CostModelResult<ArcDescriptor> {
        self.running_task(task_id)?;
        let ec = self.index.task_equiv_class(task_id)?;
        let work_lost = self
            .knowledge_base
            .mean_runtime_ms(ec)
            .map(|ms| Cost::try_from(ms / 1000).unwrap_or(OMEGA).min(OMEGA))
            .unwrap_or(0);
        Ok(self.arc(self.config.preemption_margin.saturating_add(work_lost), 1))
    }

    // ── equivalence classes ──────────────────────────────────────

    pub fn task_to_equiv_class_aggregator(&self, task_id: TaskId, ec: EquivClass) -> CostModelResult<ArcDescriptor> {
        let task_ec = self.index.task_equiv_class(task_id)?;
        if task_ec != ec {
            return Err(CostModelError::TaskClassMismatch { task: task_id, ec });
        }
        Ok(self.arc(0, 1))
    }

    fn is_compatible(&self, ec: EquivClass, machine: &ResourceId) -> CostModelResult<bool> {
        Ok(self.index.compatible_machines(ec)?.contains(machine))
    }

    /// Machine class → its machine is free. Task class → machine costs
    /// the first placement, with capacity for every slot that fits; a
    /// machine failing the class's hard constraints gets a zero-capacity
    /// arc. Scoring must precede the task class case, as for
    /// [`Self::task_to_resource_node`].
    pub fn equiv_class_to_resource_node(&self, ec: EquivClass, res_id: &ResourceId) -> CostModelResult<ArcDescriptor> {
        if self.index.is_machine_class(ec) {
            let (machine, _) = self.index.machine_for_class(ec)?;
            if machine != res_id {
                return Err(CostModelError::MachineClassMismatch {
                    ec,
                    machine: res_id.clone(),
                });
            }
            return Ok(self.arc(0, 1));
        }

        let request = self.index.ec_requirement(ec)?;
        let rd = self.machine(res_id)?;
        if !self.is_compatible(ec, res_id)? {
            return Ok(ArcDescriptor::new(0, 0, 0));
        }
        let slots = slots_available(request, rd).min(self.config.max_multi_arcs_per_machine);
        let Some(mut cv) = resource_fit_cost(request, rd, 1) else {
            return Ok(ArcDescriptor::new(0, 0, 0));
        };
        cv.node_affinity_soft_cost = self.soft_cost(ec, res_id)?;
        Ok(self.arc(self.flatten_cost_vector(cv), slots))
    }

    /// Cost of placing the (k+1)-th task of `task_ec` on the machine behind
    /// machine class k. Zero capacity once k+1 tasks no longer fit, or when
    /// the machine fails the class's hard constraints.
    pub fn equiv_class_to_equiv_class(&self, task_ec: EquivClass, machine_ec: EquivClass) -> CostModelResult<ArcDescriptor> {
        let request = self.index.ec_requirement(task_ec)?;
        let (machine, index) = self.index.machine_for_class(machine_ec)?;
        let rd = self.machine(machine)?;
        if !self.is_compatible(task_ec, machine)? {
            return Ok(ArcDescriptor::new(0, 0, 0));
        }

        let Some(mut cv) = resource_fit_cost(request, rd, index + 1) else {
            return Ok(ArcDescriptor::new(0, 0, 0));
        };
        cv.node_affinity_soft_cost = self.soft_cost(task_ec, machine)?;
        Ok(self.arc(self.flatten_cost_vector(cv), 1))
    }

    pub fn get_task_equiv_classes(&self, task_id: TaskId) -> CostModelResult<Vec<EquivClass>> {
        Ok(vec![self.index.task_equiv_class(task_id)?])
    }

    /// Machine class → its machine. Task classes reach machines only
    /// through machine classes.
    pub fn get_outgoing_equiv_class_pref_arcs(&self, ec: EquivClass) -> CostModelResult<Vec<ResourceId>> {
        if self.index.is_machine_class(ec) {
            let (machine, _) = self.index.machine_for_class(ec)?;
            return Ok(vec![machine.clone()]);
        }
        self.index.ec_requirement(ec)?;
        Ok(Vec::new())
    }

    /// Tasks have no direct preference arcs; everything goes through classes.
    pub fn get_task_preference_arcs(&self, task_id: TaskId) -> CostModelResult<Vec<ResourceId>> {
        self.task(task_id)?;
        Ok(Vec::new())
    }

    /// Machine classes a task class should get arcs to: for every
    /// compatible machine, one class per task that still fits. Priorities
    /// are (re)computed for every machine with at least one slot, in
    /// machine id order.
    pub fn get_equiv_class_to_equiv_classes_arcs(&mut self, ec: EquivClass) -> CostModelResult<Vec<EquivClass>> {
        if self.index.is_machine_class(ec) {
            return Ok(Vec::new());
        }
        let request = *self.index.ec_requirement(ec)?;
        let machines: Vec<ResourceId> = self.index.compatible_machines(ec)?.iter().cloned().collect();

        let mut pref_ecs = Vec::new();
        for machine in &machines {
            let rd = self.machine(machine)?;
            let classes = self.index.machine_classes(machine)?;
            let slots = slots_available(&request, rd).min(classes.len() as u64) as usize;
            pref_ecs.extend_from_slice(&classes[..slots]);
            if slots > 0 {
                self.calculate_priorities_cost(ec, machine)?;
            }
        }
        debug!(ec, machines = machines.len(), arcs = pref_ecs.len(), "class arcs enumerated");
        Ok(pref_ecs)
    }

    /// Score machine `res_id` for task class `ec`, widening the class's
    /// normalization bounds. Machines failing the class's hard constraints
    /// are rejected and leave the bounds untouched.
    pub fn calculate_priorities_cost(&mut self, ec: EquivClass, res_id: &ResourceId) -> CostModelResult<PriorityScoresList> {
        let td = self.index.ec_representative(ec)?;
        let rd = match self.resources.get(res_id) {
            Some(rd) if rd.is_machine() => rd,
            Some(_) => return Err(CostModelError::NotAMachine(res_id.clone())),
            None => return Err(CostModelError::UnknownMachine(res_id.clone())),
        };
        if !self.is_compatible(ec, res_id)? {
            return Err(CostModelError::IncompatibleMachine {
                ec,
                machine: res_id.clone(),
            });
        }
        let view = ClusterView::new(&self.resources, &self.tasks).with_topology(&self.machine_of);
        Ok(self.priorities.score_priorities(ec, td, rd, &view)?)
    }

    // ── stats ─────────────────────────────────────────────────────

    pub fn prepare_stats(&self, acc: &mut ResourceStats) {
        stats::prepare_stats(acc);
    }

    pub fn gather_stats(&self, acc: ResourceStats, other: &ResourceStats) -> ResourceStats {
        stats::gather_stats(acc, other)
    }

    /// Finalize a node's accumulator: its available resources become its
    /// capacity minus the folded usage.
    pub fn update_stats(&mut self, res_id: &ResourceId, acc: ResourceStats) -> CostModelResult<ResourceStats> {
        let rd = self
            .resources
            .get_mut(res_id)
            .ok_or_else(|| CostModelError::UnknownResource(res_id.clone()))?;
        rd.available_resources = acc.available_within(&rd.resource_capacity);
        Ok(acc)
    }

    fn fold_subtree(
        &self,
        res_id: &ResourceId,
        direct: &HashMap<&ResourceId, ResourceStats>,
        out: &mut Vec<(ResourceId, ResourceStats)>,
    ) -> ResourceStats {
        let mut acc = ResourceStats::default();
        self.prepare_stats(&mut acc);
        if let Some(own) = direct.get(res_id) {
            acc = self.gather_stats(acc, own);
        }
        if let Some(children) = self.children.get(res_id) {
            for child in children {
                let child_stats = self.fold_subtree(child, direct, out);
                acc = self.gather_stats(acc, &child_stats);
            }
        }
        out.push((res_id.clone(), acc));
        acc
    }

    /// Recompute usage and availability for the subtree rooted at `root`
    /// from the running tasks placed in it.
    pub fn refresh_stats(&mut self, root: &ResourceId) -> CostModelResult<ResourceStats> {
        self.resource(root)?;

        let mut direct: HashMap<&ResourceId, ResourceStats> = HashMap::new();
        for td in self.tasks.values().filter(|td| td.is_running()) {
            if let Some(placed_on) = td.scheduled_to.as_ref() {
                let acc = direct.entry(placed_on).or_default();
                *acc = stats::gather_stats(*acc, &ResourceStats::for_task(&td.resource_request));
            }
        }

        let mut folded = Vec::new();
        let total = self.fold_subtree(root, &direct, &mut folded);
        for (res_id, acc) in folded {
            self.update_stats(&res_id, acc)?;
        }
        debug!(root = %root, running = total.running_tasks, "stats refreshed");
        Ok(total)
    }

    // ── lifecycle ─────────────────────────────────────────────────

    /// Register a machine and its subtree. Re-adding a machine replaces its
    /// previous registration.
    pub fn add_machine(&mut self, rtnd: &ResourceTopologyNode) -> CostModelResult<()> {
        let rd = &rtnd.resource_desc;
        if !rd.is_machine() {
            return Err(CostModelError::NotAMachine(rd.uuid.clone()));
        }
        if self.index.contains_machine(&rd.uuid) {
            debug!(machine = %rd.uuid, "machine already registered, replacing");
            self.remove_machine(&rd.uuid)?;
        }

        // Constraints are checked before any mutation: a configuration
        // error must leave the model untouched.
        let mut compatible = Vec::new();
        for ec in self.index.task_classes() {
            if satisfies_affinity(rd, self.index.ec_representative(ec)?)? {
                compatible.push(ec);
            }
        }

        self.index
            .insert_machine(&rd.uuid, &rd.friendly_name, self.config.max_multi_arcs_per_machine)?;
        for node in rtnd.walk() {
            let desc = &node.resource_desc;
            self.resources.insert(desc.uuid.clone(), desc.clone());
            self.machine_of.insert(desc.uuid.clone(), rd.uuid.clone());
            self.children.insert(
                desc.uuid.clone(),
                node.children.iter().map(|c| c.resource_desc.uuid.clone()).collect(),
            );
        }
        for ec in &compatible {
            self.index.link(*ec, &rd.uuid)?;
        }

        info!(
            machine = %rd.uuid,
            name = %rd.friendly_name,
            compatible_classes = compatible.len(),
            "machine added"
        );
        Ok(())
    }

    pub fn remove_machine(&mut self, res_id: &ResourceId) -> CostModelResult<()> {
        let dropped = self.index.remove_machine(res_id)?;
        self.priorities.forget_machine(res_id);

        let subtree: Vec<ResourceId> = self
            .machine_of
            .iter()
            .filter(|(_, machine)| *machine == res_id)
            .map(|(node, _)| node.clone())
            .collect();
        for node in &subtree {
            self.resources.remove(node);
            self.children.remove(node);
            self.machine_of.remove(node);
        }

        let stranded = self
            .tasks
            .values()
            .filter(|td| td.is_running() && td.scheduled_to.as_ref().is_some_and(|r| subtree.contains(r)))
            .count();
        if stranded > 0 {
            warn!(machine = %res_id, stranded, "machine removed with running tasks");
        }
        info!(machine = %res_id, classes = dropped.len(), "machine removed");
        Ok(())
    }

    /// Machine whose availability depends on `td`, if it is running on a
    /// registered resource.
    fn placement_machine(&self, td: &TaskDescriptor) -> Option<ResourceId> {
        if !td.is_running() {
            return None;
        }
        td.scheduled_to.as_ref().and_then(|r| self.machine_of.get(r)).cloned()
    }

    fn refresh_machines(&mut self, machines: BTreeSet<ResourceId>) -> CostModelResult<()> {
        for machine in &machines {
            self.refresh_stats(machine)?;
        }
        Ok(())
    }

    /// Register or refresh a task. Returns the task's class.
    ///
    /// Machines the task runs on, before or after the update, have their
    /// stats refreshed.
    pub fn add_task(&mut self, td: TaskDescriptor) -> CostModelResult<EquivClass> {
        let ec = task_signature(&td);

        // Constraints are checked before any mutation, including the move
        // out of a previous class.
        let mut compatible = Vec::new();
        if !self.index.is_task_class(ec) {
            let mut machines: Vec<&ResourceDescriptor> =
                self.resources.values().filter(|rd| rd.is_machine()).collect();
            machines.sort_by(|a, b| a.uuid.cmp(&b.uuid));
            for rd in machines {
                if satisfies_affinity(rd, &td)? {
                    compatible.push(rd.uuid.clone());
                }
            }
        }

        let mut placements: BTreeSet<ResourceId> = self
            .tasks
            .get(&td.uid)
            .and_then(|old| self.placement_machine(old))
            .into_iter()
            .collect();
        placements.extend(self.placement_machine(&td));

        if let Ok(previous) = self.index.task_equiv_class(td.uid) {
            if previous != ec {
                debug!(task = td.uid, "task signature changed, moving class");
                self.unregister_task(td.uid)?;
            }
        }

        if td.resource_request.is_zero() {
            debug!(task = td.uid, "task has no resource request");
        }
        let (ec, created) = self.index.insert_task(&td);
        for machine in &compatible {
            self.index.link(ec, machine)?;
        }
        if created {
            info!(task = td.uid, ec, compatible_machines = compatible.len(), "equivalence class created");
        }
        self.tasks.insert(td.uid, td);
        self.refresh_machines(placements)?;
        Ok(ec)
    }

    fn unregister_task(&mut self, task_id: TaskId) -> CostModelResult<Option<TaskDescriptor>> {
        let (ec, released) = self.index.remove_task(task_id)?;
        if released {
            self.priorities.forget_class(ec);
            info!(task = task_id, ec, "equivalence class released");
        } else {
            debug!(task = task_id, ec, "task removed");
        }
        Ok(self.tasks.remove(&task_id))
    }

    /// Unregister a task. A running task's machine has its stats refreshed.
    pub fn remove_task(&mut self, task_id: TaskId) -> CostModelResult<()> {
        let removed = self.unregister_task(task_id)?;
        let placements = removed.and_then(|td| self.placement_machine(&td)).into_iter().collect();
        self.refresh_machines(placements)
    }
}
