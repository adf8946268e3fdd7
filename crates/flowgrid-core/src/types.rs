//! Descriptor records consumed by the cost model.
//!
//! Tasks and resources are owned by the scheduler; the cost model keeps
//! its own copies, registered through the lifecycle hooks, and never
//! mutates the scheduler's originals.

use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
pub type TaskId = u64;

/// Unique identifier for a job (a group of tasks).
pub type JobId = String;

/// Unique identifier for a resource (machine, socket, PU, ...).
pub type ResourceId = String;

/// Identifier of an equivalence class.
pub type EquivClass = u64;

/// Integer arc cost as seen by the flow solver.
pub type Cost = i64;

// ── Resources ─────────────────────────────────────────────────────

/// A multi-dimensional resource amount (request, capacity, or availability).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu_cores: f64,
    /// RAM in MB.
    pub ram_cap: u64,
    /// Receive bandwidth in Mbit/s. Zero means "not tracked".
    #[serde(default)]
    pub net_rx_bw: u64,
}

impl ResourceVector {
    pub fn new(cpu_cores: f64, ram_cap: u64) -> Self {
        Self {
            cpu_cores,
            ram_cap,
            net_rx_bw: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_cores <= 0.0 && self.ram_cap == 0 && self.net_rx_bw == 0
    }
}

/// Level of a node in the resource topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Coordinator,
    Machine,
    NumaNode,
    Socket,
    Cache,
    Core,
    Pu,
}

/// A single key/value label attached to a resource or task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A schedulable resource. Only machines carry labels that affinity
/// rules are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uuid: ResourceId,
    pub friendly_name: String,
    pub resource_type: ResourceType,
    pub resource_capacity: ResourceVector,
    pub available_resources: ResourceVector,
    /// Ordered label list. Duplicate keys are allowed on the wire; the
    /// first occurrence wins during evaluation.
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl ResourceDescriptor {
    /// A machine whose available resources equal its capacity.
    pub fn machine(uuid: impl Into<String>, name: impl Into<String>, capacity: ResourceVector) -> Self {
        Self {
            uuid: uuid.into(),
            friendly_name: name.into(),
            resource_type: ResourceType::Machine,
            resource_capacity: capacity,
            available_resources: capacity,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(key, value));
        self
    }

    pub fn is_machine(&self) -> bool {
        self.resource_type == ResourceType::Machine
    }
}

/// A node in the resource topology tree handed to `AddMachine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTopologyNode {
    pub resource_desc: ResourceDescriptor,
    #[serde(default)]
    pub parent_id: Option<ResourceId>,
    #[serde(default)]
    pub children: Vec<ResourceTopologyNode>,
}

impl ResourceTopologyNode {
    pub fn leaf(resource_desc: ResourceDescriptor) -> Self {
        Self {
            resource_desc,
            parent_id: None,
            children: Vec::new(),
        }
    }

    /// Attach `child`, setting its parent pointer to this node.
    pub fn with_child(mut self, mut child: ResourceTopologyNode) -> Self {
        child.parent_id = Some(self.resource_desc.uuid.clone());
        self.children.push(child);
        self
    }

    /// Depth-first pre-order walk over this node and its descendants.
    pub fn walk(&self) -> Vec<&ResourceTopologyNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

// ── Selectors & affinity ─────────────────────────────────────────

/// Typed view of a selector's wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorType {
    InSet,
    NotInSet,
    ExistsKey,
    NotExistsKey,
}

impl SelectorType {
    pub fn code(self) -> i32 {
        match self {
            SelectorType::InSet => 0,
            SelectorType::NotInSet => 1,
            SelectorType::ExistsKey => 2,
            SelectorType::NotExistsKey => 3,
        }
    }
}

impl TryFrom<i32> for SelectorType {
    /// The unrecognized code.
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SelectorType::InSet),
            1 => Ok(SelectorType::NotInSet),
            2 => Ok(SelectorType::ExistsKey),
            3 => Ok(SelectorType::NotExistsKey),
            other => Err(other),
        }
    }
}

/// A (key, type, value-set) predicate over a label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSelector {
    pub key: String,
    /// Raw wire code, see [`SelectorType`].
    #[serde(rename = "type")]
    pub selector_type: i32,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelSelector {
    pub fn new<I, S>(key: impl Into<String>, selector_type: SelectorType, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            selector_type: selector_type.code(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Typed selector kind, or the unrecognized wire code.
    pub fn kind(&self) -> Result<SelectorType, i32> {
        SelectorType::try_from(self.selector_type)
    }
}

/// Kubernetes-style match expression: operator is one of
/// `In`, `NotIn`, `Exists`, `DoesNotExist`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    pub fn new<I, S>(key: impl Into<String>, operator: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator: operator.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// AND of match expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<NodeSelectorRequirement>,
}

/// OR of node selector terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSelector {
    #[serde(default)]
    pub terms: Vec<NodeSelectorTerm>,
}

/// A soft node-affinity term with its weight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreferredSchedulingTerm {
    pub weight: i32,
    pub preference: NodeSelectorTerm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAffinity {
    /// requiredDuringSchedulingIgnoredDuringExecution
    #[serde(default)]
    pub required: Option<NodeSelector>,
    /// preferredDuringSchedulingIgnoredDuringExecution
    #[serde(default)]
    pub preferred: Vec<PreferredSchedulingTerm>,
}

/// Selects running tasks (by their labels) inside a topology domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodAffinityTerm {
    #[serde(default)]
    pub label_selector: Vec<LabelSelector>,
    /// Machine label defining the domain. Empty means "same machine".
    #[serde(default)]
    pub topology_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightedPodAffinityTerm {
    pub weight: i32,
    pub term: PodAffinityTerm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodAffinity {
    #[serde(default)]
    pub required: Vec<PodAffinityTerm>,
    #[serde(default)]
    pub preferred: Vec<WeightedPodAffinityTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Affinity {
    #[serde(default)]
    pub node_affinity: Option<NodeAffinity>,
    #[serde(default)]
    pub pod_affinity: Option<PodAffinity>,
    #[serde(default)]
    pub pod_anti_affinity: Option<PodAffinity>,
}

// ── Tasks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Runnable,
    Running,
    Completed,
    Failed,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub uid: TaskId,
    pub job_id: JobId,
    pub name: String,
    pub state: TaskState,
    pub resource_request: ResourceVector,
    /// Labels of the task itself, matched by other tasks' pod-affinity terms.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Node selector declared outside of affinity.
    #[serde(default)]
    pub label_selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    /// Machine the task runs on, when `state` is `Running`.
    #[serde(default)]
    pub scheduled_to: Option<ResourceId>,
}

impl TaskDescriptor {
    pub fn new(uid: TaskId, job_id: impl Into<String>, resource_request: ResourceVector) -> Self {
        Self {
            uid,
            job_id: job_id.into(),
            name: format!("task-{uid}"),
            state: TaskState::Runnable,
            resource_request,
            labels: Vec::new(),
            label_selectors: Vec::new(),
            affinity: None,
            scheduled_to: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// One costed, capacitated edge handed to the flow solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcDescriptor {
    pub cost: Cost,
    pub capacity: u64,
    pub min_flow: u64,
}

impl ArcDescriptor {
    pub fn new(cost: Cost, capacity: u64, min_flow: u64) -> Self {
        Self {
            cost,
            capacity,
            min_flow,
        }
    }
}
