//! Soft-constraint priority scoring.
//!
//! For every (task class, machine) pair the scorer computes one raw score
//! per category from the task's preferred affinity terms, widens the
//! class's running min/max bounds, and normalizes the raw score into
//! `[0, OMEGA]` against the bounds known at that moment.
//!
//! Scores computed earlier are not renormalized when later machines widen
//! the bounds, so results depend on the order machines are scored in. The
//! cost model scores machines in id order to keep a pass reproducible.

use std::collections::HashMap;

use flowgrid_affinity::{AffinityResult, label_map, matches_term, satisfies_affinity, satisfies_all};
use flowgrid_core::{
    Cost, EquivClass, OMEGA, PodAffinityTerm, ResourceDescriptor, ResourceId, TaskDescriptor, TaskId,
};
use serde::Serialize;
use tracing::debug;

/// Outcome of one soft-constraint category for one (class, machine) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityScore {
    /// False when a required constraint of this category is violated.
    pub satisfy: bool,
    pub score: i64,
    /// Normalized score in `[0, OMEGA]`; `None` until computed.
    pub final_score: Option<Cost>,
}

impl Default for PriorityScore {
    fn default() -> Self {
        Self {
            satisfy: true,
            score: 0,
            final_score: None,
        }
    }
}

impl PriorityScore {
    /// Soft cost contributed by this category, in `[0, OMEGA]`.
    pub fn soft_cost(&self) -> Option<Cost> {
        if !self.satisfy {
            return Some(OMEGA);
        }
        self.final_score.map(|s| OMEGA - s.clamp(0, OMEGA))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityScoresList {
    pub node_affinity_priority: PriorityScore,
    pub pod_affinity_priority: PriorityScore,
}

impl PriorityScoresList {
    /// Mean of the two categories' soft costs.
    pub fn soft_cost(&self) -> Option<Cost> {
        let node = self.node_affinity_priority.soft_cost()?;
        let pod = self.pod_affinity_priority.soft_cost()?;
        Some((node + pod) / 2)
    }
}

/// Running bounds of raw scores observed for one class and category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinMaxScore {
    bounds: Option<(i64, i64)>,
}

impl MinMaxScore {
    pub fn min(&self) -> Option<i64> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<i64> {
        self.bounds.map(|(_, max)| max)
    }

    /// Widen the bounds to include `raw`.
    pub fn observe(&mut self, raw: i64) {
        self.bounds = Some(match self.bounds {
            Some((min, max)) => (min.min(raw), max.max(raw)),
            None => (raw, raw),
        });
    }

    /// Linear rescale of `raw` from `[min, max]` into `[0, OMEGA]`.
    ///
    /// `None` while no score has been observed; the neutral midpoint while
    /// the bounds do not discriminate yet.
    pub fn normalize(&self, raw: i64) -> Option<Cost> {
        let (min, max) = self.bounds?;
        if min == max {
            return Some(OMEGA / 2);
        }
        let scaled = (raw.clamp(min, max) - min) * OMEGA / (max - min);
        Some(scaled.clamp(0, OMEGA))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinMaxScores {
    pub node_affinity_priority: MinMaxScore,
    pub pod_affinity_priority: MinMaxScore,
}

/// Registered resources and tasks, used to resolve pod-affinity domains.
pub struct ClusterView<'a> {
    resources: &'a HashMap<ResourceId, ResourceDescriptor>,
    tasks: &'a HashMap<TaskId, TaskDescriptor>,
    machine_of: Option<&'a HashMap<ResourceId, ResourceId>>,
}

impl<'a> ClusterView<'a> {
    pub fn new(
        resources: &'a HashMap<ResourceId, ResourceDescriptor>,
        tasks: &'a HashMap<TaskId, TaskDescriptor>,
    ) -> Self {
        Self {
            resources,
            tasks,
            machine_of: None,
        }
    }

    /// Resolve tasks placed on sub-machine resources (PUs, cores) to
    /// their machine.
    pub fn with_topology(mut self, machine_of: &'a HashMap<ResourceId, ResourceId>) -> Self {
        self.machine_of = Some(machine_of);
        self
    }

    fn machine_of<'r>(&'r self, resource: &'r ResourceId) -> &'r ResourceId {
        self.machine_of
            .and_then(|m| m.get(resource))
            .unwrap_or(resource)
    }

    /// Running tasks placed in the same topology domain as `rd`.
    ///
    /// An empty `topology_key` makes the machine itself the domain; a
    /// machine without the key belongs to no domain.
    fn tasks_in_domain(&self, rd: &ResourceDescriptor, topology_key: &str) -> Vec<&'a TaskDescriptor> {
        let domain_value = if topology_key.is_empty() {
            None
        } else {
            match label_map(&rd.labels).get(topology_key) {
                Some(v) => Some(v.to_string()),
                None => return Vec::new(),
            }
        };

        self.tasks
            .values()
            .filter(|td| td.is_running())
            .filter(|td| {
                let Some(placed_on) = td.scheduled_to.as_ref() else {
                    return false;
                };
                let machine = self.machine_of(placed_on);
                match &domain_value {
                    None => machine == &rd.uuid,
                    Some(value) => self.resources.get(machine).is_some_and(|m| {
                        label_map(&m.labels).get(topology_key).is_some_and(|v| *v == value.as_str())
                    }),
                }
            })
            .collect()
    }

    /// Does some running task in `rd`'s domain satisfy the term's selectors?
    /// An empty selector list matches no task.
    fn pod_term_matches(&self, rd: &ResourceDescriptor, term: &PodAffinityTerm) -> AffinityResult<bool> {
        if term.label_selector.is_empty() {
            return Ok(false);
        }
        for td in self.tasks_in_domain(rd, &term.topology_key) {
            if satisfies_all(&label_map(&td.labels), &term.label_selector)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Per-class priority state.
#[derive(Debug, Default)]
pub struct PriorityScorer {
    ec_to_node_priority_scores: HashMap<EquivClass, HashMap<ResourceId, PriorityScoresList>>,
    ec_to_min_max_priority_scores: HashMap<EquivClass, MinMaxScores>,
}

impl PriorityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `rd` for task class `ec` (represented by `td`), widen the
    /// class bounds and store the normalized result.
    pub fn score_priorities(
        &mut self,
        ec: EquivClass,
        td: &TaskDescriptor,
        rd: &ResourceDescriptor,
        view: &ClusterView<'_>,
    ) -> AffinityResult<PriorityScoresList> {
        let mut scores = raw_scores(td, rd, view)?;

        let bounds = self.ec_to_min_max_priority_scores.entry(ec).or_default();
        bounds.node_affinity_priority.observe(scores.node_affinity_priority.score);
        bounds.pod_affinity_priority.observe(scores.pod_affinity_priority.score);

        scores.node_affinity_priority.final_score = bounds
            .node_affinity_priority
            .normalize(scores.node_affinity_priority.score);
        scores.pod_affinity_priority.final_score = bounds
            .pod_affinity_priority
            .normalize(scores.pod_affinity_priority.score);

        debug!(
            ec,
            machine = %rd.uuid,
            node_raw = scores.node_affinity_priority.score,
            node_final = ?scores.node_affinity_priority.final_score,
            pod_raw = scores.pod_affinity_priority.score,
            pod_final = ?scores.pod_affinity_priority.final_score,
            "priorities scored"
        );

        self.ec_to_node_priority_scores
            .entry(ec)
            .or_default()
            .insert(rd.uuid.clone(), scores);
        Ok(scores)
    }

    pub fn scores(&self, ec: EquivClass, machine: &ResourceId) -> Option<&PriorityScoresList> {
        self.ec_to_node_priority_scores.get(&ec)?.get(machine)
    }

    pub fn min_max(&self, ec: EquivClass) -> Option<&MinMaxScores> {
        self.ec_to_min_max_priority_scores.get(&ec)
    }

    /// Drop all state of a released task class.
    pub fn forget_class(&mut self, ec: EquivClass) {
        self.ec_to_node_priority_scores.remove(&ec);
        self.ec_to_min_max_priority_scores.remove(&ec);
    }

    /// Drop a removed machine's scores. Bounds keep what they observed.
    pub fn forget_machine(&mut self, machine: &ResourceId) {
        for scores in self.ec_to_node_priority_scores.values_mut() {
            scores.remove(machine);
        }
    }
}

/// Raw (unnormalized) scores of `rd` for `td`.
///
/// Preferred node-affinity terms add their weight when matched; preferred
/// pod-affinity terms add theirs and preferred anti-affinity terms
/// subtract theirs when some running task in the domain matches.
fn raw_scores(
    td: &TaskDescriptor,
    rd: &ResourceDescriptor,
    view: &ClusterView<'_>,
) -> AffinityResult<PriorityScoresList> {
    let mut scores = PriorityScoresList::default();
    let Some(affinity) = td.affinity.as_ref() else {
        return Ok(scores);
    };

    if let Some(node_affinity) = affinity.node_affinity.as_ref() {
        scores.node_affinity_priority.satisfy = satisfies_affinity(rd, td)?;
        for term in &node_affinity.preferred {
            if matches_term(rd, &term.preference)? {
                scores.node_affinity_priority.score += i64::from(term.weight);
            }
        }
    }

    let pod = &mut scores.pod_affinity_priority;
    if let Some(pod_affinity) = affinity.pod_affinity.as_ref() {
        for term in &pod_affinity.required {
            if !view.pod_term_matches(rd, term)? {
                pod.satisfy = false;
            }
        }
        for weighted in &pod_affinity.preferred {
            if view.pod_term_matches(rd, &weighted.term)? {
                pod.score += i64::from(weighted.weight);
            }
        }
    }
    if let Some(anti_affinity) = affinity.pod_anti_affinity.as_ref() {
        for term in &anti_affinity.required {
            if view.pod_term_matches(rd, term)? {
                pod.satisfy = false;
            }
        }
        for weighted in &anti_affinity.preferred {
            if view.pod_term_matches(rd, &weighted.term)? {
                pod.score -= i64::from(weighted.weight);
            }
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_core::{
        Affinity, Label, LabelSelector, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm, PodAffinity,
        PreferredSchedulingTerm, ResourceVector, SelectorType, TaskState, WeightedPodAffinityTerm,
    };

    const EC: EquivClass = 7;

    fn machine(id: &str, labels: &[(&str, &str)]) -> ResourceDescriptor {
        let mut rd = ResourceDescriptor::machine(id, id, ResourceVector::new(8.0, 16384));
        for (k, v) in labels {
            rd = rd.with_label(*k, *v);
        }
        rd
    }

    fn prefers_zone(zone: &str, weight: i32) -> PreferredSchedulingTerm {
        PreferredSchedulingTerm {
            weight,
            preference: NodeSelectorTerm {
                match_expressions: vec![NodeSelectorRequirement::new("zone", "In", [zone])],
            },
        }
    }

    fn task_preferring(preferred: Vec<PreferredSchedulingTerm>) -> TaskDescriptor {
        let mut td = TaskDescriptor::new(1, "job", ResourceVector::new(1.0, 512));
        td.affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required: None,
                preferred,
            }),
            ..Affinity::default()
        });
        td
    }

    #[test]
    fn min_max_starts_unset() {
        let bounds = MinMaxScore::default();
        assert_eq!(bounds.min(), None);
        assert_eq!(bounds.max(), None);
        assert_eq!(bounds.normalize(5), None);
    }

    #[test]
    fn min_max_widens_monotonically() {
        let mut bounds = MinMaxScore::default();
        bounds.observe(5);
        assert_eq!((bounds.min(), bounds.max()), (Some(5), Some(5)));
        bounds.observe(2);
        bounds.observe(9);
        bounds.observe(4);
        assert_eq!((bounds.min(), bounds.max()), (Some(2), Some(9)));
    }

    #[test]
    fn normalize_rescales_linearly() {
        let mut bounds = MinMaxScore::default();
        bounds.observe(0);
        assert_eq!(bounds.normalize(0), Some(OMEGA / 2));
        bounds.observe(10);
        assert_eq!(bounds.normalize(0), Some(0));
        assert_eq!(bounds.normalize(5), Some(OMEGA / 2));
        assert_eq!(bounds.normalize(10), Some(OMEGA));
    }

    #[test]
    fn first_machine_gets_neutral_midpoint() {
        let machines = HashMap::new();
        let tasks = HashMap::new();
        let view = ClusterView::new(&machines, &tasks);
        let mut scorer = PriorityScorer::new();
        let td = task_preferring(vec![prefers_zone("us-east", 10)]);

        let scores = scorer
            .score_priorities(EC, &td, &machine("m1", &[("zone", "us-east")]), &view)
            .unwrap();
        assert_eq!(scores.node_affinity_priority.score, 10);
        assert_eq!(scores.node_affinity_priority.final_score, Some(OMEGA / 2));
    }

    #[test]
    fn earlier_scores_are_not_renormalized() {
        let machines = HashMap::new();
        let tasks = HashMap::new();
        let view = ClusterView::new(&machines, &tasks);
        let td = task_preferring(vec![prefers_zone("us-east", 10)]);
        let east = machine("east", &[("zone", "us-east")]);
        let west = machine("west", &[("zone", "us-west")]);

        // Order A: east first, then west.
        let mut a = PriorityScorer::new();
        a.score_priorities(EC, &td, &east, &view).unwrap();
        a.score_priorities(EC, &td, &west, &view).unwrap();
        let east_a = a.scores(EC, &east.uuid).unwrap().node_affinity_priority.final_score;
        let west_a = a.scores(EC, &west.uuid).unwrap().node_affinity_priority.final_score;
        assert_eq!(east_a, Some(OMEGA / 2));
        assert_eq!(west_a, Some(0));

        // Order B: west first, then east.
        let mut b = PriorityScorer::new();
        b.score_priorities(EC, &td, &west, &view).unwrap();
        b.score_priorities(EC, &td, &east, &view).unwrap();
        let east_b = b.scores(EC, &east.uuid).unwrap().node_affinity_priority.final_score;
        let west_b = b.scores(EC, &west.uuid).unwrap().node_affinity_priority.final_score;
        assert_eq!(west_b, Some(OMEGA / 2));
        assert_eq!(east_b, Some(OMEGA));

        // Same raw scores, different finals: drift depends on evaluation order.
        assert_ne!(east_a, east_b);
        assert_eq!(a.min_max(EC), b.min_max(EC));
    }

    #[test]
    fn rescoring_replaces_previous_entry() {
        let machines = HashMap::new();
        let tasks = HashMap::new();
        let view = ClusterView::new(&machines, &tasks);
        let td = task_preferring(vec![prefers_zone("us-east", 10)]);
        let east = machine("east", &[("zone", "us-east")]);
        let west = machine("west", &[("zone", "us-west")]);

        let mut scorer = PriorityScorer::new();
        scorer.score_priorities(EC, &td, &east, &view).unwrap();
        scorer.score_priorities(EC, &td, &west, &view).unwrap();
        scorer.score_priorities(EC, &td, &east, &view).unwrap();
        let east_final = scorer.scores(EC, &east.uuid).unwrap().node_affinity_priority.final_score;
        assert_eq!(east_final, Some(OMEGA));
    }

    #[test]
    fn task_without_affinity_scores_zero_and_satisfies() {
        let machines = HashMap::new();
        let tasks = HashMap::new();
        let view = ClusterView::new(&machines, &tasks);
        let td = TaskDescriptor::new(1, "job", ResourceVector::new(1.0, 512));
        let mut scorer = PriorityScorer::new();
        let scores = scorer.score_priorities(EC, &td, &machine("m1", &[]), &view).unwrap();
        assert!(scores.node_affinity_priority.satisfy);
        assert!(scores.pod_affinity_priority.satisfy);
        assert_eq!(scores.node_affinity_priority.score, 0);
        assert_eq!(scores.soft_cost(), Some(OMEGA / 2));
    }

    #[test]
    fn unsatisfied_category_costs_omega() {
        let score = PriorityScore {
            satisfy: false,
            score: 100,
            final_score: Some(OMEGA),
        };
        assert_eq!(score.soft_cost(), Some(OMEGA));
        assert_eq!(PriorityScore::default().soft_cost(), None);
    }

    fn running_task(uid: TaskId, on: &str, app: &str) -> TaskDescriptor {
        let mut td = TaskDescriptor::new(uid, "other", ResourceVector::new(1.0, 512));
        td.state = TaskState::Running;
        td.scheduled_to = Some(on.to_string());
        td.labels = vec![Label::new("app", app)];
        td
    }

    fn app_term(app: &str, topology_key: &str) -> PodAffinityTerm {
        PodAffinityTerm {
            label_selector: vec![LabelSelector::new("app", SelectorType::InSet, [app])],
            topology_key: topology_key.to_string(),
        }
    }

    #[test]
    fn pod_affinity_follows_topology_domain() {
        let m1 = machine("m1", &[("zone", "a")]);
        let m2 = machine("m2", &[("zone", "a")]);
        let m3 = machine("m3", &[("zone", "b")]);
        let machines: HashMap<_, _> = [&m1, &m2, &m3]
            .into_iter()
            .map(|m| (m.uuid.clone(), m.clone()))
            .collect();
        let tasks: HashMap<_, _> = [(10, running_task(10, "m1", "cache"))].into_iter().collect();
        let view = ClusterView::new(&machines, &tasks);

        let mut td = TaskDescriptor::new(1, "job", ResourceVector::new(1.0, 512));
        td.affinity = Some(Affinity {
            pod_affinity: Some(PodAffinity {
                required: vec![],
                preferred: vec![WeightedPodAffinityTerm {
                    weight: 5,
                    term: app_term("cache", "zone"),
                }],
            }),
            ..Affinity::default()
        });

        let mut scorer = PriorityScorer::new();
        let s1 = scorer.score_priorities(EC, &td, &m1, &view).unwrap();
        let s2 = scorer.score_priorities(EC, &td, &m2, &view).unwrap();
        let s3 = scorer.score_priorities(EC, &td, &m3, &view).unwrap();
        assert_eq!(s1.pod_affinity_priority.score, 5);
        assert_eq!(s2.pod_affinity_priority.score, 5);
        assert_eq!(s3.pod_affinity_priority.score, 0);
        assert_eq!(s3.pod_affinity_priority.final_score, Some(0));
    }

    #[test]
    fn required_anti_affinity_clears_satisfy() {
        let m1 = machine("m1", &[]);
        let m2 = machine("m2", &[]);
        let machines: HashMap<_, _> = [&m1, &m2]
            .into_iter()
            .map(|m| (m.uuid.clone(), m.clone()))
            .collect();
        let tasks: HashMap<_, _> = [(10, running_task(10, "m1", "web"))].into_iter().collect();
        let view = ClusterView::new(&machines, &tasks);

        let mut td = TaskDescriptor::new(1, "job", ResourceVector::new(1.0, 512));
        td.affinity = Some(Affinity {
            pod_anti_affinity: Some(PodAffinity {
                required: vec![app_term("web", "")],
                preferred: vec![],
            }),
            ..Affinity::default()
        });

        let mut scorer = PriorityScorer::new();
        let s1 = scorer.score_priorities(EC, &td, &m1, &view).unwrap();
        let s2 = scorer.score_priorities(EC, &td, &m2, &view).unwrap();
        assert!(!s1.pod_affinity_priority.satisfy);
        assert!(s2.pod_affinity_priority.satisfy);
        assert_eq!(s1.pod_affinity_priority.soft_cost(), Some(OMEGA));
    }

    #[test]
    fn forget_class_drops_bounds() {
        let machines = HashMap::new();
        let tasks = HashMap::new();
        let view = ClusterView::new(&machines, &tasks);
        let td = task_preferring(vec![prefers_zone("us-east", 10)]);
        let mut scorer = PriorityScorer::new();
        scorer.score_priorities(EC, &td, &machine("m1", &[]), &view).unwrap();
        assert!(scorer.min_max(EC).is_some());

        scorer.forget_class(EC);
        assert!(scorer.min_max(EC).is_none());
        assert!(scorer.scores(EC, &"m1".to_string()).is_none());
    }
}
