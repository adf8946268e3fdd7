//! Equivalence-class index.
//!
//! Tasks with an identical cost-relevant signature share one task class,
//! so arcs are computed once per class instead of once per task. Every
//! machine additionally owns a fixed number of machine classes; machine
//! class `k` stands for "the (k+1)-th task placed on this machine".
//!
//! The index is owned by the cost model and mutated only through the
//! lifecycle hooks. Lookups of ids that were never registered are errors.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use flowgrid_affinity::hash_selectors;
use flowgrid_core::{Affinity, EquivClass, ResourceId, ResourceVector, TaskDescriptor, TaskId};
use sha2::{Digest, Sha256};

use crate::error::{CostModelError, CostModelResult};

/// Structured signature fed through the digest. The variant tag keeps
/// task and machine classes apart.
#[derive(Hash)]
enum SignatureKey<'a> {
    Task {
        cpu_millicores: u64,
        ram_cap: u64,
        net_rx_bw: u64,
        selectors: u64,
        affinity: Option<&'a Affinity>,
    },
    Machine {
        name: &'a str,
        index: u64,
    },
}

/// `Hasher` over SHA-256. Integers are fed little-endian and `usize`
/// (length prefixes, enum tags) widened to 64 bits, so class ids are
/// stable across runs, processes and targets.
struct DigestHasher(Sha256);

impl Hasher for DigestHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn write_u8(&mut self, i: u8) {
        self.0.update([i]);
    }

    fn write_u16(&mut self, i: u16) {
        self.0.update(i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.0.update(i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.0.update(i.to_le_bytes());
    }

    fn write_u128(&mut self, i: u128) {
        self.0.update(i.to_le_bytes());
    }

    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn write_i8(&mut self, i: i8) {
        self.write_u8(i as u8);
    }

    fn write_i16(&mut self, i: i16) {
        self.write_u16(i as u16);
    }

    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32);
    }

    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64);
    }

    fn write_i128(&mut self, i: i128) {
        self.write_u128(i as u128);
    }

    fn write_isize(&mut self, i: isize) {
        self.write_u64(i as i64 as u64);
    }

    fn finish(&self) -> u64 {
        let digest = self.0.clone().finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

fn stable_hash(key: &SignatureKey<'_>) -> EquivClass {
    let mut hasher = DigestHasher(Sha256::new());
    key.hash(&mut hasher);
    hasher.finish()
}

/// Task class of `td`: resource request, direct selectors and affinity.
pub fn task_signature(td: &TaskDescriptor) -> EquivClass {
    let req = &td.resource_request;
    stable_hash(&SignatureKey::Task {
        cpu_millicores: (req.cpu_cores.max(0.0) * 1000.0).round() as u64,
        ram_cap: req.ram_cap,
        net_rx_bw: req.net_rx_bw,
        selectors: hash_selectors(&td.label_selectors),
        affinity: td.affinity.as_ref(),
    })
}

/// Machine class `index` of the machine called `name`.
pub fn machine_signature(name: &str, index: u64) -> EquivClass {
    stable_hash(&SignatureKey::Machine { name, index })
}

#[derive(Debug, Default)]
pub struct EquivClassIndex {
    task_to_ec: HashMap<TaskId, EquivClass>,
    ec_members: HashMap<EquivClass, BTreeSet<TaskId>>,
    task_resource_requirement: HashMap<TaskId, ResourceVector>,
    ec_resource_requirement: HashMap<EquivClass, ResourceVector>,
    /// First task seen for each class; stands in for every member.
    ec_to_td_requirements: HashMap<EquivClass, TaskDescriptor>,
    /// Task class → machines whose labels satisfy the class's hard constraints.
    ec_to_machines: HashMap<EquivClass, BTreeSet<ResourceId>>,
    machine_to_task_ecs: HashMap<ResourceId, BTreeSet<EquivClass>>,
    /// Machine → its machine classes, in index order.
    ecs_for_machines: HashMap<ResourceId, Vec<EquivClass>>,
    ec_to_machine: HashMap<EquivClass, ResourceId>,
    ec_to_index: HashMap<EquivClass, u64>,
}

impl EquivClassIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ── tasks ─────────────────────────────────────────────────────

    /// Register `td` under its class. Returns the class and whether it was
    /// created by this call. Re-registering a task under the same class
    /// only refreshes its cached requirement.
    pub fn insert_task(&mut self, td: &TaskDescriptor) -> (EquivClass, bool) {
        let ec = task_signature(td);
        self.task_to_ec.insert(td.uid, ec);
        self.task_resource_requirement.insert(td.uid, td.resource_request);

        let members = self.ec_members.entry(ec).or_default();
        let created = members.is_empty();
        members.insert(td.uid);
        if created {
            self.ec_resource_requirement.insert(ec, td.resource_request);
            self.ec_to_td_requirements.insert(ec, td.clone());
            self.ec_to_machines.entry(ec).or_default();
        }
        (ec, created)
    }

    /// Unregister a task. Returns its class and whether the class was
    /// released because this was its last member.
    pub fn remove_task(&mut self, task_id: TaskId) -> CostModelResult<(EquivClass, bool)> {
        let ec = self
            .task_to_ec
            .remove(&task_id)
            .ok_or(CostModelError::UnknownTask(task_id))?;
        self.task_resource_requirement.remove(&task_id);

        let released = match self.ec_members.get_mut(&ec) {
            Some(members) => {
                members.remove(&task_id);
                members.is_empty()
            }
            None => true,
        };
        if released {
            self.release_task_class(ec);
        }
        Ok((ec, released))
    }

    fn release_task_class(&mut self, ec: EquivClass) {
        self.ec_members.remove(&ec);
        self.ec_resource_requirement.remove(&ec);
        self.ec_to_td_requirements.remove(&ec);
        if let Some(machines) = self.ec_to_machines.remove(&ec) {
            for machine in machines {
                if let Some(ecs) = self.machine_to_task_ecs.get_mut(&machine) {
                    ecs.remove(&ec);
                }
            }
        }
    }

    pub fn task_equiv_class(&self, task_id: TaskId) -> CostModelResult<EquivClass> {
        self.task_to_ec
            .get(&task_id)
            .copied()
            .ok_or(CostModelError::UnknownTask(task_id))
    }

    pub fn task_requirement(&self, task_id: TaskId) -> CostModelResult<&ResourceVector> {
        self.task_resource_requirement
            .get(&task_id)
            .ok_or(CostModelError::UnknownTask(task_id))
    }

    pub fn contains_task(&self, task_id: TaskId) -> bool {
        self.task_to_ec.contains_key(&task_id)
    }

    pub fn is_task_class(&self, ec: EquivClass) -> bool {
        self.ec_resource_requirement.contains_key(&ec)
    }

    /// Cached resource request shared by every member of a task class.
    pub fn ec_requirement(&self, ec: EquivClass) -> CostModelResult<&ResourceVector> {
        self.ec_resource_requirement
            .get(&ec)
            .ok_or_else(|| self.missing_task_class(ec))
    }

    /// Representative task descriptor of a task class.
    pub fn ec_representative(&self, ec: EquivClass) -> CostModelResult<&TaskDescriptor> {
        self.ec_to_td_requirements
            .get(&ec)
            .ok_or_else(|| self.missing_task_class(ec))
    }

    pub fn ec_members(&self, ec: EquivClass) -> CostModelResult<&BTreeSet<TaskId>> {
        self.ec_members.get(&ec).ok_or_else(|| self.missing_task_class(ec))
    }

    /// All live task classes, in id order.
    pub fn task_classes(&self) -> Vec<EquivClass> {
        let mut ecs: Vec<EquivClass> = self.ec_resource_requirement.keys().copied().collect();
        ecs.sort_unstable();
        ecs
    }

    fn missing_task_class(&self, ec: EquivClass) -> CostModelError {
        if self.ec_to_machine.contains_key(&ec) {
            CostModelError::NotATaskClass(ec)
        } else {
            CostModelError::UnknownEquivClass(ec)
        }
    }

    // ── machines ──────────────────────────────────────────────────

    /// Register `arcs` machine classes for a machine. Idempotent: a machine
    /// that is already registered keeps its existing classes.
    ///
    /// Machine classes are derived from the machine's name, so two machines
    /// sharing a name would collide.
    pub fn insert_machine(&mut self, machine: &ResourceId, name: &str, arcs: u64) -> CostModelResult<&[EquivClass]> {
        if !self.ecs_for_machines.contains_key(machine) {
            if let Some(existing) = self.ec_to_machine.get(&machine_signature(name, 0)) {
                return Err(CostModelError::MachineNameConflict {
                    name: name.to_string(),
                    existing: existing.clone(),
                });
            }
            let mut ecs = Vec::with_capacity(arcs as usize);
            for index in 0..arcs {
                let ec = machine_signature(name, index);
                self.ec_to_index.insert(ec, index);
                self.ec_to_machine.insert(ec, machine.clone());
                ecs.push(ec);
            }
            self.ecs_for_machines.insert(machine.clone(), ecs);
            self.machine_to_task_ecs.entry(machine.clone()).or_default();
        }
        self.machine_classes(machine)
    }

    /// Unregister a machine, dropping its machine classes and every link
    /// from task classes to it. Returns the dropped machine classes.
    pub fn remove_machine(&mut self, machine: &ResourceId) -> CostModelResult<Vec<EquivClass>> {
        let ecs = self
            .ecs_for_machines
            .remove(machine)
            .ok_or_else(|| CostModelError::UnknownMachine(machine.clone()))?;
        for ec in &ecs {
            self.ec_to_index.remove(ec);
            self.ec_to_machine.remove(ec);
        }
        if let Some(task_ecs) = self.machine_to_task_ecs.remove(machine) {
            for ec in task_ecs {
                if let Some(machines) = self.ec_to_machines.get_mut(&ec) {
                    machines.remove(machine);
                }
            }
        }
        Ok(ecs)
    }

    pub fn contains_machine(&self, machine: &ResourceId) -> bool {
        self.ecs_for_machines.contains_key(machine)
    }

    /// Record that `machine` satisfies the hard constraints of task class `ec`.
    pub fn link(&mut self, ec: EquivClass, machine: &ResourceId) -> CostModelResult<()> {
        if !self.is_task_class(ec) {
            return Err(self.missing_task_class(ec));
        }
        let task_ecs = self
            .machine_to_task_ecs
            .get_mut(machine)
            .ok_or_else(|| CostModelError::UnknownMachine(machine.clone()))?;
        task_ecs.insert(ec);
        self.ec_to_machines.entry(ec).or_default().insert(machine.clone());
        Ok(())
    }

    /// Machines linked to a task class, in id order.
    pub fn compatible_machines(&self, ec: EquivClass) -> CostModelResult<&BTreeSet<ResourceId>> {
        self.ec_to_machines.get(&ec).ok_or_else(|| self.missing_task_class(ec))
    }

    /// Every class a machine is indexed under: its own machine classes
    /// followed by the task classes it is compatible with.
    pub fn machine_equiv_classes(&self, machine: &ResourceId) -> CostModelResult<Vec<EquivClass>> {
        let own = self
            .ecs_for_machines
            .get(machine)
            .ok_or_else(|| CostModelError::UnknownMachine(machine.clone()))?;
        let mut ecs = own.clone();
        if let Some(task_ecs) = self.machine_to_task_ecs.get(machine) {
            ecs.extend(task_ecs.iter().copied());
        }
        Ok(ecs)
    }

    /// Machine classes of a machine, in index order.
    pub fn machine_classes(&self, machine: &ResourceId) -> CostModelResult<&[EquivClass]> {
        self.ecs_for_machines
            .get(machine)
            .map(Vec::as_slice)
            .ok_or_else(|| CostModelError::UnknownMachine(machine.clone()))
    }

    /// Machine and slot index a machine class stands for.
    pub fn machine_for_class(&self, ec: EquivClass) -> CostModelResult<(&ResourceId, u64)> {
        match (self.ec_to_machine.get(&ec), self.ec_to_index.get(&ec)) {
            (Some(machine), Some(index)) => Ok((machine, *index)),
            _ if self.is_task_class(ec) => Err(CostModelError::NotAMachineClass(ec)),
            _ => Err(CostModelError::UnknownEquivClass(ec)),
        }
    }

    pub fn is_machine_class(&self, ec: EquivClass) -> bool {
        self.ec_to_machine.contains_key(&ec)
    }
}
