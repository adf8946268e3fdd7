//! Cost model error types.

use flowgrid_affinity::AffinityError;
use flowgrid_core::{ConfigError, EquivClass, ResourceId, TaskId};
use thiserror::Error;

/// Errors surfaced by the cost model.
///
/// None of these are transient: configuration errors mean the engine
/// cannot safely guess intent, the rest mean a caller skipped a lifecycle
/// hook. The scheduler is expected to abort the pass on any of them.
#[derive(Debug, Error)]
pub enum CostModelError {
    #[error("affinity configuration error: {0}")]
    Affinity(#[from] AffinityError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("task not registered: {0}")]
    UnknownTask(TaskId),

    #[error("machine not registered: {0}")]
    UnknownMachine(ResourceId),

    #[error("resource not registered: {0}")]
    UnknownResource(ResourceId),

    #[error("equivalence class not registered: {0:#018x}")]
    UnknownEquivClass(EquivClass),

    #[error("equivalence class {0:#018x} is not a task class")]
    NotATaskClass(EquivClass),

    #[error("equivalence class {0:#018x} is not a machine class")]
    NotAMachineClass(EquivClass),

    #[error("machine name {name:?} already used by machine {existing}")]
    MachineNameConflict { name: String, existing: ResourceId },

    #[error("resource is not a machine: {0}")]
    NotAMachine(ResourceId),

    #[error("machine class {ec:#018x} does not belong to machine {machine}")]
    MachineClassMismatch { ec: EquivClass, machine: ResourceId },

    #[error("task {task} does not belong to equivalence class {ec:#018x}")]
    TaskClassMismatch { task: TaskId, ec: EquivClass },

    #[error("machine {machine} fails the hard constraints of class {ec:#018x}")]
    IncompatibleMachine { ec: EquivClass, machine: ResourceId },

    #[error("priorities not computed for class {ec:#018x} on machine {machine}")]
    UnscoredPair { ec: EquivClass, machine: ResourceId },

    #[error("task is not running: {0}")]
    TaskNotRunning(TaskId),
}

pub type CostModelResult<T> = Result<T, CostModelError>;
