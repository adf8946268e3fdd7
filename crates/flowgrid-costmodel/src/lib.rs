//! flowgrid cost model: arc costs for a min-cost flow cluster scheduler.
//!
//! The flow solver owns the network; this crate answers "what does this
//! arc cost and how much can it carry" for every arc kind, and keeps the
//! bookkeeping those answers depend on (equivalence classes, per-class
//! priority bounds, per-resource availability) in step with cluster
//! changes.
//!
//! # Components
//!
//! - **`cost_model`**: `CostModel` with lifecycle hooks, arc costs, arc enumeration, stats fold
//! - **`equiv_class`**: task classes and per-machine multi-arc classes
//! - **`priority`**: soft-constraint scores and running min/max normalization
//! - **`stats`**: bottom-up resource usage accumulator
//! - **`knowledge_base`**: read-only runtime hints
//! - **`error`**: invariant and configuration errors

pub mod cost_model;
pub mod equiv_class;
pub mod error;
pub mod knowledge_base;
pub mod priority;
pub mod stats;

pub use cost_model::{CostModel, CostVector};
pub use equiv_class::{EquivClassIndex, machine_signature, task_signature};
pub use error::{CostModelError, CostModelResult};
pub use knowledge_base::{KnowledgeBase, NoKnowledgeBase, StaticKnowledgeBase};
pub use priority::{MinMaxScore, MinMaxScores, PriorityScore, PriorityScorer, PriorityScoresList};
pub use stats::ResourceStats;
