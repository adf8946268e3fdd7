//! flowgrid-core: descriptor records and configuration shared by the
//! affinity matcher and the cost model.
//!
//! The records here are the read-only view the cost model has of the
//! scheduler's task and resource tables. They mirror the shape of the
//! scheduler's wire descriptors, so enum-typed fields that arrive from the
//! wire (selector types) are carried as raw codes and validated at use.

pub mod config;
pub mod types;

pub use config::{ConfigError, CostModelConfig, CostWeights, MAX_CONFIGURED_COST, OMEGA};
pub use types::*;
