//! Cost model configuration (`flowgrid.toml`).
//!
//! Every field is optional in TOML; missing fields take the defaults below.
//!
//! ```toml
//! unscheduled_cost = 2560000
//! preemption_margin = 1000
//! max_multi_arcs_per_machine = 50
//! max_tasks_per_pu = 1
//!
//! [weights]
//! cpu_mem = 1
//! balanced_res = 1
//! node_affinity_soft = 1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Cost;

/// Per-dimension cost ceiling. Every cost-vector dimension and every
/// normalized priority score lies in `[0, OMEGA]`.
pub const OMEGA: Cost = 1000;

/// Ceiling for configured costs, leaving headroom for the margins added
/// on top of them.
pub const MAX_CONFIGURED_COST: Cost = Cost::MAX / 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Weights applied when flattening a cost vector into a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub cpu_mem: u32,
    pub balanced_res: u32,
    pub node_affinity_soft: u32,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cpu_mem: 1,
            balanced_res: 1,
            node_affinity_soft: 1,
        }
    }
}

impl CostWeights {
    pub fn sum(&self) -> Cost {
        Cost::from(self.cpu_mem) + Cost::from(self.balanced_res) + Cost::from(self.node_affinity_soft)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelConfig {
    /// Cost of the task → unscheduled-aggregator arc.
    pub unscheduled_cost: Cost,
    /// How much cheaper continuing a running task is than preempting it.
    pub preemption_margin: Cost,
    /// Machine equivalence classes registered per machine; bounds the
    /// number of tasks of one class the solver can route to a machine.
    pub max_multi_arcs_per_machine: u64,
    /// Capacity of each leaf → sink arc.
    pub max_tasks_per_pu: u64,
    pub weights: CostWeights,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            unscheduled_cost: 2_560_000,
            preemption_margin: 1000,
            max_multi_arcs_per_machine: 50,
            max_tasks_per_pu: 1,
            weights: CostWeights::default(),
        }
    }
}

impl CostModelConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CostModelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weights.sum() == 0 {
            return Err(ConfigError::Invalid("all cost weights are zero".to_string()));
        }
        if self.max_multi_arcs_per_machine == 0 {
            return Err(ConfigError::Invalid(
                "max_multi_arcs_per_machine must be at least 1".to_string(),
            ));
        }
        if self.unscheduled_cost < 0 {
            return Err(ConfigError::Invalid("unscheduled_cost must be non-negative".to_string()));
        }
        // Preemption must stay strictly dominated by continuation.
        if self.preemption_margin <= 0 {
            return Err(ConfigError::Invalid("preemption_margin must be positive".to_string()));
        }
        if self.unscheduled_cost > MAX_CONFIGURED_COST || self.preemption_margin > MAX_CONFIGURED_COST {
            return Err(ConfigError::Invalid(format!(
                "unscheduled_cost and preemption_margin must not exceed {MAX_CONFIGURED_COST}"
            )));
        }
        Ok(())
    }

    /// Largest scalar `FlattenCostVector` can produce.
    pub fn max_flattened_cost(&self) -> Cost {
        OMEGA * self.weights.sum()
    }
}
