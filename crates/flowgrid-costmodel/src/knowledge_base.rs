//! Read-only source of historical task statistics.

use std::collections::HashMap;

use flowgrid_core::EquivClass;

/// Historical runtime hints, keyed by task equivalence class.
///
/// Implementations are queried concurrently without coordination and
/// must not block.
pub trait KnowledgeBase: Send + Sync {
    /// Mean observed runtime of tasks in `ec`, in milliseconds.
    fn mean_runtime_ms(&self, ec: EquivClass) -> Option<u64>;
}

/// A knowledge base with no history.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledgeBase;

impl KnowledgeBase for NoKnowledgeBase {
    fn mean_runtime_ms(&self, _ec: EquivClass) -> Option<u64> {
        None
    }
}

/// A fixed table of runtimes, mostly useful for replay and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    runtimes: HashMap<EquivClass, u64>,
}

impl StaticKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, ec: EquivClass, runtime_ms: u64) -> Self {
        self.runtimes.insert(ec, runtime_ms);
        self
    }
}

impl KnowledgeBase for StaticKnowledgeBase {
    fn mean_runtime_ms(&self, ec: EquivClass) -> Option<u64> {
        self.runtimes.get(&ec).copied()
    }
}
