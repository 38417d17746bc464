//! Quest store discovery.
//!
//! The store is found by capability, not by name: the first export whose
//! prototype exposes the lookup-by-id method wins. Strategies are evaluated
//! top-to-bottom; each one checks its export slot across every module before
//! the next strategy is tried. There is no fallback beyond the list.

use std::sync::Arc;

use crate::graph::{HostObject, ModuleGraph, RawRecord};

/// One named lookup: an export slot and the method the export must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupStrategy {
    pub slot: &'static str,
    pub method: &'static str,
}

impl LookupStrategy {
    pub const fn new(slot: &'static str, method: &'static str) -> Self {
        Self { slot, method }
    }

    /// First module export in `slot` that responds to `method`.
    pub fn resolve<'g>(&self, graph: &'g ModuleGraph) -> Option<&'g Arc<dyn HostObject>> {
        graph
            .modules()
            .iter()
            .filter_map(|module| module.export(self.slot))
            .find(|object| object.responds_to(self.method))
    }
}

/// Known export slots of the quest store, in priority order.
pub const QUEST_STORE_STRATEGIES: &[LookupStrategy] = &[
    LookupStrategy::new("Z", "getQuest"),
    LookupStrategy::new("A", "getQuest"),
];

/// Find the quest store using `strategies`, first match wins.
pub fn locate_with<'g>(
    graph: &'g ModuleGraph,
    strategies: &[LookupStrategy],
) -> Option<&'g Arc<dyn HostObject>> {
    strategies.iter().find_map(|strategy| {
        let found = strategy.resolve(graph);
        if found.is_some() {
            tracing::debug!(slot = strategy.slot, "quest store located");
        }
        found
    })
}

pub fn locate_quest_store(graph: &ModuleGraph) -> Option<&Arc<dyn HostObject>> {
    locate_with(graph, QUEST_STORE_STRATEGIES)
}

/// Raw quest records from the host store, or an empty list when the store
/// is not loaded (yet).
pub fn locate_quest_collection(graph: &ModuleGraph) -> Vec<RawRecord> {
    match locate_quest_store(graph) {
        Some(store) => store.records(),
        None => {
            tracing::debug!(modules = graph.modules().len(), "quest store not found");
            Vec::new()
        }
    }
}
