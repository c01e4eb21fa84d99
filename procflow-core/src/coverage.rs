//! Flow coverage.
//!
//! Tallies which nodes and sequence flows of a definition instances have
//! passed through. Flows are identified by their `from -> to` pair; an
//! instance started before an arbitrary node enters it without a flow.

use crate::definition::ProcessDefinition;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Hit counts for one definition.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    nodes: BTreeMap<String, u64>,
    flows: BTreeMap<(String, String), u64>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a visited path. `from` is the node the path was entered from,
    /// if any (the completed task).
    pub fn record_path(&mut self, from: Option<&str>, path: &[String]) {
        let mut prev = from;
        for node in path {
            *self.nodes.entry(node.clone()).or_default() += 1;
            if let Some(prev) = prev {
                *self
                    .flows
                    .entry((prev.to_string(), node.clone()))
                    .or_default() += 1;
            }
            prev = Some(node.as_str());
        }
    }

    /// Times `node` was entered.
    pub fn node_hits(&self, node: &str) -> u64 {
        self.nodes.get(node).copied().unwrap_or(0)
    }

    /// Times the flow `from -> to` was taken.
    pub fn flow_hits(&self, from: &str, to: &str) -> u64 {
        self.flows
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Compares the tally against `definition`.
    pub fn report(&self, definition: &ProcessDefinition) -> CoverageReport {
        let missed_nodes: Vec<String> = definition
            .nodes()
            .iter()
            .filter(|n| !self.nodes.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect();

        let mut all_flows = BTreeSet::new();
        let mut missed_flows = Vec::new();
        for edge in definition.edges() {
            let pair = (edge.from.clone(), edge.to.clone());
            if !all_flows.insert(pair.clone()) {
                continue;
            }
            if !self.flows.contains_key(&pair) {
                missed_flows.push(format!("{} -> {}", pair.0, pair.1));
            }
        }

        CoverageReport {
            process: definition.key.clone(),
            nodes_total: definition.nodes().len(),
            nodes_covered: definition.nodes().len() - missed_nodes.len(),
            flows_total: all_flows.len(),
            flows_covered: all_flows.len() - missed_flows.len(),
            missed_nodes,
            missed_flows,
        }
    }
}

/// Coverage of one definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub process: String,
    pub nodes_total: usize,
    pub nodes_covered: usize,
    pub flows_total: usize,
    pub flows_covered: usize,
    /// Nodes never entered, in declared order.
    pub missed_nodes: Vec<String>,
    /// Flows never taken, as `from -> to`, in declared order.
    pub missed_flows: Vec<String>,
}

impl CoverageReport {
    /// Share of nodes and flows covered, in percent.
    pub fn percent(&self) -> f64 {
        let total = self.nodes_total + self.flows_total;
        if total == 0 {
            return 100.0;
        }
        (self.nodes_covered + self.flows_covered) as f64 * 100.0 / total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.missed_nodes.is_empty() && self.missed_flows.is_empty()
    }
}
