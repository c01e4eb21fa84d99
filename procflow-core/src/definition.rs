//! Process definition types.
//!
//! Process definitions use a small graph DSL, in YAML or JSON:
//!
//! ```yaml
//! key: order
//! nodes:
//!   - { id: start, kind: start_event }
//!   - { id: review, kind: user_task, name: Review order }
//!   - { id: approved, kind: exclusive_gateway }
//!   - { id: ship, kind: user_task, name: Ship order }
//!   - { id: end, kind: end_event }
//! edges:
//!   - { from: start, to: review }
//!   - { from: review, to: approved }
//!   - { from: approved, to: ship, guard: order_approved }
//!   - { from: approved, to: end }
//!   - { from: ship, to: end }
//! ```
//!
//! An unguarded edge leaving a gateway is its default flow, taken only when
//! no guarded edge matches.

use crate::error::CoreError;
use crate::guard::GuardExpr;
use crate::variables::VarType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// The kind of a node in the process graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    StartEvent,
    EndEvent,
    UserTask,
    ExclusiveGateway,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::StartEvent => "start_event",
            NodeKind::EndEvent => "end_event",
            NodeKind::UserTask => "user_task",
            NodeKind::ExclusiveGateway => "exclusive_gateway",
        }
    }
}

/// A node in the process graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID.
    pub id: String,

    /// Node kind.
    pub kind: NodeKind,

    /// Display name (task label).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Node {
    /// Returns the display name, falling back to the node ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An edge as written in the raw definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Optional edge ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Source node.
    pub from: String,

    /// Target node.
    pub to: String,

    /// Optional guard expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

/// Raw process definition as written by authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinitionRaw {
    /// Key the definition is deployed under.
    pub key: String,

    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Explicit variable type declarations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VarType>,

    /// All nodes.
    pub nodes: Vec<Node>,

    /// All edges, in declared order.
    pub edges: Vec<EdgeSpec>,
}

/// A compiled edge.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    guard: Option<GuardExpr>,
}

impl Edge {
    pub fn guard(&self) -> Option<&GuardExpr> {
        self.guard.as_ref()
    }

    /// Returns true for an unguarded edge leaving a gateway.
    pub fn is_default(&self) -> bool {
        self.guard.is_none()
    }
}

/// Validated and indexed process definition.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    /// Deployment key.
    pub key: String,

    /// Display name.
    pub name: Option<String>,

    /// Nodes in declared order.
    nodes: Vec<Node>,

    /// Node ID -> position in `nodes`.
    node_index: HashMap<String, usize>,

    /// Edges in declared order.
    edges: Vec<Edge>,

    /// Node ID -> positions in `edges` of its outgoing edges.
    outgoing: HashMap<String, Vec<usize>>,

    /// The single start event.
    start_event: String,

    /// Variable types inferred from guards and explicit declarations.
    variable_types: BTreeMap<String, VarType>,

    /// Original raw definition.
    pub raw: ProcessDefinitionRaw,

    /// Hash of the definition for idempotent deployment.
    pub checksum: String,
}

impl ProcessDefinition {
    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let raw: ProcessDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::compile(raw)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let raw: ProcessDefinitionRaw = serde_yaml::from_str(yaml)?;
        Self::compile(raw)
    }

    /// Validates a raw definition and builds the lookup indexes.
    pub fn compile(raw: ProcessDefinitionRaw) -> Result<Self, CoreError> {
        if raw.key.trim().is_empty() {
            return Err(CoreError::malformed("definition key is empty"));
        }

        // Nodes
        let mut node_index = HashMap::with_capacity(raw.nodes.len());
        for (i, node) in raw.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(CoreError::malformed(format!("node #{} has an empty id", i)));
            }
            if node_index.insert(node.id.clone(), i).is_some() {
                return Err(CoreError::malformed(format!("duplicate node id '{}'", node.id)));
            }
        }

        let starts: Vec<&Node> = raw
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::StartEvent)
            .collect();
        let start_event = match starts.as_slice() {
            [start] => start.id.clone(),
            [] => return Err(CoreError::malformed("no start event declared")),
            many => {
                return Err(CoreError::malformed(format!(
                    "exactly one start event allowed, found {}",
                    many.len()
                )))
            }
        };

        // Edges
        let mut edges = Vec::with_capacity(raw.edges.len());
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut variable_types = raw.variables.clone();

        for spec in &raw.edges {
            let source = node_index
                .get(&spec.from)
                .map(|&i| &raw.nodes[i])
                .ok_or_else(|| {
                    CoreError::malformed(format!("edge source '{}' is not a node", spec.from))
                })?;
            if !node_index.contains_key(&spec.to) {
                return Err(CoreError::malformed(format!(
                    "edge target '{}' is not a node",
                    spec.to
                )));
            }

            let guard = match &spec.guard {
                Some(text) => {
                    if source.kind != NodeKind::ExclusiveGateway {
                        return Err(CoreError::malformed(format!(
                            "guard on edge '{}' -> '{}' but '{}' is not an exclusive gateway",
                            spec.from, spec.to, spec.from
                        )));
                    }
                    let expr = GuardExpr::parse(text)?;
                    for (variable, ty) in expr.references() {
                        record_type(&mut variable_types, variable, ty)?;
                    }
                    Some(expr)
                }
                None => None,
            };

            outgoing
                .entry(spec.from.clone())
                .or_default()
                .push(edges.len());
            edges.push(Edge {
                id: spec.id.clone(),
                from: spec.from.clone(),
                to: spec.to.clone(),
                guard,
            });
        }

        // Per-kind edge rules
        for node in &raw.nodes {
            let out: Vec<&Edge> = outgoing
                .get(&node.id)
                .map(|ix| ix.iter().map(|&i| &edges[i]).collect())
                .unwrap_or_default();

            match node.kind {
                NodeKind::StartEvent | NodeKind::UserTask if out.len() != 1 => {
                    return Err(CoreError::malformed(format!(
                        "{} '{}' must have exactly one outgoing edge, found {}",
                        node.kind.as_str(),
                        node.id,
                        out.len()
                    )));
                }
                NodeKind::EndEvent if !out.is_empty() => {
                    return Err(CoreError::malformed(format!(
                        "end_event '{}' must not have outgoing edges",
                        node.id
                    )));
                }
                NodeKind::ExclusiveGateway => {
                    if out.is_empty() {
                        return Err(CoreError::malformed(format!(
                            "gateway '{}' has no outgoing edges",
                            node.id
                        )));
                    }
                    if out.iter().filter(|e| e.is_default()).count() > 1 {
                        return Err(CoreError::malformed(format!(
                            "gateway '{}' has more than one unguarded edge",
                            node.id
                        )));
                    }
                }
                _ => {}
            }
        }

        // Weak connectivity from the start event
        let mut neighbours: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            neighbours
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
            neighbours
                .entry(edge.to.as_str())
                .or_default()
                .push(edge.from.as_str());
        }
        let mut seen: HashSet<&str> = HashSet::from([start_event.as_str()]);
        let mut queue = VecDeque::from([start_event.as_str()]);
        while let Some(id) = queue.pop_front() {
            for &next in neighbours.get(id).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let detached: Vec<&str> = raw
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !seen.contains(id))
            .collect();
        if !detached.is_empty() {
            return Err(CoreError::malformed(format!(
                "nodes not connected to start event '{}': {}",
                start_event,
                detached.join(", ")
            )));
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            key: raw.key.clone(),
            name: raw.name.clone(),
            nodes: raw.nodes.clone(),
            node_index,
            edges,
            outgoing,
            start_event,
            variable_types,
            raw,
            checksum,
        })
    }

    /// Looks up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns all nodes in declared order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns all edges in declared order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the outgoing edges of a node, in declared order.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    /// Returns the start event.
    pub fn start_event(&self) -> &Node {
        &self.nodes[self.node_index[&self.start_event]]
    }

    /// Returns the user tasks in declared order.
    pub fn user_tasks(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::UserTask)
    }

    /// Returns the type a variable must have, if any guard or declaration
    /// fixes it.
    pub fn variable_type(&self, name: &str) -> Option<VarType> {
        self.variable_types.get(name).copied()
    }

    /// Returns all typed variables.
    pub fn variable_types(&self) -> &BTreeMap<String, VarType> {
        &self.variable_types
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }

    /// Returns the raw definition as YAML.
    pub fn to_yaml(&self) -> Result<String, CoreError> {
        Ok(serde_yaml::to_string(&self.raw)?)
    }
}

fn record_type(
    types: &mut BTreeMap<String, VarType>,
    variable: &str,
    ty: VarType,
) -> Result<(), CoreError> {
    match types.get(variable) {
        Some(&existing) if existing != ty => Err(CoreError::malformed(format!(
            "variable '{}' used as {} and as {}",
            variable, existing, ty
        ))),
        Some(_) => Ok(()),
        None => {
            types.insert(variable.to_string(), ty);
            Ok(())
        }
    }
}
