//! Process instance state machine.
//!
//! An instance is always either waiting at exactly one user task or ended.
//! Start events and exclusive gateways are passed through automatically;
//! every call runs to the next wait state before returning.

use crate::definition::{Node, NodeKind, ProcessDefinition};
use crate::error::CoreError;
use crate::guard::GatewayEvaluator;
use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Instance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InstanceState {
    /// Waiting at a user task.
    Running { task: String },
    /// Reached an end event.
    Ended,
}

impl InstanceState {
    pub fn waiting_at(&self) -> Option<&str> {
        match self {
            InstanceState::Running { task } => Some(task.as_str()),
            InstanceState::Ended => None,
        }
    }
}

/// Result of completing a task.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    /// The task that was completed.
    pub completed_task: String,
    /// Nodes entered after the task, ending with the new wait state.
    pub path: Vec<String>,
    /// State after completion.
    pub state: InstanceState,
}

/// A running or ended execution of a process definition.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    /// Unique instance ID.
    pub id: String,

    definition: Arc<ProcessDefinition>,
    variables: Variables,
    state: InstanceState,

    /// Creation timestamp (Unix millis).
    pub created_at: i64,

    /// Last update timestamp (Unix millis).
    pub updated_at: i64,
}

impl ProcessInstance {
    /// Starts an instance.
    ///
    /// With `at` unset the instance enters at the start event; otherwise it
    /// enters directly before the named node. Fails without creating the
    /// instance if the seed variables have the wrong types or a gateway on
    /// the way cannot be resolved.
    pub fn start(
        id: impl Into<String>,
        definition: Arc<ProcessDefinition>,
        at: Option<&str>,
        seed: Variables,
        evaluator: &GatewayEvaluator,
    ) -> Result<Self, CoreError> {
        Self::start_traced(id.into(), definition, at, seed, evaluator).map(|(instance, _)| instance)
    }

    /// Like [`start`](Self::start), also returning the nodes visited on the
    /// way to the first wait state.
    pub(crate) fn start_traced(
        id: String,
        definition: Arc<ProcessDefinition>,
        at: Option<&str>,
        seed: Variables,
        evaluator: &GatewayEvaluator,
    ) -> Result<(Self, Vec<String>), CoreError> {
        check_types(&definition, &seed)?;

        let entry = match at {
            Some(node) => node.to_string(),
            None => definition.start_event().id.clone(),
        };
        let (state, path) = advance(&definition, &entry, &seed, evaluator)?;

        tracing::debug!(
            instance = %id,
            process = %definition.key,
            path = ?path,
            "instance started"
        );

        let now = now_millis();
        let instance = Self {
            id,
            definition,
            variables: seed,
            state,
            created_at: now,
            updated_at: now,
        };
        Ok((instance, path))
    }

    /// Completes the current task, merging `vars` into the instance and
    /// advancing to the next wait state.
    ///
    /// On error the instance keeps its previous variables and position.
    pub fn complete(
        &mut self,
        vars: &Variables,
        evaluator: &GatewayEvaluator,
    ) -> Result<CompleteResult, CoreError> {
        let task = match &self.state {
            InstanceState::Running { task } => task.clone(),
            InstanceState::Ended => {
                return Err(CoreError::InvalidState {
                    instance_id: self.id.clone(),
                    reason: "instance has ended".to_string(),
                })
            }
        };

        check_types(&self.definition, vars)?;

        let mut merged = self.variables.clone();
        merged.merge(vars);

        let next = self
            .definition
            .outgoing(&task)
            .next()
            .map(|edge| edge.to.clone())
            .ok_or_else(|| {
                CoreError::malformed(format!("user task '{}' has no outgoing edge", task))
            })?;
        let (state, path) = advance(&self.definition, &next, &merged, evaluator)?;

        tracing::debug!(
            instance = %self.id,
            task = %task,
            path = ?path,
            "task completed"
        );

        self.variables = merged;
        self.state = state.clone();
        self.updated_at = now_millis();

        Ok(CompleteResult {
            completed_task: task,
            path,
            state,
        })
    }

    /// Returns the ID of the user task the instance waits at, or `None` once
    /// it has ended.
    pub fn waiting_at(&self) -> Option<&str> {
        self.state.waiting_at()
    }

    /// Returns the user task node the instance waits at.
    pub fn current_task(&self) -> Option<&Node> {
        self.waiting_at().and_then(|id| self.definition.node(id))
    }

    /// Returns true once the instance reached an end event.
    pub fn is_ended(&self) -> bool {
        self.state == InstanceState::Ended
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    /// Returns a serializable view of the instance.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.id.clone(),
            process: self.definition.key.clone(),
            state: self.state.clone(),
            task_name: self.current_task().map(|n| n.display_name().to_string()),
            variables: self.variables.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Serializable view of an instance at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub process: String,
    #[serde(flatten)]
    pub state: InstanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub variables: Variables,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Moves from `from` through automatic nodes until a user task or end event.
fn advance(
    definition: &ProcessDefinition,
    from: &str,
    vars: &Variables,
    evaluator: &GatewayEvaluator,
) -> Result<(InstanceState, Vec<String>), CoreError> {
    let mut cursor = from.to_string();
    let mut path = Vec::new();

    loop {
        let node = definition
            .node(&cursor)
            .ok_or_else(|| CoreError::NodeNotFound {
                key: definition.key.clone(),
                node: cursor.clone(),
            })?;
        path.push(node.id.clone());

        let next = match node.kind {
            NodeKind::UserTask => {
                return Ok((
                    InstanceState::Running {
                        task: node.id.clone(),
                    },
                    path,
                ))
            }
            NodeKind::EndEvent => return Ok((InstanceState::Ended, path)),
            NodeKind::StartEvent => definition.outgoing(&node.id).next().ok_or_else(|| {
                CoreError::malformed(format!("start event '{}' has no outgoing edge", node.id))
            })?,
            NodeKind::ExclusiveGateway => evaluator
                .resolve(definition, &node.id, vars)
                .map_err(|e| {
                    tracing::warn!(gateway = %node.id, error = %e, "gateway resolution failed");
                    e
                })?,
        };

        tracing::trace!(from = %node.id, to = %next.to, "advance");
        cursor = next.to.clone();
    }
}

fn check_types(definition: &ProcessDefinition, vars: &Variables) -> Result<(), CoreError> {
    for (name, value) in vars {
        if let Some(expected) = definition.variable_type(name) {
            if value.var_type() != expected {
                return Err(CoreError::VariableTypeMismatch {
                    variable: name.clone(),
                    expected,
                    actual: value.var_type(),
                });
            }
        }
    }
    Ok(())
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
