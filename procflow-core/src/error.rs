//! Core error types.

use crate::variables::VarType;
use thiserror::Error;

/// Errors from the process engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed process definition: {reason}")]
    MalformedDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("process definition not found: {key}")]
    DefinitionNotFound { key: String },

    #[error("process definition already deployed with different content: {key}")]
    DefinitionExists { key: String },

    #[error("node not found in '{key}': {node}")]
    NodeNotFound { key: String, node: String },

    #[error("node is not an exclusive gateway: {node}")]
    NotAGateway { node: String },

    #[error("no outgoing branch of gateway '{gateway}' matched")]
    NoBranchMatched { gateway: String },

    #[error("gateway '{gateway}' matched more than one branch: {}", targets.join(", "))]
    AmbiguousBranch {
        gateway: String,
        targets: Vec<String>,
    },

    #[error("variable '{variable}' required by gateway '{gateway}' is not set")]
    VariableMissing { gateway: String, variable: String },

    #[error("variable '{variable}' has type {actual}, expected {expected}")]
    VariableTypeMismatch {
        variable: String,
        expected: VarType,
        actual: VarType,
    },

    #[error("invalid state for instance {instance_id}: {reason}")]
    InvalidState { instance_id: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns a stable error code suitable for display and matching.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::MalformedDefinition { .. } => "MALFORMED_DEFINITION",
            CoreError::InvalidGuard { .. } => "MALFORMED_DEFINITION",
            CoreError::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            CoreError::DefinitionExists { .. } => "DEFINITION_EXISTS",
            CoreError::NodeNotFound { .. } => "NODE_NOT_FOUND",
            CoreError::NotAGateway { .. } => "BAD_REQUEST",
            CoreError::NoBranchMatched { .. } => "NO_BRANCH_MATCHED",
            CoreError::AmbiguousBranch { .. } => "AMBIGUOUS_BRANCH",
            CoreError::VariableMissing { .. } => "VARIABLE_MISSING",
            CoreError::VariableTypeMismatch { .. } => "VARIABLE_TYPE_MISMATCH",
            CoreError::InvalidState { .. } => "INVALID_STATE",
            CoreError::Json(_) => "BAD_REQUEST",
            CoreError::Yaml(_) => "BAD_REQUEST",
            CoreError::Io(_) => "IO_ERROR",
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CoreError::MalformedDefinition {
            reason: reason.into(),
        }
    }
}
