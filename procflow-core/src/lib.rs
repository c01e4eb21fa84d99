//! # procflow-core
//!
//! Minimal workflow engine for procflow.
//!
//! This crate provides:
//! - Process definition parsing and validation
//! - Guard expression parsing and exclusive gateway resolution
//! - Process instance state management
//! - The engine that deploys definitions and drives instances
//! - Node and flow coverage collected while instances run
//!
//! ```
//! use procflow_core::{EngineConfig, ProcessEngine, Variables};
//!
//! let engine = ProcessEngine::new(EngineConfig::default());
//! engine
//!     .deploy_yaml(
//!         r#"
//! key: review
//! nodes:
//!   - { id: start, kind: start_event }
//!   - { id: check, kind: user_task, name: Check }
//!   - { id: decide, kind: exclusive_gateway }
//!   - { id: accepted, kind: end_event }
//!   - { id: rework, kind: user_task, name: Rework }
//! edges:
//!   - { from: start, to: check }
//!   - { from: check, to: decide }
//!   - { from: decide, to: accepted, guard: ok }
//!   - { from: decide, to: rework }
//!   - { from: rework, to: check }
//! "#,
//!     )
//!     .unwrap();
//!
//! let mut instance = engine.start_by_key("review").unwrap();
//! assert_eq!(instance.waiting_at(), Some("check"));
//!
//! engine
//!     .complete(&mut instance, &Variables::new().with("ok", true))
//!     .unwrap();
//! assert!(instance.is_ended());
//! ```

pub mod config;
pub mod coverage;
pub mod definition;
pub mod engine;
pub mod error;
pub mod guard;
pub mod instance;
pub mod variables;

pub use config::{Config, ConfigError, DefinitionsConfig, EngineConfig};
pub use coverage::{Coverage, CoverageReport};
pub use definition::{Edge, EdgeSpec, Node, NodeKind, ProcessDefinition, ProcessDefinitionRaw};
pub use engine::{read_definition_file, DeployResult, InstanceBuilder, ProcessEngine};
pub use error::CoreError;
pub use guard::{GatewayEvaluator, GuardExpr, MissingVariablePolicy};
pub use instance::{CompleteResult, InstanceSnapshot, InstanceState, ProcessInstance};
pub use variables::{VarType, VarValue, Variables};
