//! Process engine - coordinates deployed definitions and instance lifecycles.

use crate::config::EngineConfig;
use crate::coverage::{Coverage, CoverageReport};
use crate::definition::{ProcessDefinition, ProcessDefinitionRaw};
use crate::error::CoreError;
use crate::guard::GatewayEvaluator;
use crate::instance::{CompleteResult, ProcessInstance};
use crate::variables::Variables;
use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Result of deploying a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployResult {
    pub key: String,
    pub checksum: String,
    /// False when identical content was already deployed under the key.
    pub created: bool,
}

/// The process engine.
pub struct ProcessEngine {
    /// Deployed definitions indexed by key.
    definitions: DashMap<String, Arc<ProcessDefinition>>,

    /// Nodes and flows visited by instances, per definition key.
    coverage: DashMap<String, Coverage>,

    /// Settings the evaluator was built from.
    config: EngineConfig,

    evaluator: GatewayEvaluator,
}

impl ProcessEngine {
    /// Creates an engine with no deployed definitions.
    pub fn new(config: EngineConfig) -> Self {
        let evaluator = config.evaluator();
        Self {
            definitions: DashMap::new(),
            coverage: DashMap::new(),
            config,
            evaluator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &GatewayEvaluator {
        &self.evaluator
    }

    // =========================================================================
    // Deployment
    // =========================================================================

    /// Compiles and registers a definition.
    ///
    /// Deploying content identical to what is already registered under the
    /// same key succeeds with `created == false`. Different content under an
    /// existing key fails with [`CoreError::DefinitionExists`].
    pub fn deploy(&self, raw: ProcessDefinitionRaw) -> Result<DeployResult, CoreError> {
        let definition = ProcessDefinition::compile(raw)?;
        let key = definition.key.clone();
        let checksum = definition.checksum.clone();

        match self.definitions.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get().checksum == checksum {
                    return Ok(DeployResult {
                        key,
                        checksum,
                        created: false,
                    });
                }
                Err(CoreError::DefinitionExists { key })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    process = %key,
                    checksum = %checksum,
                    nodes = definition.nodes().len(),
                    edges = definition.edges().len(),
                    "definition deployed"
                );
                slot.insert(Arc::new(definition));
                Ok(DeployResult {
                    key,
                    checksum,
                    created: true,
                })
            }
        }
    }

    /// Deploys a definition given as JSON.
    pub fn deploy_json(&self, json: &serde_json::Value) -> Result<DeployResult, CoreError> {
        let raw: ProcessDefinitionRaw = serde_json::from_value(json.clone())?;
        self.deploy(raw)
    }

    /// Deploys a definition given as YAML text.
    pub fn deploy_yaml(&self, yaml: &str) -> Result<DeployResult, CoreError> {
        let raw: ProcessDefinitionRaw = serde_yaml::from_str(yaml)?;
        self.deploy(raw)
    }

    /// Deploys a definition file. `.json` files are read as JSON, anything
    /// else as YAML.
    pub fn deploy_file(&self, path: impl AsRef<Path>) -> Result<DeployResult, CoreError> {
        let raw = read_definition_file(path.as_ref())?;
        self.deploy(raw)
    }

    /// Gets a deployed definition.
    pub fn get_definition(&self, key: &str) -> Result<Arc<ProcessDefinition>, CoreError> {
        self.definitions
            .get(key)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::DefinitionNotFound {
                key: key.to_string(),
            })
    }

    /// Lists deployed definition keys in sorted order.
    pub fn list_definitions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Starts an instance at the start event with no variables.
    pub fn start_by_key(&self, key: &str) -> Result<ProcessInstance, CoreError> {
        self.create_instance_by_key(key).execute()
    }

    /// Returns a builder for an instance of the definition deployed under `key`.
    pub fn create_instance_by_key(&self, key: &str) -> InstanceBuilder<'_> {
        InstanceBuilder {
            engine: self,
            key: key.to_string(),
            start_before: None,
            variables: Variables::new(),
            instance_id: None,
        }
    }

    /// Completes the task `instance` waits at.
    pub fn complete(
        &self,
        instance: &mut ProcessInstance,
        vars: &Variables,
    ) -> Result<CompleteResult, CoreError> {
        let result = instance.complete(vars, &self.evaluator)?;
        self.record_coverage(
            &instance.definition().key,
            Some(&result.completed_task),
            &result.path,
        );
        Ok(result)
    }

    // =========================================================================
    // Coverage
    // =========================================================================

    /// Reports which nodes and flows of `key` instances started or completed
    /// through this engine have visited.
    pub fn coverage(&self, key: &str) -> Result<CoverageReport, CoreError> {
        let definition = self.get_definition(key)?;
        Ok(match self.coverage.get(key) {
            Some(coverage) => coverage.report(&definition),
            None => Coverage::new().report(&definition),
        })
    }

    /// Forgets the coverage collected for `key`.
    pub fn reset_coverage(&self, key: &str) {
        self.coverage.remove(key);
    }

    fn record_coverage(&self, key: &str, from: Option<&str>, path: &[String]) {
        self.coverage
            .entry(key.to_string())
            .or_default()
            .record_path(from, path);
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Configures and starts a new instance.
#[must_use = "the instance is only created by `execute`"]
pub struct InstanceBuilder<'e> {
    engine: &'e ProcessEngine,
    key: String,
    start_before: Option<String>,
    variables: Variables,
    instance_id: Option<String>,
}

impl InstanceBuilder<'_> {
    /// Enters the instance directly before `node` instead of at the start event.
    pub fn start_before_activity(mut self, node: impl Into<String>) -> Self {
        self.start_before = Some(node.into());
        self
    }

    /// Seeds the instance's variables. Later calls merge over earlier ones.
    pub fn set_variables(mut self, vars: Variables) -> Self {
        self.variables.merge(&vars);
        self
    }

    /// Uses `id` instead of a generated UUID.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Creates the instance and runs it to its first wait state.
    pub fn execute(self) -> Result<ProcessInstance, CoreError> {
        let definition = self.engine.get_definition(&self.key)?;
        let id = self
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (instance, path) = ProcessInstance::start_traced(
            id,
            definition,
            self.start_before.as_deref(),
            self.variables,
            &self.engine.evaluator,
        )?;
        self.engine.record_coverage(&self.key, None, &path);
        Ok(instance)
    }
}

/// Reads a raw definition from disk, choosing the format by extension.
pub fn read_definition_file(path: &Path) -> Result<ProcessDefinitionRaw, CoreError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::MissingVariablePolicy;
    use crate::instance::InstanceState;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    const LARGER_PROCESS: &str = include_str!("../../definitions/larger_process.yaml");

    fn test_engine() -> ProcessEngine {
        let engine = ProcessEngine::default();
        engine.deploy_yaml(LARGER_PROCESS).unwrap();
        engine
    }

    fn assert_waiting_at(instance: &ProcessInstance, id: &str, name: &str) {
        assert_eq!(instance.waiting_at(), Some(id));
        let task = instance.current_task().unwrap();
        assert_eq!(task.display_name(), name);
    }

    fn start_before(engine: &ProcessEngine, node: &str, seed: Variables) -> ProcessInstance {
        let instance = engine
            .create_instance_by_key("LargerProcess")
            .start_before_activity(node)
            .set_variables(seed)
            .execute()
            .unwrap();
        assert_eq!(instance.waiting_at(), Some(node));
        instance
    }

    // =========================================================================
    // LargerProcess scenarios
    // =========================================================================

    #[test]
    fn test_parsing_and_deployment() {
        let engine = ProcessEngine::default();
        let result = engine.deploy_yaml(LARGER_PROCESS).unwrap();
        assert_eq!(result.key, "LargerProcess");
        assert!(result.created);
        assert_eq!(result.checksum.len(), 8);
        assert_eq!(engine.list_definitions(), vec!["LargerProcess"]);
    }

    #[test]
    fn test_happy_path() {
        let engine = test_engine();
        let mut instance = engine.start_by_key("LargerProcess").unwrap();

        assert_waiting_at(&instance, "projectRegistration", "task1");
        engine.complete(&mut instance, &Variables::new()).unwrap();
        assert_waiting_at(&instance, "isSubjectToClauseT", "task2");

        let vars = Variables::new().with("prc_is_subject_to_clause_t", true);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "issueApprovalCode", "task4");

        let result = engine.complete(&mut instance, &Variables::new()).unwrap();
        assert!(instance.is_ended());
        assert_eq!(result.completed_task, "issueApprovalCode");
        assert_eq!(result.path, vec!["approvedEnd"]);
    }

    #[test]
    fn test_complete_is_subject_to_clause_t_with_false() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "isSubjectToClauseT", Variables::new());

        let vars = Variables::new().with("prc_is_subject_to_clause_t", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "isEnactedByStateCouncil", "task3");
    }

    #[test]
    fn test_complete_is_enacted_by_state_council_with_true() {
        let engine = test_engine();
        let seed = Variables::new().with("prc_is_subject_to_clause_t", false);
        let mut instance = start_before(&engine, "isEnactedByStateCouncil", seed);

        let vars = Variables::new().with("prc_is_enacted_by_state_council", true);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "confirmationAndCostAcception", "task6");
    }

    #[test]
    fn test_complete_is_enacted_by_state_council_with_false() {
        let engine = test_engine();
        let seed = Variables::new().with("prc_is_subject_to_clause_t", false);
        let mut instance = start_before(&engine, "isEnactedByStateCouncil", seed);

        let vars = Variables::new().with("prc_is_enacted_by_state_council", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "requiredToEditOrSelectArbiters", "task7");
    }

    fn confirmation_instance(engine: &ProcessEngine) -> ProcessInstance {
        let seed = Variables::new()
            .with("prc_is_subject_to_clause_t", false)
            .with("prc_is_enacted_by_state_council", true);
        start_before(engine, "confirmationAndCostAcception", seed)
    }

    #[test]
    fn test_confirmation_option1_issues_approval_code() {
        let engine = test_engine();
        let mut instance = confirmation_instance(&engine);

        let vars = Variables::new()
            .with("prc_confirmation", true)
            .with("prc_is_cost_accepted", true)
            .with("prc_required_to_edit", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "issueApprovalCode", "task4");
    }

    #[test]
    fn test_confirmation_option2_notifies_disapproval() {
        let engine = test_engine();
        let mut instance = confirmation_instance(&engine);

        let vars = Variables::new()
            .with("prc_confirmation", false)
            .with("prc_is_cost_accepted", true)
            .with("prc_required_to_edit", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "disapprovalNotifying", "task5");

        engine.complete(&mut instance, &Variables::new()).unwrap();
        assert!(instance.is_ended());
    }

    #[test]
    fn test_confirmation_option3_requires_arbiters() {
        let engine = test_engine();
        let mut instance = confirmation_instance(&engine);

        let vars = Variables::new()
            .with("prc_confirmation", true)
            .with("prc_is_cost_accepted", false)
            .with("prc_required_to_edit", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "requiredToEditOrSelectArbiters", "task7");
    }

    #[test]
    fn test_confirmation_option4_returns_to_registration() {
        let engine = test_engine();
        let mut instance = confirmation_instance(&engine);

        let vars = Variables::new()
            .with("prc_confirmation", true)
            .with("prc_required_to_edit", true);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "projectRegistration", "task1");
    }

    fn arbiters_seed() -> Variables {
        Variables::new()
            .with("prc_is_subject_to_clause_t", false)
            .with("prc_is_enacted_by_state_council", false)
    }

    #[test]
    fn test_complete_required_to_edit_or_select_arbiters_with_true() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "requiredToEditOrSelectArbiters", arbiters_seed());

        let vars = Variables::new().with("prc_required_to_edit_or_select_arbiters", true);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "projectRegistration", "task1");
    }

    #[test]
    fn test_complete_required_to_edit_or_select_arbiters_with_false() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "requiredToEditOrSelectArbiters", arbiters_seed());

        let vars = Variables::new().with("prc_required_to_edit_or_select_arbiters", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "callForArbitration", "task9");

        engine.complete(&mut instance, &Variables::new()).unwrap();
        assert_waiting_at(&instance, "isProjectApproved", "task8");
    }

    fn approval_instance(engine: &ProcessEngine) -> ProcessInstance {
        let seed = arbiters_seed().with("prc_required_to_edit_or_select_arbiters", false);
        start_before(engine, "isProjectApproved", seed)
    }

    #[test]
    fn test_complete_is_project_approved_with_true() {
        let engine = test_engine();
        let mut instance = approval_instance(&engine);

        let vars = Variables::new().with("prc_is_project_approved", true);
        let result = engine.complete(&mut instance, &vars).unwrap();
        assert!(instance.is_ended());
        assert_eq!(result.state, InstanceState::Ended);
    }

    #[test]
    fn test_complete_is_project_approved_with_false() {
        let engine = test_engine();
        let mut instance = approval_instance(&engine);

        let vars = Variables::new().with("prc_is_project_approved", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "disapprovalNotifying", "task5");
    }

    // =========================================================================
    // Engine behavior
    // =========================================================================

    #[test]
    fn test_missing_variable_takes_negated_branch() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "isSubjectToClauseT", Variables::new());

        engine.complete(&mut instance, &Variables::new()).unwrap();
        assert_waiting_at(&instance, "isEnactedByStateCouncil", "task3");
    }

    #[test]
    fn test_missing_variable_takes_default_flow() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "requiredToEditOrSelectArbiters", Variables::new());

        let result = engine.complete(&mut instance, &Variables::new()).unwrap();
        assert_eq!(
            result.path,
            vec!["arbitersDecision", "callForArbitration"]
        );
    }

    #[test]
    fn test_missing_variable_error_policy() {
        let engine = ProcessEngine::new(EngineConfig {
            strict_gateways: false,
            missing_variables: MissingVariablePolicy::Error,
        });
        engine.deploy_yaml(LARGER_PROCESS).unwrap();

        let mut instance = start_before(&engine, "isSubjectToClauseT", Variables::new());
        let err = engine.complete(&mut instance, &Variables::new()).unwrap_err();
        assert!(matches!(err, CoreError::VariableMissing { .. }));
        assert_eq!(instance.waiting_at(), Some("isSubjectToClauseT"));
    }

    #[test]
    fn test_strict_gateways_run_larger_process() {
        let engine = ProcessEngine::new(EngineConfig {
            strict_gateways: true,
            missing_variables: MissingVariablePolicy::DefaultFalse,
        });
        engine.deploy_yaml(LARGER_PROCESS).unwrap();

        let mut instance = confirmation_instance(&engine);
        let vars = Variables::new()
            .with("prc_confirmation", true)
            .with("prc_is_cost_accepted", false)
            .with("prc_required_to_edit", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "requiredToEditOrSelectArbiters", "task7");

        let vars = Variables::new().with("prc_required_to_edit_or_select_arbiters", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "callForArbitration", "task9");
    }

    #[test]
    fn test_wait_state_reads_are_idempotent() {
        let engine = test_engine();
        let instance = engine.start_by_key("LargerProcess").unwrap();

        for _ in 0..3 {
            assert_eq!(instance.waiting_at(), Some("projectRegistration"));
            assert!(!instance.is_ended());
        }
    }

    #[test]
    fn test_merge_overwrites_and_repeats_are_noops() {
        let engine = test_engine();
        let seed = Variables::new().with("prc_is_subject_to_clause_t", true);
        let mut instance = start_before(&engine, "isSubjectToClauseT", seed);

        // A later value replaces the seed before the gateway sees it.
        let vars = Variables::new().with("prc_is_subject_to_clause_t", false);
        engine.complete(&mut instance, &vars).unwrap();
        assert_waiting_at(&instance, "isEnactedByStateCouncil", "task3");

        let before = instance.variables().clone();
        let vars = Variables::new().with("prc_is_subject_to_clause_t", false);
        let mut other = instance.clone();
        engine.complete(&mut other, &vars).unwrap();
        engine.complete(&mut instance, &Variables::new()).unwrap();
        assert_eq!(other.state(), instance.state());
        assert_eq!(before, *instance.variables());
    }

    #[test]
    fn test_complete_after_end_fails() {
        let engine = test_engine();
        let mut instance = approval_instance(&engine);
        let vars = Variables::new().with("prc_is_project_approved", true);
        engine.complete(&mut instance, &vars).unwrap();

        let err = engine.complete(&mut instance, &Variables::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
        assert!(instance.is_ended());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let engine = test_engine();
        let mut instance = start_before(&engine, "isSubjectToClauseT", Variables::new());

        let vars = Variables::new().with("prc_is_subject_to_clause_t", "yes");
        let err = engine.complete(&mut instance, &vars).unwrap_err();
        assert!(matches!(err, CoreError::VariableTypeMismatch { .. }));
        assert_eq!(instance.waiting_at(), Some("isSubjectToClauseT"));
        assert!(instance.variables().is_empty());
    }

    #[test]
    fn test_start_unknown_definition() {
        let engine = ProcessEngine::default();
        let err = engine.start_by_key("Missing").unwrap_err();
        assert!(matches!(err, CoreError::DefinitionNotFound { .. }));
        assert_eq!(err.error_code(), "DEFINITION_NOT_FOUND");
    }

    #[test]
    fn test_start_before_unknown_node() {
        let engine = test_engine();
        let err = engine
            .create_instance_by_key("LargerProcess")
            .start_before_activity("noSuchTask")
            .execute()
            .unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound { .. }));
    }

    #[test]
    fn test_explicit_and_generated_instance_ids() {
        let engine = test_engine();
        let named = engine
            .create_instance_by_key("LargerProcess")
            .instance_id("order-42")
            .execute()
            .unwrap();
        assert_eq!(named.id, "order-42");

        let a = engine.start_by_key("LargerProcess").unwrap();
        let b = engine.start_by_key("LargerProcess").unwrap();
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_deploy_idempotent() {
        let engine = test_engine();
        let first = engine.get_definition("LargerProcess").unwrap().checksum.clone();

        let again = engine.deploy_yaml(LARGER_PROCESS).unwrap();
        assert!(!again.created);
        assert_eq!(again.checksum, first);
    }

    #[test]
    fn test_deploy_conflicting_content() {
        let engine = test_engine();
        let changed = LARGER_PROCESS.replace("name: task1", "name: registration");

        let err = engine.deploy_yaml(&changed).unwrap_err();
        assert!(matches!(err, CoreError::DefinitionExists { .. }));
        let def = engine.get_definition("LargerProcess").unwrap();
        assert_eq!(def.node("projectRegistration").unwrap().display_name(), "task1");
    }

    #[test]
    fn test_deploy_json_matches_yaml_checksum() {
        let yaml_engine = test_engine();
        let def = yaml_engine.get_definition("LargerProcess").unwrap();

        let json_engine = ProcessEngine::default();
        let result = json_engine.deploy_json(&def.to_json().unwrap()).unwrap();
        assert_eq!(result.checksum, def.checksum);
    }

    #[test]
    fn test_deploy_malformed_is_not_registered() {
        let engine = ProcessEngine::default();
        let bad = json!({
            "key": "broken",
            "nodes": [{"id": "t", "kind": "user_task"}],
            "edges": []
        });
        let err = engine.deploy_json(&bad).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_DEFINITION");
        assert!(engine.list_definitions().is_empty());
        assert!(matches!(
            engine.get_definition("broken"),
            Err(CoreError::DefinitionNotFound { .. })
        ));
    }

    #[test]
    fn test_deploy_file_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml_path = dir.path().join("larger.yaml");
        std::fs::write(&yaml_path, LARGER_PROCESS).unwrap();

        let engine = ProcessEngine::default();
        let from_yaml = engine.deploy_file(&yaml_path).unwrap();

        let json = engine.get_definition("LargerProcess").unwrap().to_json().unwrap();
        let json_path = dir.path().join("larger.json");
        std::fs::write(&json_path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

        let from_json = engine.deploy_file(&json_path).unwrap();
        assert!(!from_json.created);
        assert_eq!(from_json.checksum, from_yaml.checksum);

        let missing = engine.deploy_file(dir.path().join("nope.yaml")).unwrap_err();
        assert_eq!(missing.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_list_definitions_sorted() {
        let engine = test_engine();
        engine
            .deploy_json(&json!({
                "key": "Approval",
                "nodes": [
                    {"id": "s", "kind": "start_event"},
                    {"id": "e", "kind": "end_event"}
                ],
                "edges": [{"from": "s", "to": "e"}]
            }))
            .unwrap();
        assert_eq!(engine.list_definitions(), vec!["Approval", "LargerProcess"]);

        let mut instance = engine.start_by_key("Approval").unwrap();
        assert!(instance.is_ended());
        assert!(engine.complete(&mut instance, &Variables::new()).is_err());
    }

    #[test]
    fn test_coverage_across_scenarios() {
        let engine = test_engine();
        let empty = engine.coverage("LargerProcess").unwrap();
        assert_eq!(empty.nodes_total, 17);
        assert_eq!(empty.flows_total, 22);
        assert_eq!(empty.nodes_covered, 0);

        let mut instance = engine.start_by_key("LargerProcess").unwrap();
        engine.complete(&mut instance, &Variables::new()).unwrap();
        let vars = Variables::new().with("prc_is_subject_to_clause_t", true);
        engine.complete(&mut instance, &vars).unwrap();
        engine.complete(&mut instance, &Variables::new()).unwrap();

        let happy = engine.coverage("LargerProcess").unwrap();
        assert_eq!(happy.nodes_covered, 6);
        assert_eq!(happy.flows_covered, 5);
        assert!(happy.missed_nodes.contains(&"disapprovedEnd".to_string()));

        // Starting before a task enters it without taking a flow.
        let mut instance = approval_instance(&engine);
        let vars = Variables::new().with("prc_is_project_approved", false);
        engine.complete(&mut instance, &vars).unwrap();
        engine.complete(&mut instance, &Variables::new()).unwrap();

        let report = engine.coverage("LargerProcess").unwrap();
        assert_eq!(report.nodes_covered, 6 + 4);
        assert_eq!(report.flows_covered, 5 + 3);
        assert!(!report
            .missed_flows
            .contains(&"approvalDecision -> disapprovalNotifying".to_string()));
        assert!(report
            .missed_flows
            .contains(&"callForArbitration -> isProjectApproved".to_string()));

        // Failed calls record nothing.
        let mut instance = start_before(&engine, "isSubjectToClauseT", Variables::new());
        let bad = Variables::new().with("prc_is_subject_to_clause_t", 1);
        assert!(engine.complete(&mut instance, &bad).is_err());
        let after = engine.coverage("LargerProcess").unwrap();
        assert_eq!(after.flows_covered, report.flows_covered);

        engine.reset_coverage("LargerProcess");
        assert_eq!(engine.coverage("LargerProcess").unwrap().nodes_covered, 0);
        assert!(matches!(
            engine.coverage("Missing"),
            Err(CoreError::DefinitionNotFound { .. })
        ));
    }

    #[test]
    fn test_instances_share_definition_across_threads() {
        let engine = Arc::new(test_engine());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut instance = approval_instance(&engine);
                    let vars = Variables::new().with("prc_is_project_approved", i % 2 == 0);
                    engine.complete(&mut instance, &vars).unwrap();
                    instance.is_ended()
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), i % 2 == 0);
        }
    }

    /// Drives LargerProcess from the start, answering every gateway question
    /// from `choices`, and records each wait state.
    fn drive(engine: &ProcessEngine, choices: &[bool]) -> Vec<Option<String>> {
        let mut instance = engine.start_by_key("LargerProcess").unwrap();
        let mut visited = vec![instance.waiting_at().map(str::to_string)];
        let mut choices = choices.iter().copied().cycle();

        for _ in 0..24 {
            let Some(task) = instance.waiting_at() else {
                break;
            };
            let vars = match task {
                "isSubjectToClauseT" => Variables::new()
                    .with("prc_is_subject_to_clause_t", choices.next().unwrap_or(false)),
                "isEnactedByStateCouncil" => Variables::new()
                    .with("prc_is_enacted_by_state_council", choices.next().unwrap_or(false)),
                "confirmationAndCostAcception" => Variables::new()
                    .with("prc_required_to_edit", choices.next().unwrap_or(false))
                    .with("prc_confirmation", choices.next().unwrap_or(false))
                    .with("prc_is_cost_accepted", choices.next().unwrap_or(false)),
                "requiredToEditOrSelectArbiters" => Variables::new().with(
                    "prc_required_to_edit_or_select_arbiters",
                    choices.next().unwrap_or(false),
                ),
                "isProjectApproved" => Variables::new()
                    .with("prc_is_project_approved", choices.next().unwrap_or(false)),
                _ => Variables::new(),
            };
            engine.complete(&mut instance, &vars).unwrap();
            visited.push(instance.waiting_at().map(str::to_string));
        }
        visited
    }

    proptest! {
        #[test]
        fn prop_same_choices_visit_same_wait_states(
            choices in proptest::collection::vec(any::<bool>(), 1..16)
        ) {
            let engine = test_engine();
            let strict = ProcessEngine::new(EngineConfig {
                strict_gateways: true,
                missing_variables: MissingVariablePolicy::Error,
            });
            strict.deploy_yaml(LARGER_PROCESS).unwrap();

            let first = drive(&engine, &choices);
            prop_assert_eq!(&first, &drive(&engine, &choices));
            prop_assert_eq!(&first, &drive(&strict, &choices));
        }
    }
}
