//! Workflow state machine
//!
//! The engine holds registered workflow definitions and executes them one
//! run at a time: fresh contexts, agents and common data per run, a state
//! loop driven by ordered transition rules, and a result object that always
//! comes back whether the run succeeded or failed.

use crate::config::EngineConfig;
use crate::context::SharedContext;
use crate::error::{Error, Result};
use crate::executor::ToolExecutor;
use crate::hooks::{NoopHooks, SessionHooks};
use crate::persona::PersonaRegistry;
use crate::workflow::agent::{Decision, WorkflowAgent};
use crate::workflow::definition::{self, Handler, StateDef, WorkflowDefinition, STOP_STATE};
use crate::workflow::expr::{self, EvalContext};
use chrono::{DateTime, Utc};
use conclave_llm::{LlmProvider, ToolDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on state entries per run, guards against transition cycles
/// that never reach `stop`
const MAX_STATE_VISITS: usize = 128;

/// Outcome of one workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// Whether the run completed without error
    pub success: bool,
    /// Value read from common data under the output contract name
    pub output: Option<Value>,
    /// Failure description when `success` is false
    pub error: Option<String>,
    /// Name of the executed workflow
    pub workflow_name: String,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Elapsed run time in milliseconds
    pub execution_time_ms: u64,
    /// States entered, in order, excluding `stop`
    pub states_visited: Vec<String>,
    /// State the run ended in (`stop` on success)
    pub final_state: String,
}

/// Executes registered workflow definitions
pub struct WorkflowEngine {
    definitions: HashMap<String, WorkflowDefinition>,
    personas: Arc<PersonaRegistry>,
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    tools: Vec<ToolDefinition>,
    config: Arc<EngineConfig>,
    hooks: Arc<dyn SessionHooks>,
}

impl WorkflowEngine {
    /// Create an engine with no registered workflows
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        personas: Arc<PersonaRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            definitions: HashMap::new(),
            personas,
            provider,
            executor,
            tools: Vec::new(),
            config,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Set the tool schemas offered to workflow agents
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Install observer hooks shared by all agents
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register a definition, rejecting duplicate workflow names
    pub fn add_definition(&mut self, definition: WorkflowDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.workflow_name) {
            return Err(Error::DuplicateWorkflow(definition.workflow_name));
        }
        info!(workflow = %definition.workflow_name, "registered workflow");
        self.definitions
            .insert(definition.workflow_name.clone(), definition);
        Ok(())
    }

    /// Load and register every `.toml` definition under a directory
    pub fn load_workflows(&mut self, dir: &Path) -> Result<usize> {
        let definitions = definition::load_dir(dir)?;
        let count = definitions.len();
        for def in definitions {
            self.add_definition(def)?;
        }
        Ok(count)
    }

    /// Names of registered workflows, sorted
    #[must_use]
    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Access a registered definition
    #[must_use]
    pub fn get_definition(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(name)
    }

    /// Execute a workflow to completion.
    ///
    /// Always returns a result object; failures are reported through
    /// `success`/`error`, never as a panic or an `Err`.
    pub async fn execute_workflow(&self, name: &str, input: Value) -> WorkflowResult {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut states_visited = Vec::new();
        let mut final_state = String::new();

        let outcome = match self.definitions.get(name) {
            None => Err(Error::UnknownWorkflow(name.to_string())),
            Some(def) => {
                self.run(def, input, &mut states_visited, &mut final_state)
                    .await
            }
        };

        let execution_time_ms = timer.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                info!(workflow = %name, elapsed_ms = execution_time_ms, "workflow completed");
                WorkflowResult {
                    success: true,
                    output,
                    error: None,
                    workflow_name: name.to_string(),
                    started_at,
                    execution_time_ms,
                    states_visited,
                    final_state,
                }
            }
            Err(e) => {
                warn!(workflow = %name, error = %e, "workflow failed");
                WorkflowResult {
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    workflow_name: name.to_string(),
                    started_at,
                    execution_time_ms,
                    states_visited,
                    final_state,
                }
            }
        }
    }

    async fn run(
        &self,
        def: &WorkflowDefinition,
        input: Value,
        states_visited: &mut Vec<String>,
        final_state: &mut String,
    ) -> Result<Option<Value>> {
        // Fresh state per run: contexts, agents and common data never
        // survive from a previous execution
        let mut contexts: HashMap<String, Arc<SharedContext>> = HashMap::new();
        for ctx in &def.contexts {
            let max_chars = ctx.max_chars.unwrap_or(self.config.context_max_chars);
            contexts.insert(
                ctx.name.clone(),
                Arc::new(SharedContext::new(&ctx.name, max_chars)),
            );
        }

        let mut agents: HashMap<String, WorkflowAgent> = HashMap::new();
        for agent_def in &def.agents {
            let context = contexts
                .get(&agent_def.context)
                .ok_or_else(|| Error::UnknownContext(agent_def.context.clone()))?;
            let agent = WorkflowAgent::new(
                &agent_def.role,
                agent_def.participation,
                Arc::clone(context),
                Arc::clone(&self.provider),
                Arc::clone(&self.executor),
                Arc::clone(&self.personas),
                Arc::clone(&self.config),
                self.tools.clone(),
                Arc::clone(&self.hooks),
            )?;
            agents.insert(agent_def.role.clone(), agent);
        }

        let mut common_data = serde_json::Map::new();
        common_data.insert(def.input.name.clone(), input);
        for (key, value) in &def.variables {
            common_data.insert(key.clone(), value.clone());
        }

        let mut current = "start".to_string();
        while current != STOP_STATE {
            if states_visited.len() >= MAX_STATE_VISITS {
                return Err(Error::InvalidDefinition(format!(
                    "workflow '{}' exceeded {MAX_STATE_VISITS} state visits without stopping",
                    def.workflow_name
                )));
            }

            let state = def
                .state(&current)
                .ok_or_else(|| Error::UnknownState(current.clone()))?;
            states_visited.push(current.clone());
            final_state.clone_from(&current);
            debug!(workflow = %def.workflow_name, state = %current, "entering state");

            let mut response: Option<String> = None;
            let mut decision: Option<Decision> = None;

            if let Some(handler) = &state.pre {
                apply_handler(handler, &mut common_data, None, None)?;
            }

            if let Some(role) = &state.agent {
                let agent = agents
                    .get_mut(role)
                    .ok_or_else(|| Error::UnknownAgent(role.clone()))?;
                if let Some(template) = &state.message {
                    let prior_decision = agent.last_decision();
                    let ctx = EvalContext {
                        common_data: Some(&common_data),
                        decision: prior_decision.as_ref(),
                        agent_response: None,
                    };
                    let message = expr::render_template(template, &ctx)
                        .map_err(|e| Error::Handler(e.to_string()))?;
                    response = Some(agent.send_message(&message).await?);
                } else {
                    warn!(state = %current, "agent-bound state has no message, skipping turn");
                }
                decision = agent.last_decision();
            }

            if let Some(handler) = &state.post {
                apply_handler(
                    handler,
                    &mut common_data,
                    decision.as_ref(),
                    response.as_deref(),
                )?;
            }

            current = self.next_state(
                state,
                &mut common_data,
                decision.as_ref(),
                response.as_deref(),
            )?;
        }

        final_state.clone_from(&current);
        Ok(common_data.get(&def.output.name).cloned())
    }

    /// Evaluate a state's transition rules in order; the first condition
    /// evaluating true wins, and no rules or no match means `stop`
    fn next_state(
        &self,
        state: &StateDef,
        common_data: &mut serde_json::Map<String, Value>,
        decision: Option<&Decision>,
        response: Option<&str>,
    ) -> Result<String> {
        for rule in &state.transitions {
            if let Some(handler) = &rule.before {
                apply_handler(handler, common_data, decision, response)?;
            }
            let ctx = EvalContext {
                common_data: Some(&*common_data),
                decision,
                agent_response: response,
            };
            match expr::eval_condition(&rule.when, &ctx) {
                Ok(true) => {
                    debug!(from = %state.name, to = %rule.to, "transition matched");
                    return Ok(rule.to.clone());
                }
                Ok(false) => {}
                // Broken conditions never abort a run
                Err(e) => {
                    warn!(
                        state = %state.name,
                        condition = %rule.when,
                        error = %e,
                        "condition evaluation failed, treating as false"
                    );
                }
            }
        }
        Ok(STOP_STATE.to_string())
    }
}

/// Apply a handler's assignments to common data, in order.
///
/// Assignment failures propagate and fail the run.
fn apply_handler(
    handler: &Handler,
    common_data: &mut serde_json::Map<String, Value>,
    decision: Option<&Decision>,
    response: Option<&str>,
) -> Result<()> {
    for assignment in &handler.set {
        let ctx = EvalContext {
            common_data: Some(&*common_data),
            decision,
            agent_response: response,
        };
        let value = expr::Expr::parse(&assignment.value)
            .and_then(|e| e.eval(&ctx))
            .map_err(|e| {
                Error::Handler(format!("assignment to '{}': {e}", assignment.key))
            })?;
        set_path(common_data, &assignment.key, value);
    }
    Ok(())
}

/// Write a value at a dotted key, creating intermediate objects
fn set_path(map: &mut serde_json::Map<String, Value>, key: &str, value: Value) {
    let mut segments = key.split('.').peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        match entry.as_object_mut() {
            Some(obj) => current = obj,
            // Unreachable after the object coercion above
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ModelBinding, ModelTier};
    use crate::executor::ToolRegistry;
    use crate::persona::PersonaDescriptor;
    use crate::workflow::definition::WorkflowDefinition;
    use conclave_llm::{MockProvider, ToolCall, ToolCompletionResponse};
    use serde_json::json;

    fn engine_with(provider: Arc<MockProvider>, def_toml: &str) -> WorkflowEngine {
        let mut personas = PersonaRegistry::new();
        personas.register(
            "writer",
            PersonaDescriptor::new("You write copy.", ModelTier::Base, &[]).unwrap(),
        );
        personas.register(
            "reviewer",
            PersonaDescriptor::new("You review copy.", ModelTier::Base, &[])
                .unwrap()
                .with_decision_tool(conclave_llm::ToolDefinition {
                    name: "reviewer_decision".to_string(),
                    description: "Record the review verdict".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {"approved": {"type": "boolean"}},
                        "required": ["approved"]
                    }),
                }),
        );

        let config = EngineConfig::with_base(ModelBinding {
            model: "mock-model".to_string(),
            endpoint: "http://localhost".to_string(),
            api_key: String::new(),
        });

        let mut engine = WorkflowEngine::new(
            provider,
            Arc::new(ToolRegistry::new()),
            Arc::new(personas),
            Arc::new(config),
        );
        engine
            .add_definition(WorkflowDefinition::from_toml_str(def_toml).unwrap())
            .unwrap();
        engine
    }

    const LINEAR: &str = r#"
        workflow_name = "linear"

        [input]
        name = "brief"

        [output]
        name = "result"

        [[contexts]]
        name = "room"

        [[agents]]
        role = "writer"
        context = "room"

        [[states]]
        name = "start"
        agent = "writer"
        message = "Write copy for: ${common_data.brief}"

        [[states.transitions]]
        to = "finish"
        when = "true"

        [[states]]
        name = "finish"

        [states.pre]
        set = [{ key = "result", value = "common_data.brief" }]
    "#;

    #[tokio::test]
    async fn test_linear_run_visits_states_and_stops() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(ToolCompletionResponse::text("a draft", "mock-model"));
        let engine = engine_with(Arc::clone(&provider), LINEAR);

        let result = engine.execute_workflow("linear", json!("sell socks")).await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.states_visited, vec!["start", "finish"]);
        assert_eq!(result.final_state, "stop");
        assert_eq!(result.output, Some(json!("sell socks")));
        assert_eq!(result.workflow_name, "linear");
    }

    #[tokio::test]
    async fn test_unknown_workflow_reports_failure() {
        let engine = engine_with(Arc::new(MockProvider::new()), LINEAR);
        let result = engine.execute_workflow("missing", json!(null)).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("missing"));
        assert!(result.states_visited.is_empty());
    }

    #[tokio::test]
    async fn test_common_data_reset_between_runs() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(ToolCompletionResponse::text("one", "mock-model"));
        let engine = engine_with(Arc::clone(&provider), LINEAR);

        let first = engine.execute_workflow("linear", json!("first brief")).await;
        assert_eq!(first.output, Some(json!("first brief")));

        provider.push_response(ToolCompletionResponse::text("two", "mock-model"));
        let second = engine.execute_workflow("linear", json!("second brief")).await;
        assert_eq!(second.output, Some(json!("second brief")));
    }

    const DECISION: &str = r#"
        workflow_name = "decision"

        [input]
        name = "draft"

        [output]
        name = "verdict"

        [[contexts]]
        name = "room"

        [[agents]]
        role = "reviewer"
        context = "room"

        [[states]]
        name = "start"
        agent = "reviewer"
        message = "Review: ${common_data.draft}"

        [states.post]
        set = [{ key = "verdict", value = "function.reviewer_decision.arguments.approved" }]

        [[states.transitions]]
        to = "stop"
        when = "function.reviewer_decision.arguments.approved === true"

        [[states.transitions]]
        to = "start"
        when = "true"
    "#;

    #[tokio::test]
    async fn test_decision_tool_drives_transition() {
        let provider = Arc::new(MockProvider::new());
        // First turn: the reviewer records an approval decision, then closes
        // the turn with plain text
        provider.push_response(ToolCompletionResponse {
            content: None,
            reasoning_content: None,
            tool_calls: vec![ToolCall {
                id: "call-1".to_string(),
                name: "reviewer_decision".to_string(),
                arguments: r#"{"approved": true}"#.to_string(),
            }],
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
            model: "mock-model".to_string(),
        });
        provider.push_response(ToolCompletionResponse::text("approved", "mock-model"));

        let engine = engine_with(Arc::clone(&provider), DECISION);
        let result = engine.execute_workflow("decision", json!("the draft")).await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.states_visited, vec!["start"]);
        assert_eq!(result.output, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_duplicate_definition_rejected() {
        let mut engine = engine_with(Arc::new(MockProvider::new()), LINEAR);
        let err = engine
            .add_definition(WorkflowDefinition::from_toml_str(LINEAR).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateWorkflow(_)));
    }

    #[test]
    fn test_set_path_creates_nested_objects() {
        let mut map = serde_json::Map::new();
        set_path(&mut map, "review.approved", json!(true));
        set_path(&mut map, "review.score", json!(8));
        set_path(&mut map, "plain", json!("x"));
        assert_eq!(
            Value::Object(map),
            json!({"review": {"approved": true, "score": 8}, "plain": "x"})
        );
    }

    #[tokio::test]
    async fn test_broken_condition_is_treated_as_false() {
        let broken = LINEAR.replace(
            "when = \"true\"",
            "when = \"not_a_root.path\"",
        );
        let provider = Arc::new(MockProvider::new());
        provider.push_response(ToolCompletionResponse::text("a draft", "mock-model"));
        let engine = engine_with(Arc::clone(&provider), &broken);

        // Only transition is broken, so start falls through to stop
        let result = engine.execute_workflow("linear", json!("brief")).await;
        assert!(result.success);
        assert_eq!(result.states_visited, vec!["start"]);
        assert_eq!(result.final_state, "stop");
    }
}
