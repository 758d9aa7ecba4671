//! Workflow agents
//!
//! A workflow agent wraps one conversation session for the duration of a
//! single workflow execution: persona applied, shared context joined, and a
//! hooks wrapper that parses the persona's decision tool calls into the
//! last recorded [`Decision`].

use crate::config::EngineConfig;
use crate::context::{Perspective, SharedContext};
use crate::error::Result;
use crate::executor::ToolExecutor;
use crate::hooks::SessionHooks;
use crate::persona::PersonaRegistry;
use crate::session::ConversationSession;
use conclave_llm::{LlmProvider, ToolCall, ToolDefinition};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// A structured decision extracted from a decision tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Name of the decision tool the model called
    pub tool_name: String,
    /// Parsed call arguments
    pub arguments: serde_json::Value,
}

/// Hooks wrapper that records decisions from tool-call batches.
///
/// A batch updates the decision only when exactly one call in it matches a
/// declared decision tool; zero or multiple matches leave the prior decision
/// in place and never fail the turn.
struct DecisionRecorder {
    inner: Arc<dyn SessionHooks>,
    decision_tools: HashSet<String>,
    last_decision: Arc<Mutex<Option<Decision>>>,
}

impl SessionHooks for DecisionRecorder {
    fn on_thinking(&self, content: &str) {
        self.inner.on_thinking(content);
    }

    fn on_response(&self, content: &str) {
        self.inner.on_response(content);
    }

    fn on_tool_calls(&self, calls: &[ToolCall]) {
        self.inner.on_tool_calls(calls);

        let mut matches = calls
            .iter()
            .filter(|c| self.decision_tools.contains(&c.name));
        let first = matches.next();
        if matches.next().is_some() {
            warn!("multiple decision tool calls in one batch, keeping prior decision");
            return;
        }
        let Some(call) = first else {
            return;
        };

        let arguments: serde_json::Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::json!({}));
        debug!(tool = %call.name, "recorded decision");
        *self.last_decision.lock().unwrap_or_else(|e| e.into_inner()) = Some(Decision {
            tool_name: call.name.clone(),
            arguments,
        });
    }

    fn on_tool_result(&self, name: &str, success: bool) {
        self.inner.on_tool_result(name, success);
    }

    fn on_content(&self, role: conclave_llm::MessageRole, content: &str) {
        self.inner.on_content(role, content);
    }

    fn on_error(&self, error: &crate::error::Error) {
        self.inner.on_error(error);
    }

    fn rewrite_reminder(&self, reminder: &str) -> String {
        self.inner.rewrite_reminder(reminder)
    }
}

/// One persona's seat in a workflow execution
pub struct WorkflowAgent {
    role: String,
    id: String,
    perspective: Perspective,
    context: Arc<SharedContext>,
    session: ConversationSession,
    last_decision: Arc<Mutex<Option<Decision>>>,
}

impl WorkflowAgent {
    /// Create an agent: load the persona, join the context, and install the
    /// decision recorder when the persona declares decision tools
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: &str,
        perspective: Perspective,
        context: Arc<SharedContext>,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        personas: Arc<PersonaRegistry>,
        config: Arc<EngineConfig>,
        tools: Vec<ToolDefinition>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Result<Self> {
        let id = format!("{role}-{}", Uuid::new_v4());
        let last_decision = Arc::new(Mutex::new(None));

        let persona = personas.resolve(role)?;
        let decision_tools: HashSet<String> = persona
            .decision_tools
            .iter()
            .map(|t| t.name.clone())
            .collect();

        let session_hooks: Arc<dyn SessionHooks> = if decision_tools.is_empty() {
            hooks
        } else {
            Arc::new(DecisionRecorder {
                inner: hooks,
                decision_tools,
                last_decision: Arc::clone(&last_decision),
            })
        };

        let mut session = ConversationSession::new(provider, executor, personas, config)
            .with_hooks(session_hooks);
        session.set_tools(tools);
        session.set_persona(role)?;
        context.add_agent(id.clone(), perspective, &mut session);

        debug!(agent = %id, context = %context.name(), "workflow agent created");

        Ok(Self {
            role: role.to_string(),
            id,
            perspective,
            context,
            session,
            last_decision,
        })
    }

    /// Send a message to this agent and run its turn to completion
    pub async fn send_message(&mut self, text: &str) -> Result<String> {
        self.session.send_user_message(text).await
    }

    /// Persona role
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Unique agent id (`role-uuid`)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Which side of the conversation this agent occupies
    #[must_use]
    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    /// The shared context this agent participates in
    #[must_use]
    pub fn context(&self) -> &Arc<SharedContext> {
        &self.context
    }

    /// Most recent decision, if any
    #[must_use]
    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tool calls consumed by the agent's most recent turn
    #[must_use]
    pub fn tool_calls_last_turn(&self) -> usize {
        self.session.tool_calls_this_turn()
    }

    /// Read access to the underlying session
    #[must_use]
    pub fn session(&self) -> &ConversationSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;

    fn recorder(tools: &[&str]) -> (DecisionRecorder, Arc<Mutex<Option<Decision>>>) {
        let last_decision = Arc::new(Mutex::new(None));
        let recorder = DecisionRecorder {
            inner: Arc::new(NoopHooks),
            decision_tools: tools.iter().map(|s| s.to_string()).collect(),
            last_decision: Arc::clone(&last_decision),
        };
        (recorder, last_decision)
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: format!("call-{name}"),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn test_single_match_records_decision() {
        let (recorder, slot) = recorder(&["copywriter_decision"]);
        recorder.on_tool_calls(&[
            call("read_file", "{}"),
            call("copywriter_decision", r#"{"approved": true}"#),
        ]);
        let decision = slot.lock().unwrap().clone().unwrap();
        assert_eq!(decision.tool_name, "copywriter_decision");
        assert_eq!(decision.arguments["approved"], serde_json::json!(true));
    }

    #[test]
    fn test_zero_matches_keeps_prior_decision() {
        let (recorder, slot) = recorder(&["copywriter_decision"]);
        recorder.on_tool_calls(&[call("copywriter_decision", r#"{"approved": false}"#)]);
        recorder.on_tool_calls(&[call("read_file", "{}")]);
        let decision = slot.lock().unwrap().clone().unwrap();
        assert_eq!(decision.arguments["approved"], serde_json::json!(false));
    }

    #[test]
    fn test_multiple_matches_keep_prior_decision() {
        let (recorder, slot) = recorder(&["copywriter_decision"]);
        recorder.on_tool_calls(&[call("copywriter_decision", r#"{"approved": true}"#)]);
        recorder.on_tool_calls(&[
            call("copywriter_decision", r#"{"approved": false}"#),
            call("copywriter_decision", r#"{"approved": false}"#),
        ]);
        let decision = slot.lock().unwrap().clone().unwrap();
        assert_eq!(decision.arguments["approved"], serde_json::json!(true));
    }

    #[test]
    fn test_malformed_arguments_fall_back_to_empty_object() {
        let (recorder, slot) = recorder(&["copywriter_decision"]);
        recorder.on_tool_calls(&[call("copywriter_decision", "not json")]);
        let decision = slot.lock().unwrap().clone().unwrap();
        assert_eq!(decision.arguments, serde_json::json!({}));
    }
}
