//! Conversation session
//!
//! A session owns one persona's live dialogue with a model backend: message
//! history, visible tool set, tier binding and the bounded tool-calling
//! loop. History lives either in a private store or, after joining a shared
//! context, in that context's canonical array; appends then go through the
//! context's validation and eviction path.

use crate::config::{EngineConfig, ModelBinding, ModelTier};
use crate::context::{Perspective, SharedContext};
use crate::error::{Error, Result};
use crate::executor::ToolExecutor;
use crate::hooks::{NoopHooks, SessionHooks};
use crate::persona::{PersonaDescriptor, PersonaRegistry};
use conclave_llm::{
    max_output_tokens, CompletionRequest, LlmProvider, Message, MessageRole,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Where a session's history lives
enum MessageStore {
    /// Session-private history
    Private(Arc<Mutex<Vec<Message>>>),
    /// Canonical array owned by a shared context
    Shared(Arc<SharedContext>),
}

impl MessageStore {
    fn handle(&self) -> Arc<Mutex<Vec<Message>>> {
        match self {
            Self::Private(h) => Arc::clone(h),
            Self::Shared(ctx) => ctx.messages_handle(),
        }
    }

    fn append(&self, message: Message) -> Result<()> {
        match self {
            Self::Private(h) => {
                h.lock().unwrap_or_else(|e| e.into_inner()).push(message);
                Ok(())
            }
            Self::Shared(ctx) => ctx.add_message(message),
        }
    }

    fn snapshot(&self) -> Vec<Message> {
        self.handle()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear(&self) {
        self.handle()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Replace the system message: remove any existing one, insert at index 0
    fn set_system(&self, text: &str) {
        let handle = self.handle();
        let mut messages = handle.lock().unwrap_or_else(|e| e.into_inner());
        messages.retain(|m| m.role != MessageRole::System);
        messages.insert(0, Message::system(text));
    }
}

/// One persona's conversation with a model backend
pub struct ConversationSession {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    personas: Arc<PersonaRegistry>,
    config: Arc<EngineConfig>,
    hooks: Arc<dyn SessionHooks>,

    persona_role: Option<String>,
    persona: Option<PersonaDescriptor>,
    tier: ModelTier,
    binding: ModelBinding,

    store: MessageStore,
    perspective: Perspective,

    registry_tools: Vec<ToolDefinition>,
    visible_tools: Vec<ToolDefinition>,
    decision_tool_names: HashSet<String>,

    tool_calls_this_turn: usize,

    last_request: Option<ToolCompletionRequest>,
    last_response: Option<ToolCompletionResponse>,
}

impl ConversationSession {
    /// Create a session bound to the base tier with no persona
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        personas: Arc<PersonaRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let binding = config.tiers.base.clone();
        Self {
            provider,
            executor,
            personas,
            config,
            hooks: Arc::new(NoopHooks),
            persona_role: None,
            persona: None,
            tier: ModelTier::Base,
            binding,
            store: MessageStore::Private(Arc::new(Mutex::new(Vec::new()))),
            perspective: Perspective::Assistant,
            registry_tools: Vec::new(),
            visible_tools: Vec::new(),
            decision_tool_names: HashSet::new(),
            tool_calls_this_turn: 0,
            last_request: None,
            last_response: None,
        }
    }

    /// Install observer hooks
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Apply a persona: replace the system message, recompute visible tools
    /// and switch the active tier binding.
    ///
    /// An unknown role is a fatal configuration error. A persona declaring an
    /// unconfigured tier falls back to the base tier with a warning.
    pub fn set_persona(&mut self, role: &str) -> Result<()> {
        let descriptor = self.personas.resolve(role)?.clone();

        // In a shared context the persona prompt stays session-private and
        // is prepended at snapshot time; each participant keeps its own.
        if matches!(self.store, MessageStore::Private(_)) {
            self.store.set_system(&descriptor.system_message);
        }

        let (binding, fell_back) = self.config.tiers.resolve(descriptor.model_tier);
        if fell_back {
            warn!(
                role,
                tier = descriptor.model_tier.as_str(),
                "Persona tier unconfigured, falling back to base"
            );
        }
        self.binding = binding.clone();
        self.tier = descriptor.model_tier;

        self.decision_tool_names = descriptor
            .decision_tools
            .iter()
            .map(|t| t.name.clone())
            .collect();

        info!(role, model = %self.binding.model, "Persona applied");
        self.persona_role = Some(role.to_string());
        self.persona = Some(descriptor);
        self.recompute_visible_tools();
        Ok(())
    }

    /// Replace the full tool registry and recompute the visible list under
    /// the current persona
    pub fn set_tools(&mut self, tools: Vec<ToolDefinition>) {
        self.registry_tools = tools;
        self.recompute_visible_tools();
    }

    fn recompute_visible_tools(&mut self) {
        let mut visible: Vec<ToolDefinition> = match &self.persona {
            Some(p) => self
                .registry_tools
                .iter()
                .filter(|t| !p.excludes(&t.name))
                .cloned()
                .collect(),
            None => self.registry_tools.clone(),
        };
        if let Some(p) = &self.persona {
            visible.extend(p.decision_tools.iter().cloned());
        }
        self.visible_tools = visible;
    }

    /// Append a user message without triggering a model call
    pub fn add_user_message(&mut self, text: &str) -> Result<()> {
        self.append(Message::user(text))
    }

    /// Empty the history, then re-insert the persona system message if set
    pub fn clear_conversation(&mut self) {
        self.store.clear();
        if let (MessageStore::Private(_), Some(p)) = (&self.store, &self.persona) {
            self.store.set_system(&p.system_message);
        }
    }

    /// Point this session's history at a shared context's canonical array
    pub(crate) fn join_context(&mut self, context: Arc<SharedContext>, perspective: Perspective) {
        self.store = MessageStore::Shared(context);
        self.perspective = perspective;
    }

    fn append(&self, message: Message) -> Result<()> {
        self.hooks.on_content(message.role, &message.content);
        self.store.append(self.to_canonical(message))
    }

    /// Map a message from this session's perspective to canonical roles.
    ///
    /// A "user"-participation agent reads and writes through the same swap:
    /// its model's assistant output lands as a canonical user message, so the
    /// canonical array stays told from the assistant-participation side.
    fn to_canonical(&self, mut message: Message) -> Message {
        if matches!(self.store, MessageStore::Shared(_)) && self.perspective == Perspective::User {
            message.role = match message.role {
                MessageRole::User => MessageRole::Assistant,
                MessageRole::Assistant => MessageRole::User,
                other => other,
            };
        }
        message
    }

    /// History as the model sees it: perspective inversion is applied here,
    /// at read time, leaving the canonical array untouched
    fn snapshot_for_model(&self) -> Vec<Message> {
        let mut messages = self.store.snapshot();
        if let (MessageStore::Shared(_), Some(p)) = (&self.store, &self.persona) {
            messages.insert(0, Message::system(&p.system_message));
        }
        match self.perspective {
            Perspective::Assistant => messages,
            Perspective::User => messages
                .into_iter()
                .map(|mut m| {
                    m.role = match m.role {
                        MessageRole::User => MessageRole::Assistant,
                        MessageRole::Assistant => MessageRole::User,
                        other => other,
                    };
                    m
                })
                .collect(),
        }
    }

    /// Send a user message and run the bounded tool-calling loop, returning
    /// the turn's final assistant content.
    ///
    /// Every error is surfaced to the error hook before being returned, so
    /// fire-and-forget callers may drop the result while workflow callers
    /// re-raise it.
    pub async fn send_user_message(&mut self, text: &str) -> Result<String> {
        self.tool_calls_this_turn = 0;
        let result = self.run_turn(text).await;
        if let Err(e) = &result {
            self.hooks.on_error(e);
        }
        result
    }

    async fn run_turn(&mut self, text: &str) -> Result<String> {
        self.append(Message::user(text))?;

        loop {
            let mut completion = CompletionRequest::new(&self.binding.model)
                .with_messages(self.snapshot_for_model())
                .with_max_tokens(max_output_tokens(&self.binding.model));
            if let Some(t) = self.config.temperature {
                completion = completion.with_temperature(t);
            }
            let request = ToolCompletionRequest::new(completion, self.visible_tools.clone());
            self.last_request = Some(request.clone());

            let response = self.provider.complete_with_tools(request).await?;
            self.last_response = Some(response.clone());

            // Thinking content goes to the observer and never into history
            if let Some(thinking) = response.reasoning_content.as_deref() {
                if !thinking.is_empty() {
                    self.hooks.on_thinking(thinking);
                }
            }

            self.hooks.on_tool_calls(&response.tool_calls);

            if response.tool_calls.is_empty() {
                let content = response.content.unwrap_or_default();
                if !content.trim().is_empty() {
                    self.append(Message::assistant(&content))?;
                }
                self.hooks.on_response(&content);
                return Ok(content);
            }

            // Ceiling is evaluated once per batch, cumulative across the turn
            let batch = response.tool_calls.len();
            if self.tool_calls_this_turn + batch > self.config.max_tool_calls {
                return Err(Error::ToolCallLimit {
                    used: self.tool_calls_this_turn,
                    batch,
                    limit: self.config.max_tool_calls,
                });
            }
            self.tool_calls_this_turn += batch;

            self.append(Message::assistant_with_tool_calls(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ))?;

            // Calls execute in declared order; later calls may depend on
            // earlier side effects
            for call in &response.tool_calls {
                if self.decision_tool_names.contains(&call.name) {
                    debug!(tool = %call.name, "Decision tool call, skipping executor");
                    self.append(Message::tool_response_named(
                        &call.id,
                        &call.name,
                        "decision recorded",
                    ))?;
                    self.hooks.on_tool_result(&call.name, true);
                    continue;
                }

                match self.executor.execute(call).await {
                    Ok(result) => {
                        self.append(result)?;
                        self.hooks.on_tool_result(&call.name, true);
                    }
                    Err(e) => {
                        // Non-fatal: the error text goes back to the model so
                        // it can self-correct
                        warn!(tool = %call.name, error = %e, "Tool execution failed");
                        self.append(Message::tool_response_named(
                            &call.id,
                            &call.name,
                            format!("Error: {e}"),
                        ))?;
                        self.hooks.on_tool_result(&call.name, false);
                    }
                }
            }

            // Reminder is injected once per batch, not per call
            let reminder = self.persona.as_ref().and_then(|p| p.reminder.clone());
            if let Some(reminder) = reminder {
                let text = self.hooks.rewrite_reminder(&reminder);
                self.append(Message::user(text))?;
            }
        }
    }

    /// Defensive copy of the session's history
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    /// Currently visible tools (registry minus persona exclusions, plus
    /// decision tool schemas)
    #[must_use]
    pub fn visible_tools(&self) -> &[ToolDefinition] {
        &self.visible_tools
    }

    /// Active persona role, if set
    #[must_use]
    pub fn persona_role(&self) -> Option<&str> {
        self.persona_role.as_deref()
    }

    /// Active tier
    #[must_use]
    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    /// Active model id
    #[must_use]
    pub fn model(&self) -> &str {
        &self.binding.model
    }

    /// Tool calls consumed by the current/most recent turn
    #[must_use]
    pub fn tool_calls_this_turn(&self) -> usize {
        self.tool_calls_this_turn
    }

    /// Last request sent to the backend, for audit/logging
    #[must_use]
    pub fn last_request(&self) -> Option<&ToolCompletionRequest> {
        self.last_request.as_ref()
    }

    /// Last response received from the backend
    #[must_use]
    pub fn last_response(&self) -> Option<&ToolCompletionResponse> {
        self.last_response.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierBindings;
    use crate::executor::MockToolExecutor;
    use crate::persona::PersonaDescriptor;
    use conclave_llm::{MockProvider, ToolCall};

    fn binding(model: &str) -> ModelBinding {
        ModelBinding {
            model: model.to_string(),
            endpoint: "http://localhost/v1".to_string(),
            api_key: String::new(),
        }
    }

    fn config(max_tool_calls: usize) -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            tiers: TierBindings {
                base: binding("base-model"),
                smart: Some(binding("smart-model")),
                fast: None,
            },
            max_tool_calls,
            context_max_chars: 60_000,
            temperature: None,
        })
    }

    fn personas() -> Arc<PersonaRegistry> {
        let mut registry = PersonaRegistry::new();
        registry.register(
            "copywriter",
            PersonaDescriptor::new("You write copy.", ModelTier::Base, &["*_file"])
                .unwrap()
                .with_reminder("Stay in character."),
        );
        registry.register(
            "reviewer",
            PersonaDescriptor::new("You review copy.", ModelTier::Smart, &[]).unwrap(),
        );
        registry.register(
            "classifier",
            PersonaDescriptor::new("You classify.", ModelTier::Fast, &[]).unwrap(),
        );
        Arc::new(registry)
    }

    fn tools() -> Vec<ToolDefinition> {
        ["write_file", "read_file", "execute_terminal"]
            .iter()
            .map(|n| ToolDefinition::new(*n, "test tool", serde_json::json!({})))
            .collect()
    }

    fn tool_call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: "{}".to_string(),
        }
    }

    fn tool_call_response(calls: Vec<ToolCall>) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: None,
            reasoning_content: None,
            tool_calls: calls,
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
            model: "base-model".to_string(),
        }
    }

    fn session_with(
        provider: Arc<MockProvider>,
        executor: MockToolExecutor,
        max_tool_calls: usize,
    ) -> ConversationSession {
        ConversationSession::new(
            provider,
            Arc::new(executor),
            personas(),
            config(max_tool_calls),
        )
    }

    #[test]
    fn test_persona_switch_single_system_message() {
        let mut session = session_with(Arc::new(MockProvider::new()), MockToolExecutor::new(), 25);
        session.add_user_message("hello").unwrap();

        session.set_persona("copywriter").unwrap();
        session.set_persona("reviewer").unwrap();

        let messages = session.messages();
        let systems: Vec<_> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].content, "You review copy.");
    }

    #[test]
    fn test_unknown_persona_is_fatal() {
        let mut session = session_with(Arc::new(MockProvider::new()), MockToolExecutor::new(), 25);
        let err = session.set_persona("ghost").unwrap_err();
        assert!(matches!(err, Error::UnknownPersona(_)));
    }

    #[test]
    fn test_excluded_tools_hidden() {
        let mut session = session_with(Arc::new(MockProvider::new()), MockToolExecutor::new(), 25);
        session.set_tools(tools());
        session.set_persona("copywriter").unwrap();

        let visible: Vec<&str> = session
            .visible_tools()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert!(!visible.contains(&"write_file"));
        assert!(!visible.contains(&"read_file"));
        assert!(visible.contains(&"execute_terminal"));
    }

    #[test]
    fn test_tier_binding_and_fallback() {
        let mut session = session_with(Arc::new(MockProvider::new()), MockToolExecutor::new(), 25);

        session.set_persona("reviewer").unwrap();
        assert_eq!(session.model(), "smart-model");

        // fast tier is unconfigured: falls back to base
        session.set_persona("classifier").unwrap();
        assert_eq!(session.model(), "base-model");
        assert_eq!(session.tier(), ModelTier::Fast);
    }

    #[test]
    fn test_clear_conversation_reinserts_system() {
        let mut session = session_with(Arc::new(MockProvider::new()), MockToolExecutor::new(), 25);
        session.set_persona("copywriter").unwrap();
        session.add_user_message("draft something").unwrap();

        session.clear_conversation();

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::System);
    }

    #[tokio::test]
    async fn test_tool_loop_executes_and_finishes() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(tool_call_response(vec![tool_call("c1", "execute_terminal")]));
        provider.push_response(ToolCompletionResponse::text("all done", "base-model"));

        let mut executor = MockToolExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|call| Ok(Message::tool_response_named(&call.id, &call.name, "ok")));

        let mut session = session_with(provider, executor, 25);
        session.set_tools(tools());
        session.set_persona("reviewer").unwrap();

        let content = session.send_user_message("run the tests").await.unwrap();
        assert_eq!(content, "all done");

        let messages = session.messages();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant, // tool-call message
                MessageRole::Tool,
                MessageRole::Assistant, // final
            ]
        );
        assert_eq!(session.tool_calls_this_turn(), 1);
    }

    #[tokio::test]
    async fn test_tool_failure_is_recoverable() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(tool_call_response(vec![tool_call("c1", "execute_terminal")]));
        provider.push_response(ToolCompletionResponse::text("recovered", "base-model"));

        let mut executor = MockToolExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_| Err(Error::Tool("command not found".to_string())));

        let mut session = session_with(provider, executor, 25);
        session.set_tools(tools());

        let content = session.send_user_message("run it").await.unwrap();
        assert_eq!(content, "recovered");

        let messages = session.messages();
        let tool_msg = messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("command not found"));
    }

    #[tokio::test]
    async fn test_tool_call_ceiling() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(tool_call_response(vec![
            tool_call("c1", "execute_terminal"),
            tool_call("c2", "execute_terminal"),
        ]));
        provider.push_response(tool_call_response(vec![tool_call("c3", "execute_terminal")]));

        let mut executor = MockToolExecutor::new();
        executor
            .expect_execute()
            .times(2)
            .returning(|call| Ok(Message::tool_response_named(&call.id, &call.name, "ok")));

        // Ceiling of 2: first batch fits exactly, second batch would exceed
        let mut session = session_with(provider, executor, 2);
        session.set_tools(tools());

        let err = session.send_user_message("go").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ToolCallLimit {
                used: 2,
                batch: 1,
                limit: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_counter_resets_between_turns() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(tool_call_response(vec![
            tool_call("c1", "execute_terminal"),
            tool_call("c2", "execute_terminal"),
        ]));
        provider.push_response(ToolCompletionResponse::text("first turn", "base-model"));
        provider.push_response(tool_call_response(vec![
            tool_call("c3", "execute_terminal"),
            tool_call("c4", "execute_terminal"),
        ]));
        provider.push_response(ToolCompletionResponse::text("second turn", "base-model"));

        let mut executor = MockToolExecutor::new();
        executor
            .expect_execute()
            .times(4)
            .returning(|call| Ok(Message::tool_response_named(&call.id, &call.name, "ok")));

        // Each turn uses exactly the ceiling; the counter must reset between them
        let mut session = session_with(provider, executor, 2);
        session.set_tools(tools());

        assert_eq!(session.send_user_message("a").await.unwrap(), "first turn");
        assert_eq!(session.send_user_message("b").await.unwrap(), "second turn");
    }

    #[tokio::test]
    async fn test_reminder_injected_after_batch() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(tool_call_response(vec![tool_call("c1", "execute_terminal")]));
        provider.push_response(ToolCompletionResponse::text("done", "base-model"));

        let mut executor = MockToolExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|call| Ok(Message::tool_response_named(&call.id, &call.name, "ok")));

        let mut session = session_with(provider, executor, 25);
        session.set_tools(tools());
        session.set_persona("copywriter").unwrap();

        session.send_user_message("write").await.unwrap();

        let messages = session.messages();
        let reminder = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .find(|m| m.content == "Stay in character.");
        assert!(reminder.is_some());
    }

    #[tokio::test]
    async fn test_thinking_stripped_from_history() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(ToolCompletionResponse {
            content: Some("visible answer".to_string()),
            reasoning_content: Some("secret chain of thought".to_string()),
            tool_calls: vec![],
            usage: None,
            finish_reason: Some("stop".to_string()),
            model: "base-model".to_string(),
        });

        let mut session = session_with(provider, MockToolExecutor::new(), 25);
        session.send_user_message("question").await.unwrap();

        for m in session.messages() {
            assert!(!m.content.contains("secret chain of thought"));
        }
    }
}
