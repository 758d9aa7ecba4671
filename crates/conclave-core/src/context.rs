//! Shared conversation context
//!
//! A shared context is the single source of truth for a multi-party
//! transcript. The context exclusively owns the canonical message sequence;
//! participating sessions hold a read view plus an append capability that
//! always goes through `add_message`, so eviction and validation cannot be
//! bypassed. Perspective inversion is applied at read time by the session
//! and never mutates the canonical array.

use crate::error::{Error, Result};
use crate::session::ConversationSession;
use conclave_llm::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Minimum number of non-system messages eviction must leave behind
pub const MIN_RETAINED_MESSAGES: usize = 10;

/// An agent's perspective within a shared context
///
/// Independent of the agent's persona: a "user"-perspective agent sees a
/// role-swapped view of the transcript so its model always speaks as the
/// assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    /// Sees canonical roles unchanged
    #[default]
    Assistant,
    /// Sees user and assistant roles swapped
    User,
}

/// A named, size-bounded message log shared by one or more agents
pub struct SharedContext {
    name: String,
    max_chars: usize,
    messages: Arc<Mutex<Vec<Message>>>,
    participants: Mutex<HashMap<String, Perspective>>,
}

impl SharedContext {
    /// Create a context with the given character budget
    #[must_use]
    pub fn new(name: impl Into<String>, max_chars: usize) -> Self {
        Self {
            name: name.into(),
            max_chars,
            messages: Arc::new(Mutex::new(Vec::new())),
            participants: Mutex::new(HashMap::new()),
        }
    }

    /// Context name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an agent's session as a participant, pointing its message
    /// storage at this context's shared array
    pub fn add_agent(
        self: &Arc<Self>,
        agent_id: impl Into<String>,
        perspective: Perspective,
        session: &mut ConversationSession,
    ) {
        let agent_id = agent_id.into();
        debug!(context = %self.name, agent = %agent_id, ?perspective, "Agent joined context");
        self.participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent_id, perspective);
        session.join_context(Arc::clone(self), perspective);
    }

    /// Append a message, then evict if over budget.
    ///
    /// Rejects messages with empty content. Eviction drops non-system
    /// messages oldest-first until the context is under budget or only
    /// `MIN_RETAINED_MESSAGES` non-system messages remain; system messages
    /// are never evicted.
    pub fn add_message(&self, message: Message) -> Result<()> {
        if message.content.trim().is_empty() && message.tool_calls.is_empty() {
            return Err(Error::InvalidMessage(format!(
                "empty content for role {}",
                message.role.as_str()
            )));
        }

        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.push(message);
        self.evict(&mut messages);
        Ok(())
    }

    fn evict(&self, messages: &mut Vec<Message>) {
        let mut total: usize = messages.iter().map(Message::char_len).sum();
        if total <= self.max_chars {
            return;
        }

        let mut evicted = 0usize;
        while total > self.max_chars {
            let non_system = messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .count();
            if non_system <= MIN_RETAINED_MESSAGES {
                break;
            }
            let Some(oldest) = messages
                .iter()
                .position(|m| m.role != MessageRole::System)
            else {
                break;
            };
            let removed = messages.remove(oldest);
            total -= removed.char_len();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                context = %self.name,
                evicted,
                remaining = messages.len(),
                "Context over budget, evicted oldest messages"
            );
        }
    }

    /// Defensive copy of the transcript
    #[must_use]
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Registered participants and their perspectives
    #[must_use]
    pub fn participants(&self) -> Vec<(String, Perspective)> {
        self.participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, p)| (id.clone(), *p))
            .collect()
    }

    /// Shared handle used by participating sessions for read views and
    /// system-message maintenance. Appends must go through `add_message`.
    pub(crate) fn messages_handle(&self) -> Arc<Mutex<Vec<Message>>> {
        Arc::clone(&self.messages)
    }
}
