//! Session lifecycle hooks
//!
//! The core surfaces conversation events to the surrounding shell through
//! this trait: chain-of-thought content, final responses, tool execution,
//! errors and content-display events. All methods default to no-ops so
//! consumers implement only what they render.

use crate::error::Error;
use conclave_llm::{MessageRole, ToolCall};

/// Observer hooks for a conversation session
pub trait SessionHooks: Send + Sync {
    /// Chain-of-thought content, forwarded before it is stripped from history
    fn on_thinking(&self, _content: &str) {}

    /// Final assistant content for a turn
    fn on_response(&self, _content: &str) {}

    /// Tool-call batch carried by a model response, before execution.
    /// Decision parsing attaches here.
    fn on_tool_calls(&self, _calls: &[ToolCall]) {}

    /// A single tool finished (or failed)
    fn on_tool_result(&self, _name: &str, _success: bool) {}

    /// A message was appended to history, for content display
    fn on_content(&self, _role: MessageRole, _content: &str) {}

    /// A turn-level error occurred
    fn on_error(&self, _error: &Error) {}

    /// Rewrite persona reminder text before it is inserted as a user message
    fn rewrite_reminder(&self, reminder: &str) -> String {
        reminder.to_string()
    }
}

/// Hooks implementation that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        responses: AtomicUsize,
    }

    impl SessionHooks for Counting {
        fn on_response(&self, _content: &str) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }

        fn rewrite_reminder(&self, reminder: &str) -> String {
            format!("{reminder} (rewritten)")
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let hooks = NoopHooks;
        hooks.on_thinking("x");
        hooks.on_response("y");
        assert_eq!(hooks.rewrite_reminder("stay on task"), "stay on task");
    }

    #[test]
    fn test_override_subset() {
        let hooks = Counting {
            responses: AtomicUsize::new(0),
        };
        hooks.on_response("done");
        hooks.on_thinking("ignored");
        assert_eq!(hooks.responses.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.rewrite_reminder("r"), "r (rewritten)");
    }
}
