//! Error types for conclave-core
//!
//! Configuration errors are fatal at the call that triggered them. Turn-level
//! errors abort only the in-flight conversation turn or workflow execution.
//! Per-tool-call and condition-evaluation errors are recovered locally and
//! never surface here.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown persona role
    #[error("unknown persona role: {0}")]
    UnknownPersona(String),

    /// Unknown tool requested by the model
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Workflow name not registered
    #[error("workflow not found: {0}")]
    UnknownWorkflow(String),

    /// Duplicate workflow name at load time
    #[error("duplicate workflow name: {0}")]
    DuplicateWorkflow(String),

    /// Transition target or current state not defined
    #[error("unknown state: {0}")]
    UnknownState(String),

    /// State references an agent that was never declared
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Agent references a context that was never declared
    #[error("unknown context: {0}")]
    UnknownContext(String),

    /// Workflow definition failed load-time validation
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Message rejected by a shared context
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Tool-call ceiling exceeded within a single turn
    #[error("maximum tool calls exceeded: {used} used, batch of {batch} over limit {limit}")]
    ToolCallLimit {
        /// Calls already made this turn
        used: usize,
        /// Size of the batch that would exceed the limit
        batch: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Expression parse or evaluation failure
    #[error("expression error: {0}")]
    Expression(String),

    /// State handler failure (assignments, message templates)
    #[error("handler error: {0}")]
    Handler(String),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error while loading definitions
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error in a definition or config file
    #[error("definition parse error: {0}")]
    Definition(#[from] toml::de::Error),

    /// Model backend error
    #[error("llm error: {0}")]
    Llm(#[from] conclave_llm::Error),

    /// Tool execution error
    #[error("tool error: {0}")]
    Tool(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
