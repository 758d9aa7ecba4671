//! Conclave LLM - Model backend contract
//!
//! This crate defines the narrow interface the Conclave core consumes from
//! model backends:
//! - Message and completion types shared across the workspace
//! - Tool/function-calling types
//! - The `LlmProvider` trait
//! - An OpenAI-compatible HTTP provider
//! - A queue-backed mock provider for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod error;
pub mod message;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod token;
pub mod tools;

pub use completion::{
    CompletionRequest, CompletionResponse, TokenUsage, ToolCompletionRequest,
    ToolCompletionResponse,
};
pub use error::{Error, Result};
pub use message::{Message, MessageRole};
pub use mock::MockProvider;
pub use openai::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use provider::LlmProvider;
pub use token::{max_output_tokens, DEFAULT_MAX_OUTPUT_TOKENS};
pub use tools::{ToolCall, ToolChoice, ToolDefinition};
