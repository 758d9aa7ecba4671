//! Conclave core - Agent conversation engine and workflow state machine
//!
//! The core drives one persona's conversation with a model backend and
//! coordinates multiple personas through declarative workflows:
//! - Conversation sessions with a bounded tool-calling loop
//! - Persona descriptors with tool-exclusion patterns and decision tools
//! - Shared, size-bounded conversation contexts with perspective inversion
//! - A workflow state machine over TOML definitions with a restricted,
//!   interpreted expression language

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod persona;
pub mod session;
pub mod workflow;

pub use config::{EngineConfig, ModelBinding, ModelTier, TierBindings};
pub use context::{Perspective, SharedContext, MIN_RETAINED_MESSAGES};
pub use error::{Error, Result};
pub use executor::{Tool, ToolExecutor, ToolRegistry};
pub use hooks::{NoopHooks, SessionHooks};
pub use persona::{PersonaDescriptor, PersonaRegistry, ToolPattern};
pub use session::ConversationSession;
pub use workflow::{
    Decision, WorkflowAgent, WorkflowDefinition, WorkflowEngine, WorkflowResult,
};
