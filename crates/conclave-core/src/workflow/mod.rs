//! Multi-agent workflow support: definitions, the restricted expression
//! language, workflow agents, and the executing state machine.

pub mod agent;
pub mod definition;
pub mod expr;
pub mod machine;

pub use agent::{Decision, WorkflowAgent};
pub use definition::{
    AgentDef, Assignment, ContextDef, Handler, IoContract, StateDef, TransitionRule,
    WorkflowDefinition, STOP_STATE,
};
pub use expr::{EvalContext, Expr};
pub use machine::{WorkflowEngine, WorkflowResult};
