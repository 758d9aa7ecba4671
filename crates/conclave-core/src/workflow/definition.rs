//! Workflow definition files
//!
//! Workflows are declared in TOML, one workflow per file. A definition names
//! its input/output contract, shared contexts, agents, and states; states carry
//! declarative `set` handlers and ordered transition rules instead of inline
//! scripts.

use crate::context::Perspective;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Name of the implicit terminal state
pub const STOP_STATE: &str = "stop";

/// Declared input or output of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoContract {
    /// Key under common data
    pub name: String,
    /// Informal type label ("string", "object", ...)
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

/// A shared conversation context declared by a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDef {
    /// Context name, referenced by agents
    pub name: String,
    /// Character budget override for this context
    #[serde(default)]
    pub max_chars: Option<usize>,
}

/// An agent declared by a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    /// Persona role to load
    pub role: String,
    /// Context this agent participates in
    pub context: String,
    /// Which side of the conversation the agent occupies
    #[serde(default)]
    pub participation: Perspective,
}

/// One `key = expression` assignment into common data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Dotted key under common data, e.g. `review.approved`
    pub key: String,
    /// Expression source evaluated at run time
    pub value: String,
}

/// An ordered list of assignments applied to common data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Handler {
    /// Assignments applied in order
    #[serde(default)]
    pub set: Vec<Assignment>,
}

/// An ordered transition rule out of a state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Target state name
    pub to: String,
    /// Condition expression; the first rule evaluating true wins
    pub when: String,
    /// Handler run before the condition is evaluated
    #[serde(default)]
    pub before: Option<Handler>,
}

/// A workflow state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    /// Unique state name; every workflow declares exactly one `start`
    pub name: String,
    /// Agent role driving this state, if any
    #[serde(default)]
    pub agent: Option<String>,
    /// Message template sent to the agent, supports `${expr}` interpolation
    #[serde(default)]
    pub message: Option<String>,
    /// Handler run on state entry
    #[serde(default)]
    pub pre: Option<Handler>,
    /// Handler run after the agent turn
    #[serde(default)]
    pub post: Option<Handler>,
    /// Ordered transition rules; empty list means transition to `stop`
    #[serde(default)]
    pub transitions: Vec<TransitionRule>,
}

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow name
    pub workflow_name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Input contract seeded into common data at run start
    pub input: IoContract,
    /// Output contract read from common data at run end
    pub output: IoContract,
    /// Default common-data values, overlaid on the seeded input
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Shared contexts
    #[serde(default)]
    pub contexts: Vec<ContextDef>,
    /// Agents and their context membership
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    /// States; `stop` is implicit and must not be declared
    pub states: Vec<StateDef>,
}

impl WorkflowDefinition {
    /// Parse a definition from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let definition: Self = toml::from_str(text)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load a single definition file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Look up a state by name
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Look up an agent declaration by role
    pub fn agent(&self, role: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|a| a.role == role)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| {
            Error::InvalidDefinition(format!("workflow '{}': {msg}", self.workflow_name))
        };

        if self.workflow_name.is_empty() {
            return Err(Error::InvalidDefinition(
                "workflow_name must not be empty".to_string(),
            ));
        }

        let mut context_names = HashSet::new();
        for ctx in &self.contexts {
            if !context_names.insert(ctx.name.as_str()) {
                return Err(invalid(format!("duplicate context '{}'", ctx.name)));
            }
        }

        let mut agent_roles = HashSet::new();
        for agent in &self.agents {
            if !agent_roles.insert(agent.role.as_str()) {
                return Err(invalid(format!("duplicate agent role '{}'", agent.role)));
            }
            if !context_names.contains(agent.context.as_str()) {
                return Err(invalid(format!(
                    "agent '{}' references unknown context '{}'",
                    agent.role, agent.context
                )));
            }
        }

        let mut state_names = HashSet::new();
        for state in &self.states {
            if state.name == STOP_STATE {
                return Err(invalid("the 'stop' state is implicit".to_string()));
            }
            if !state_names.insert(state.name.as_str()) {
                return Err(invalid(format!("duplicate state '{}'", state.name)));
            }
            if let Some(role) = &state.agent {
                if !agent_roles.contains(role.as_str()) {
                    return Err(invalid(format!(
                        "state '{}' references unknown agent '{role}'",
                        state.name
                    )));
                }
            }
        }

        if !state_names.contains("start") {
            return Err(invalid("missing required 'start' state".to_string()));
        }

        for state in &self.states {
            for rule in &state.transitions {
                if rule.to != STOP_STATE && !state_names.contains(rule.to.as_str()) {
                    return Err(invalid(format!(
                        "state '{}' transitions to unknown state '{}'",
                        state.name, rule.to
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Load all `.toml` workflow definitions under a directory.
///
/// Duplicate workflow names across files are rejected.
pub fn load_dir(dir: &Path) -> Result<Vec<WorkflowDefinition>> {
    let mut definitions: Vec<WorkflowDefinition> = Vec::new();

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|ext| ext == "toml").unwrap_or(false))
        .collect();
    paths.sort();

    for path in paths {
        let definition = WorkflowDefinition::from_file(&path)?;
        if definitions
            .iter()
            .any(|d| d.workflow_name == definition.workflow_name)
        {
            return Err(Error::DuplicateWorkflow(definition.workflow_name));
        }
        tracing::debug!(
            workflow = %definition.workflow_name,
            path = %path.display(),
            "loaded workflow definition"
        );
        definitions.push(definition);
    }

    Ok(definitions)
}
