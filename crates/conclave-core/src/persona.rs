//! Persona registry
//!
//! A persona is a named role configuration: system prompt, model tier, tool
//! exclusion patterns, an optional per-batch reminder, and optional
//! structured decision tool schemas. The registry is typed and validated at
//! registration time so unknown-role and bad-pattern failures happen at
//! startup instead of mid-conversation.

use crate::config::ModelTier;
use crate::error::{Error, Result};
use conclave_llm::ToolDefinition;
use regex::Regex;
use std::collections::HashMap;

/// A tool exclusion pattern: exact name, `*`-glob, or `/regex/`
#[derive(Debug, Clone)]
pub enum ToolPattern {
    /// Exact tool name
    Exact(String),
    /// Glob with `*` wildcards, compiled to an anchored regex
    Glob(Regex),
    /// Explicit `/…/` regex
    Regex(Regex),
}

impl ToolPattern {
    /// Parse a pattern string
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(inner) = pattern.strip_prefix('/').and_then(|p| p.strip_suffix('/')) {
            let re = Regex::new(inner)
                .map_err(|e| Error::Config(format!("bad tool pattern {pattern:?}: {e}")))?;
            return Ok(Self::Regex(re));
        }

        if pattern.contains('*') {
            let escaped: String = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let re = Regex::new(&format!("^{escaped}$"))
                .map_err(|e| Error::Config(format!("bad tool pattern {pattern:?}: {e}")))?;
            return Ok(Self::Glob(re));
        }

        Ok(Self::Exact(pattern.to_string()))
    }

    /// Whether a tool name matches this pattern
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(p) => p == name,
            Self::Glob(re) => re.is_match(name),
            Self::Regex(re) => re.is_match(name),
        }
    }
}

/// Resolved persona descriptor
#[derive(Debug, Clone)]
pub struct PersonaDescriptor {
    /// System message installed at index 0 of the conversation
    pub system_message: String,
    /// Model tier this persona runs on
    pub model_tier: ModelTier,
    /// Compiled tool exclusion patterns, first match wins
    pub excluded_tools: Vec<ToolPattern>,
    /// Reminder appended as a user message after each tool batch
    pub reminder: Option<String>,
    /// Structured decision tool schemas offered alongside regular tools
    pub decision_tools: Vec<ToolDefinition>,
}

impl PersonaDescriptor {
    /// Create a descriptor, compiling exclusion patterns
    pub fn new(
        system_message: impl Into<String>,
        model_tier: ModelTier,
        excluded_patterns: &[&str],
    ) -> Result<Self> {
        let excluded_tools = excluded_patterns
            .iter()
            .map(|p| ToolPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            system_message: system_message.into(),
            model_tier,
            excluded_tools,
            reminder: None,
            decision_tools: Vec::new(),
        })
    }

    /// Set the reminder text
    #[must_use]
    pub fn with_reminder(mut self, reminder: impl Into<String>) -> Self {
        self.reminder = Some(reminder.into());
        self
    }

    /// Add a decision tool schema
    #[must_use]
    pub fn with_decision_tool(mut self, tool: ToolDefinition) -> Self {
        self.decision_tools.push(tool);
        self
    }

    /// Whether a tool name is hidden from this persona
    #[must_use]
    pub fn excludes(&self, tool_name: &str) -> bool {
        self.excluded_tools.iter().any(|p| p.matches(tool_name))
    }
}

/// Registry of personas keyed by role name
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: HashMap<String, PersonaDescriptor>,
}

impl PersonaRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persona under a role name
    pub fn register(&mut self, role: impl Into<String>, descriptor: PersonaDescriptor) {
        self.personas.insert(role.into(), descriptor);
    }

    /// Resolve a role name, failing for unregistered names
    pub fn resolve(&self, role: &str) -> Result<&PersonaDescriptor> {
        self.personas
            .get(role)
            .ok_or_else(|| Error::UnknownPersona(role.to_string()))
    }

    /// All registered role names
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        self.personas.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let p = ToolPattern::parse("write_file").unwrap();
        assert!(p.matches("write_file"));
        assert!(!p.matches("write_files"));
    }

    #[test]
    fn test_glob_pattern() {
        let p = ToolPattern::parse("*_file").unwrap();
        assert!(p.matches("write_file"));
        assert!(p.matches("read_file"));
        assert!(!p.matches("execute_terminal"));
        assert!(!p.matches("file_list"));
    }

    #[test]
    fn test_regex_pattern() {
        let p = ToolPattern::parse("/^git_/").unwrap();
        assert!(p.matches("git_commit"));
        assert!(!p.matches("do_git_things"));
    }

    #[test]
    fn test_bad_regex_rejected_at_parse() {
        assert!(ToolPattern::parse("/(unclosed/").is_err());
    }

    #[test]
    fn test_registry_unknown_role() {
        let registry = PersonaRegistry::new();
        let err = registry.resolve("reviewer").unwrap_err();
        assert!(matches!(err, Error::UnknownPersona(_)));
    }

    #[test]
    fn test_descriptor_excludes_first_match_wins() {
        let descriptor = PersonaDescriptor::new(
            "You are a copywriter.",
            ModelTier::Base,
            &["*_file", "execute_terminal"],
        )
        .unwrap();

        assert!(descriptor.excludes("write_file"));
        assert!(descriptor.excludes("execute_terminal"));
        assert!(!descriptor.excludes("web_search"));
    }
}
