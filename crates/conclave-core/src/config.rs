//! Engine configuration
//!
//! One explicit configuration object, constructed once and passed by
//! reference into sessions, agents and the workflow engine. There is no
//! process-wide configuration state.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;

/// Model tier a persona can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Default tier, always configured
    Base,
    /// Higher-capability tier for review/planning personas
    Smart,
    /// Cheap tier for classification-style personas
    Fast,
}

impl ModelTier {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Smart => "smart",
            Self::Fast => "fast",
        }
    }
}

/// Concrete binding of a tier: model id, endpoint and credential
#[derive(Clone, Deserialize)]
pub struct ModelBinding {
    /// Model id sent to the backend
    pub model: String,
    /// Endpoint base URL
    pub endpoint: String,
    /// API credential
    #[serde(default)]
    pub api_key: String,
}

// Mask the credential in logs
impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = if self.api_key.len() <= 8 {
            "****".to_string()
        } else {
            format!("{}...", &self.api_key[..4])
        };
        f.debug_struct("ModelBinding")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &masked)
            .finish()
    }
}

/// Tier-to-binding table. Only `base` is mandatory.
#[derive(Debug, Clone, Deserialize)]
pub struct TierBindings {
    /// Base tier binding
    pub base: ModelBinding,
    /// Smart tier binding
    #[serde(default)]
    pub smart: Option<ModelBinding>,
    /// Fast tier binding
    #[serde(default)]
    pub fast: Option<ModelBinding>,
}

impl TierBindings {
    /// Resolve a tier to its binding.
    ///
    /// Returns the binding and whether the lookup fell back to `base`
    /// because the requested tier is unconfigured.
    #[must_use]
    pub fn resolve(&self, tier: ModelTier) -> (&ModelBinding, bool) {
        match tier {
            ModelTier::Base => (&self.base, false),
            ModelTier::Smart => match &self.smart {
                Some(b) => (b, false),
                None => (&self.base, true),
            },
            ModelTier::Fast => match &self.fast {
                Some(b) => (b, false),
                None => (&self.base, true),
            },
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Tier bindings
    pub tiers: TierBindings,
    /// Per-turn tool-call ceiling
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    /// Shared context size budget in characters
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    /// Sampling temperature forwarded to the backend
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tool_calls() -> usize {
    25
}

fn default_context_max_chars() -> usize {
    60_000
}

impl EngineConfig {
    /// Create a configuration with a single base binding and defaults
    #[must_use]
    pub fn with_base(binding: ModelBinding) -> Self {
        Self {
            tiers: TierBindings {
                base: binding,
                smart: None,
                fast: None,
            },
            max_tool_calls: default_max_tool_calls(),
            context_max_chars: default_context_max_chars(),
            temperature: None,
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.max_tool_calls == 0 {
            return Err(Error::Config("max_tool_calls must be positive".to_string()));
        }
        Ok(config)
    }
}
