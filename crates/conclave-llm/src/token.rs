//! Per-model output token budgets
//!
//! The conversation engine picks a max-output-token budget per model id: a
//! small fixed table of overrides, the default otherwise. Matching is by
//! prefix so dated model revisions inherit their family budget.

/// Default max-output-token budget for models without an override
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Per-model-family overrides, matched by id prefix. Longest prefix wins.
const OVERRIDES: &[(&str, u32)] = &[
    ("claude-opus", 16384),
    ("claude-sonnet", 16384),
    ("claude-haiku", 8192),
    ("gpt-5", 16384),
    ("gpt-4o-mini", 4096),
    ("gpt-4o", 8192),
    ("deepseek-reasoner", 32768),
    ("deepseek", 8192),
    ("qwen", 8192),
];

/// Max output tokens for a model id
#[must_use]
pub fn max_output_tokens(model_id: &str) -> u32 {
    OVERRIDES
        .iter()
        .filter(|(prefix, _)| model_id.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, budget)| *budget)
        .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget() {
        assert_eq!(max_output_tokens("some-local-model"), DEFAULT_MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_override_by_prefix() {
        assert_eq!(max_output_tokens("claude-opus-4-20250514"), 16384);
        assert_eq!(max_output_tokens("deepseek-chat"), 8192);
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(max_output_tokens("deepseek-reasoner"), 32768);
        assert_eq!(max_output_tokens("gpt-4o-mini-2024"), 4096);
        assert_eq!(max_output_tokens("gpt-4o-2024"), 8192);
    }
}
