//! Context-pressure heuristics: estimated tokens each tool call adds to the
//! context window. The numbers are rough averages of typical tool output
//! sizes, not a billing model.

use crate::config::EstimationConfig;
use std::collections::HashMap;

/// Estimate for tools missing from the table.
pub const DEFAULT_TOOL_TOKENS: u64 = 500;

const BUILTIN_TOOL_TOKENS: &[(&str, u64)] = &[
    ("read", 2000),
    ("write", 300),
    ("edit", 600),
    ("exec", 1500),
    ("process", 800),
    ("web_search", 1500),
    ("web_fetch", 3000),
    ("browser", 4000),
    ("image", 1200),
    ("memory_search", 800),
    ("memory_get", 600),
    ("message", 200),
    ("sessions_spawn", 400),
    ("sessions_send", 300),
    ("sessions_list", 500),
    ("cron", 300),
    ("canvas", 1000),
    ("nodes", 600),
    ("tts", 200),
];

/// Tool name to estimated-token lookup.
#[derive(Debug, Clone)]
pub struct TokenTable {
    per_tool: HashMap<String, u64>,
    default_tokens: u64,
}

impl TokenTable {
    pub fn builtin() -> Self {
        Self {
            per_tool: BUILTIN_TOOL_TOKENS
                .iter()
                .map(|(name, tokens)| (name.to_string(), *tokens))
                .collect(),
            default_tokens: DEFAULT_TOOL_TOKENS,
        }
    }

    /// Built-in table with configured overrides applied.
    pub fn from_config(config: &EstimationConfig) -> Self {
        let mut table = Self::builtin();
        table.default_tokens = config.default_tokens;
        for (tool, tokens) in &config.tools {
            table.per_tool.insert(tool.clone(), *tokens);
        }
        table
    }

    pub fn estimate(&self, tool: &str) -> u64 {
        self.per_tool
            .get(tool)
            .copied()
            .unwrap_or(self.default_tokens)
    }

    /// Sum of estimates over a run's tool sequence.
    pub fn estimate_run(&self, tools: &[String]) -> u64 {
        tools
            .iter()
            .fold(0u64, |total, t| total.saturating_add(self.estimate(t)))
    }
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::builtin()
    }
}
