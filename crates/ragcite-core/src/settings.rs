use serde::{Deserialize, Serialize};

use crate::filters::Filters;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Baseline filters AND-ed into every `content` call.
    pub filters: Filters,
    pub limit: usize,
    pub offset: usize,
    pub include_graph: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            filters: Filters::new(),
            limit: 10,
            offset: 0,
            include_graph: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeParams {
    pub formats: Vec<String>,
    pub only_main_content: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for ScrapeParams {
    fn default() -> Self {
        Self {
            formats: vec!["markdown".to_string()],
            only_main_content: true,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Tool names to register; see [`crate::tools::ToolName`].
    pub tools: Vec<String>,
    /// Budget (in tokens) for one tool result in the model's input.
    pub max_tool_context_length: usize,
    pub max_context_window_tokens: usize,
    /// Whether the target model accepts nested object parameters. When false,
    /// object-typed parameters are declared as JSON-encoded strings.
    pub structured_parameters: bool,
    pub search_settings: SearchSettings,
    pub scrape: ScrapeParams,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            max_tool_context_length: 10_000,
            max_context_window_tokens: 512_000,
            structured_parameters: true,
            search_settings: SearchSettings::default(),
            scrape: ScrapeParams::default(),
        }
    }
}

impl AgentSettings {
    /// A single tool result can never be granted more than the whole window.
    pub fn tool_budget(&self) -> usize {
        self.max_tool_context_length
            .min(self.max_context_window_tokens)
    }
}
