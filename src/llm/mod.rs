// file: src/llm/mod.rs
// description: chat model client and reply parsing helpers
// reference: internal module structure

pub mod client;

pub use client::{ChatCompletion, ChatMessage, ChatReply, ChatRequest, OpenAiCompatClient, ToolSpec};

use crate::error::{PipelineError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("valid fence regex")
});

/// Removes a surrounding markdown code fence, if present.
pub fn strip_code_fences(content: &str) -> &str {
    match CODE_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => content.trim(),
    }
}

pub fn parse_json_reply<T: DeserializeOwned>(stage: &str, content: &str) -> Result<T> {
    serde_json::from_str(strip_code_fences(content))
        .map_err(|e| PipelineError::parse(stage, format!("invalid JSON reply: {}", e)))
}
