// file: src/utils/template.rs
// description: prompt templates with a single substitution slot and named fields
// reference: Internal prompt standards

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SLOT: &str = "{{}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        let slots = template.matches(SLOT).count();
        if slots != 1 {
            return Err(PipelineError::Config(format!(
                "prompt template must contain exactly one {} slot, found {}",
                SLOT, slots
            )));
        }
        Ok(Self { template })
    }

    /// Template that forwards its argument unchanged.
    pub fn passthrough() -> Self {
        Self {
            template: SLOT.to_string(),
        }
    }

    pub fn fill(&self, phrase: &str) -> String {
        self.template.replacen(SLOT, phrase, 1)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PromptTemplate> for String {
    fn from(value: PromptTemplate) -> Self {
        value.template
    }
}

/// Replaces every `{{key}}` placeholder with its value.
pub fn fill_fields(template: &str, values: &HashMap<&str, &str>) -> String {
    let mut result = template.to_string();

    for (key, value) in values {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
