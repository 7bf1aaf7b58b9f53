// file: src/models/phrase.rs
// description: scene phrases and generated image results
// reference: internal data structures

use crate::utils::template::PromptTemplate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePhrase {
    pub scene_no: u32,
    #[serde(rename = "scene_description")]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseResult {
    pub phrases: Vec<ScenePhrase>,
    #[serde(rename = "positive_prompt_template")]
    pub prompt_template: PromptTemplate,
}

impl PhraseResult {
    pub fn texts(&self) -> Vec<String> {
        self.phrases.iter().map(|p| p.text.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub scene_no: u32,
    #[serde(rename = "image_path")]
    pub path: PathBuf,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    pub images: Vec<GeneratedImage>,
}
