// file: src/processors/refiner.rs
// description: text-model refinement and expansion of summarized scenes
// reference: https://help.aliyun.com/zh/model-studio/compatibility-of-openai-with-dashscope

use crate::error::{PipelineError, Result};
use crate::llm::{self, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::{ProductInput, RefinedScene, SceneSource, SceneSummary};
use crate::processors::prompts;
use crate::utils::Validator;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const STAGE: &str = "scene refiner";

pub struct SceneRefiner {
    client: Arc<dyn ChatCompletion>,
    model: String,
    timeout: Duration,
}

impl SceneRefiner {
    pub fn new(client: Arc<dyn ChatCompletion>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn process(
        &self,
        product: &ProductInput,
        summary: &SceneSummary,
    ) -> Result<RefinedScene> {
        info!("Refining scenes for product: {}", product.name);

        let summary_json = serde_json::to_string_pretty(summary)?;
        let example = match summary.scenes.first() {
            Some(scene) => {
                let mut value = serde_json::to_value(scene)?;
                value["source"] = json!(SceneSource::Optimized.as_str());
                value
            }
            None => json!({"id": 1, "scene_name": "example", "source": "optimized"}),
        };
        let example_json = serde_json::to_string_pretty(&example)?;

        let prompt = prompts::refiner_prompt(product, &summary_json, &example_json);
        debug!("Refiner prompt (length={})", prompt.chars().count());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(prompts::JSON_ONLY_SYSTEM),
                ChatMessage::user(prompt),
            ],
            tool: None,
            timeout: self.timeout,
        };

        let reply = self.client.complete(&request).await?;
        let content = reply
            .content
            .ok_or_else(|| PipelineError::parse(STAGE, "empty reply"))?;
        debug!("Raw refiner reply: {}", Validator::truncate_text(&content, 500));

        let mut refined: RefinedScene = llm::parse_json_reply(STAGE, &content)?;
        let original_ids: HashSet<u32> = summary.scenes.iter().map(|s| s.id).collect();
        refined.normalize(&original_ids);

        info!(
            "Refined {} scenes ({} optimized, {} new)",
            refined.scenes.len(),
            refined.count_by(SceneSource::Optimized),
            refined.count_by(SceneSource::New)
        );
        Ok(refined)
    }
}
