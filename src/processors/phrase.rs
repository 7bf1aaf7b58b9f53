// file: src/processors/phrase.rs
// description: scene selection by source quota and phrase generation via forced tool calls
// reference: https://platform.openai.com/docs/guides/function-calling

use crate::config::PromptStyle;
use crate::error::{PipelineError, Result};
use crate::llm::{self, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::{PhraseResult, ProductInput, RefinedScene, SceneItem, ScenePhrase, SceneSource};
use crate::processors::prompts;
use crate::utils::PromptTemplate;
use crate::utils::template::fill_fields;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STAGE: &str = "phrase generator";
const FALLBACK_SCENE_COUNT: usize = 5;

/// Ordered per-source scene counts, e.g. `optimized:3,new:2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuota(Vec<(SceneSource, usize)>);

impl Default for SourceQuota {
    fn default() -> Self {
        Self(vec![(SceneSource::Optimized, 3), (SceneSource::New, 2)])
    }
}

impl SourceQuota {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for item in spec.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (source, count) = item.split_once(':').ok_or_else(|| {
                PipelineError::Config(format!("Invalid scene source entry: {}", item))
            })?;

            let source = match source.trim() {
                "optimized" => SceneSource::Optimized,
                "new" => SceneSource::New,
                other => {
                    return Err(PipelineError::Config(format!(
                        "Unknown scene source: {}",
                        other
                    )));
                }
            };
            let count = count.trim().parse::<usize>().map_err(|e| {
                PipelineError::Config(format!("Invalid scene count in '{}': {}", item, e))
            })?;

            entries.push((source, count));
        }

        Ok(Self(entries))
    }

    /// Parses a configured quota, falling back to the default with a warning.
    pub fn from_config(spec: &str) -> Self {
        Self::parse(spec).unwrap_or_else(|e| {
            warn!("{}. Using default scene sources", e);
            Self::default()
        })
    }

    pub fn entries(&self) -> &[(SceneSource, usize)] {
        &self.0
    }
}

impl fmt::Display for SourceQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(source, count)| format!("{}:{}", source.as_str(), count))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Takes up to `count` scenes per source, in quota order, without
/// back-filling a short source from another. When nothing matches, the
/// first five scenes are used.
pub fn select_scenes<'a>(refined: &'a RefinedScene, quota: &SourceQuota) -> Vec<&'a SceneItem> {
    let mut selected = Vec::new();

    for (source, count) in quota.entries() {
        let matching: Vec<&SceneItem> = refined
            .scenes
            .iter()
            .filter(|s| s.source == Some(*source))
            .collect();
        let take = matching.len().min(*count);
        debug!(
            "Source '{}': selected {}/{} scenes",
            source.as_str(),
            take,
            matching.len()
        );
        selected.extend(matching.into_iter().take(take));
    }

    if selected.is_empty() {
        warn!("No scenes matched the source quota, using the first {}", FALLBACK_SCENE_COUNT);
        return refined.scenes.iter().take(FALLBACK_SCENE_COUNT).collect();
    }
    selected
}

#[derive(Debug, Deserialize)]
struct PhraseArguments {
    #[serde(default)]
    scenes: Vec<PhraseCall>,
}

#[derive(Debug, Deserialize)]
struct PhraseCall {
    #[serde(default)]
    scene_no: u32,
    #[serde(default)]
    scene_description: String,
    #[serde(default)]
    scene_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    surrounding_objects: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    selling_point: String,
}

impl PhraseCall {
    fn structured_prompt(&self) -> String {
        let values: HashMap<&str, &str> = HashMap::from([
            ("scene_name", self.scene_name.as_str()),
            ("description", self.description.as_str()),
            ("surrounding_objects", self.surrounding_objects.as_str()),
            ("details", self.details.as_str()),
            ("selling_point", self.selling_point.as_str()),
        ]);
        fill_fields(prompts::STRUCTURED_POSITIVE_TEMPLATE, &values)
    }
}

pub struct PhraseGenerator {
    client: Arc<dyn ChatCompletion>,
    model: String,
    timeout: Duration,
    style: PromptStyle,
    quota: SourceQuota,
}

impl PhraseGenerator {
    pub fn new(
        client: Arc<dyn ChatCompletion>,
        model: impl Into<String>,
        timeout: Duration,
        style: PromptStyle,
        quota: SourceQuota,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
            style,
            quota,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    pub async fn process(
        &self,
        product: &ProductInput,
        refined: &RefinedScene,
    ) -> Result<PhraseResult> {
        info!(
            "Generating scene phrases ({}) for product: {}",
            self.style, product.name
        );

        let selected = select_scenes(refined, &self.quota);
        let image_num = selected.len();
        info!("Selected {} scenes for phrase generation", image_num);

        let candidates = prompts::scene_candidates_text(&selected);
        let prompt = prompts::phrase_prompt(self.style, image_num, product, &candidates);
        debug!("Phrase prompt (length={})", prompt.chars().count());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(prompts::PHRASE_SYSTEM),
                ChatMessage::user(prompt),
            ],
            tool: Some(prompts::phrase_tool(self.style, image_num)),
            timeout: self.timeout,
        };

        let reply = self.client.complete(&request).await?;
        let raw = reply
            .tool_arguments
            .or(reply.content)
            .ok_or_else(|| PipelineError::parse(STAGE, "reply carried no tool call"))?;

        let arguments: PhraseArguments = llm::parse_json_reply(STAGE, &raw)?;
        if arguments.scenes.is_empty() {
            return Err(PipelineError::parse(STAGE, "tool call returned no scenes"));
        }

        self.build_result(arguments)
    }

    fn build_result(&self, arguments: PhraseArguments) -> Result<PhraseResult> {
        let mut used = HashSet::new();
        let phrases = arguments
            .scenes
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let mut scene_no = if call.scene_no == 0 {
                    i as u32 + 1
                } else {
                    call.scene_no
                };
                // repeated numbers would share an output file name
                while !used.insert(scene_no) {
                    scene_no = scene_no.checked_add(1).unwrap_or(1);
                }
                ScenePhrase {
                    scene_no,
                    text: match self.style {
                        PromptStyle::Text => call.scene_description.clone(),
                        PromptStyle::Structured => call.structured_prompt(),
                    },
                }
            })
            .collect();

        // structured phrases are complete prompts already
        let prompt_template = match self.style {
            PromptStyle::Text => PromptTemplate::new(prompts::TEXT_POSITIVE_TEMPLATE)?,
            PromptStyle::Structured => PromptTemplate::passthrough(),
        };

        Ok(PhraseResult {
            phrases,
            prompt_template,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatReply;
    use crate::processors::testing::ScriptedChat;
    use pretty_assertions::assert_eq;

    fn scene(id: u32, source: SceneSource) -> SceneItem {
        SceneItem {
            id,
            name: format!("scene {}", id),
            description: format!("description {}", id),
            surrounding_objects: "plants".to_string(),
            details: "grain".to_string(),
            selling_point: "durable".to_string(),
            source: Some(source),
        }
    }

    fn refined() -> RefinedScene {
        // interleaved on purpose: selection must not depend on order
        let mut scenes = Vec::new();
        for id in 1..=9 {
            let source = if id % 2 == 0 && id <= 8 {
                SceneSource::Optimized
            } else {
                SceneSource::New
            };
            scenes.push(scene(id, source));
        }
        RefinedScene { scenes }
    }

    #[test]
    fn test_quota_parse() {
        let quota = SourceQuota::parse("optimized:2, new:1").unwrap();
        assert_eq!(
            quota.entries(),
            &[(SceneSource::Optimized, 2), (SceneSource::New, 1)]
        );
        assert_eq!(quota.to_string(), "optimized:2,new:1");
        assert!(SourceQuota::parse("optimized").is_err());
        assert!(SourceQuota::parse("legacy:1").is_err());
        assert!(SourceQuota::parse("new:x").is_err());
    }

    #[test]
    fn test_quota_fallback_to_default() {
        assert_eq!(SourceQuota::from_config("broken"), SourceQuota::default());
        assert_eq!(SourceQuota::default().to_string(), "optimized:3,new:2");
    }

    #[test]
    fn test_select_two_plus_one() {
        let refined = refined();
        assert_eq!(refined.count_by(SceneSource::Optimized), 4);
        assert_eq!(refined.count_by(SceneSource::New), 5);

        let quota = SourceQuota::parse("optimized:2,new:1").unwrap();
        let ids: Vec<u32> = select_scenes(&refined, &quota).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 4, 1]);
    }

    #[test]
    fn test_select_no_backfill() {
        let refined = RefinedScene {
            scenes: vec![scene(1, SceneSource::Optimized), scene(2, SceneSource::New)],
        };
        let quota = SourceQuota::parse("optimized:3,new:2").unwrap();
        assert_eq!(select_scenes(&refined, &quota).len(), 2);
    }

    #[test]
    fn test_select_falls_back_to_first_five() {
        let refined = RefinedScene {
            scenes: (1..=7).map(|id| scene(id, SceneSource::New)).collect(),
        };
        let quota = SourceQuota::parse("optimized:3").unwrap();
        let ids: Vec<u32> = select_scenes(&refined, &quota).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_text_style_phrases() {
        let chat = Arc::new(ScriptedChat::new(vec![ChatReply {
            content: None,
            tool_arguments: Some(
                r#"{"scenes": [{"scene_no": 1, "scene_description": "a sunlit oak desk"},
                               {"scene_no": 2, "scene_description": "a rainy window sill"}]}"#
                    .to_string(),
            ),
        }]));
        let generator = PhraseGenerator::new(
            chat.clone(),
            "qwen-plus",
            Duration::from_secs(5),
            PromptStyle::Text,
            SourceQuota::parse("optimized:2,new:1").unwrap(),
        );
        let product = ProductInput::new("Lamp", "LED", "/tmp/1", "/tmp/1/main.jpg");

        let result = generator.process(&product, &refined()).await.unwrap();
        assert_eq!(result.texts(), vec!["a sunlit oak desk", "a rainy window sill"]);
        assert!(result.prompt_template.fill("X").contains("scene with X"));

        let requests = chat.requests();
        let tool = requests[0].tool.as_ref().unwrap();
        assert_eq!(tool.name, prompts::PHRASE_TOOL_NAME);
        assert_eq!(tool.description, "Generate 3 scene descriptions");
    }

    #[tokio::test]
    async fn test_structured_style_fills_template() {
        let chat = Arc::new(ScriptedChat::new(vec![ChatReply {
            content: None,
            tool_arguments: Some(
                r#"{"scenes": [{"scene_no": 4, "scene_name": "Loft", "description": "brick loft",
                   "surrounding_objects": "plant", "details": "dust in light", "selling_point": "warmth"}]}"#
                    .to_string(),
            ),
        }]));
        let generator = PhraseGenerator::new(
            chat,
            "qwen-plus",
            Duration::from_secs(5),
            PromptStyle::Structured,
            SourceQuota::default(),
        );
        let product = ProductInput::new("Lamp", "LED", "/tmp/1", "/tmp/1/main.jpg");

        let result = generator.process(&product, &refined()).await.unwrap();
        let text = &result.phrases[0].text;
        assert_eq!(result.phrases[0].scene_no, 4);
        assert!(text.contains("\"setting\": \"Loft\""));
        assert!(text.contains("brick loft"));
        assert!(!text.contains("{{"));
        assert_eq!(result.prompt_template.fill(text), *text);
    }

    #[tokio::test]
    async fn test_missing_tool_call_is_parse_error() {
        let chat = Arc::new(ScriptedChat::new(vec![ChatReply::default()]));
        let generator = PhraseGenerator::new(
            chat,
            "qwen-plus",
            Duration::from_secs(5),
            PromptStyle::Text,
            SourceQuota::default(),
        );
        let product = ProductInput::new("Lamp", "LED", "/tmp/1", "/tmp/1/main.jpg");

        let err = generator.process(&product, &refined()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_repeated_scene_numbers_are_made_unique() {
        let chat = Arc::new(ScriptedChat::new(vec![ChatReply {
            content: None,
            tool_arguments: Some(
                r#"{"scenes": [{"scene_no": 1, "scene_description": "desk"},
                               {"scene_no": 1, "scene_description": "garden"},
                               {"scene_no": 0, "scene_description": "cafe"},
                               {"scene_no": 2, "scene_description": "loft"}]}"#
                    .to_string(),
            ),
        }]));
        let generator = PhraseGenerator::new(
            chat,
            "qwen-plus",
            Duration::from_secs(5),
            PromptStyle::Text,
            SourceQuota::default(),
        );
        let product = ProductInput::new("Lamp", "LED", "/tmp/1", "/tmp/1/main.jpg");

        let result = generator.process(&product, &refined()).await.unwrap();
        let numbers: Vec<u32> = result.phrases.iter().map(|p| p.scene_no).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }
}
