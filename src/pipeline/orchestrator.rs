// file: src/pipeline/orchestrator.rs
// description: runs the scene pipeline stages for one task and reports progress
// reference: orchestrates asynchronous generation workflow

use crate::config::{Config, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::llm::{ChatCompletion, OpenAiCompatClient};
use crate::models::{GeneratedImage, ProductInput, TaskRecord, TaskUpdate};
use crate::pipeline::registry::TaskRegistry;
use crate::processors::{
    BackgroundRemover, ImageSynthesizer, PhraseGenerator, SceneRefiner, SourceQuota,
    VisualSummarizer,
};
use crate::providers::ProviderRegistry;
use crate::storage::{AssetPathResolver, OUTPUTS_MOUNT};
use crate::utils::StageTimer;
use crate::utils::telemetry::total_duration_ms;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const SLOW_STAGE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub need_background_removal: bool,
    pub background_removal_only: bool,
}

/// The stage processors a run is made of.
pub struct PipelineStages {
    pub summarizer: VisualSummarizer,
    pub refiner: SceneRefiner,
    pub phrases: PhraseGenerator,
    pub background: BackgroundRemover,
    pub synthesizer: ImageSynthesizer,
}

impl PipelineStages {
    /// Builds every stage from configuration. Image providers are resolved
    /// here, so an unknown provider name fails before any task runs.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .llm
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PipelineError::Config("llm.api_key is not set".to_string()))?;
        let chat: Arc<dyn ChatCompletion> =
            Arc::new(OpenAiCompatClient::new(&config.llm.base_url, api_key));

        let image = &config.image;
        let scene_provider = ProviderRegistry::resolve(
            ProviderRegistry::stage_provider(image.scene_provider.as_deref(), image)?,
            image.scene_model.as_deref(),
            image,
        )?;
        let background_provider = ProviderRegistry::resolve(
            ProviderRegistry::stage_provider(image.background_provider.as_deref(), image)?,
            image.background_model.as_deref(),
            image,
        )?;

        let text_timeout = Duration::from_secs(config.llm.timeout_secs);
        let vision_timeout = Duration::from_secs(config.llm.vision_timeout_secs);

        Ok(Self {
            summarizer: VisualSummarizer::new(
                chat.clone(),
                &config.llm.summarizer_model,
                vision_timeout,
            ),
            refiner: SceneRefiner::new(chat.clone(), &config.llm.refiner_model, text_timeout),
            phrases: PhraseGenerator::new(
                chat,
                &config.llm.phrase_model,
                text_timeout,
                config.phrase.prompt_style,
                SourceQuota::from_config(&config.phrase.scene_sources),
            ),
            background: BackgroundRemover::new(background_provider),
            synthesizer: ImageSynthesizer::new(scene_provider),
        })
    }
}

pub struct PipelineOrchestrator {
    stages: PipelineStages,
    registry: Arc<TaskRegistry>,
    resolver: AssetPathResolver,
    outputs_root: PathBuf,
    inline_image_limit: usize,
    save_intermediates: bool,
}

impl PipelineOrchestrator {
    pub fn new(
        stages: PipelineStages,
        registry: Arc<TaskRegistry>,
        resolver: AssetPathResolver,
        pipeline: &PipelineConfig,
    ) -> Result<Self> {
        let outputs_root = resolver
            .root(OUTPUTS_MOUNT)
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                PipelineError::Config(format!("Asset mount '{}' is not configured", OUTPUTS_MOUNT))
            })?;

        Ok(Self {
            stages,
            registry,
            resolver,
            outputs_root,
            inline_image_limit: pipeline.inline_image_limit,
            save_intermediates: pipeline.save_intermediates,
        })
    }

    pub fn from_config(config: &Config, registry: Arc<TaskRegistry>) -> Result<Self> {
        let stages = PipelineStages::from_config(config)?;
        Self::new(
            stages,
            registry,
            AssetPathResolver::from_config(config),
            &config.pipeline,
        )
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &AssetPathResolver {
        &self.resolver
    }

    /// Runs every stage for `task_id`, which must already exist in the
    /// registry. The task ends COMPLETED, or FAILED with the message of the
    /// first error that escapes a stage. Files already written are kept.
    pub async fn run(
        &self,
        task_id: &str,
        product: ProductInput,
        options: RunOptions,
    ) -> Result<TaskRecord> {
        info!("[{}] Pipeline started for product {}", task_id, product.name);

        match self.execute(task_id, product, options).await {
            Ok(()) => {
                self.registry.update(task_id, TaskUpdate::completed());
                info!("[{}] Pipeline completed", task_id);
            }
            Err(e) => {
                error!("[{}] Pipeline failed: {}", task_id, e);
                self.registry.update(task_id, TaskUpdate::failed(e.to_string()));
            }
        }

        self.registry.get(task_id)
    }

    async fn execute(&self, task_id: &str, product: ProductInput, options: RunOptions) -> Result<()> {
        let mut timings = Vec::new();
        let mut product = product;

        if options.need_background_removal || options.background_removal_only {
            let timer = StageTimer::start(task_id, "background removal");
            let white_bg = self.stages.background.process(product.current_image()).await?;
            timings.push(timer.finish());

            if options.background_removal_only {
                return self.publish_background_only(task_id, &white_bg).await;
            }
            product = product.with_image(white_bg);
        }

        let task_dir = self.task_dir(&product);
        let intermediates = task_dir.join("intermediates");
        tokio::fs::create_dir_all(&task_dir)
            .await
            .map_err(|e| PipelineError::file(&task_dir, e))?;
        info!("[{}] Output directory: {}", task_id, task_dir.display());

        let timer = StageTimer::start(task_id, "scene summary");
        let summary = self.stages.summarizer.process(&product).await?;
        timer.warn_if_slow(SLOW_STAGE);
        timings.push(timer.finish_with_count(summary.scenes.len(), "scenes"));
        self.snapshot(
            &intermediates,
            &format!("01_scene_summarizer_{}.json", sanitize(self.stages.summarizer.model())),
            &summary,
        )
        .await;

        let timer = StageTimer::start(task_id, "scene refinement");
        let refined = self.stages.refiner.process(&product, &summary).await?;
        timer.warn_if_slow(SLOW_STAGE);
        timings.push(timer.finish_with_count(refined.scenes.len(), "scenes"));
        self.snapshot(
            &intermediates,
            &format!("02_scene_refiner_{}.json", sanitize(self.stages.refiner.model())),
            &refined,
        )
        .await;

        let timer = StageTimer::start(task_id, "phrase generation");
        let phrases = self.stages.phrases.process(&product, &refined).await?;
        timings.push(timer.finish_with_count(phrases.phrases.len(), "phrases"));
        self.registry
            .update(task_id, TaskUpdate::new().phrases(phrases.texts()));
        self.snapshot(
            &intermediates,
            &format!(
                "03_phrase_generator_{}_{}.json",
                sanitize(self.stages.phrases.model()),
                self.stages.phrases.style()
            ),
            &phrases,
        )
        .await;

        let timer = StageTimer::start(task_id, "image synthesis");
        let registry = &self.registry;
        let resolver = &self.resolver;
        let inline_limit = self.inline_image_limit;
        let mut inline_count = 0;
        let mut on_image = |image: &GeneratedImage, bytes: &[u8]| {
            let mut update = TaskUpdate::new().image(resolver.public_url(&image.path));
            if inline_count < inline_limit {
                update = update.image_inline(data_url(bytes));
                inline_count += 1;
            }
            registry.update(task_id, update);
        };

        let generated = self
            .stages
            .synthesizer
            .process(
                &product.product_id(),
                product.current_image(),
                &phrases,
                &task_dir,
                &mut on_image,
            )
            .await?;
        timings.push(timer.finish_with_count(generated.images.len(), "images"));
        self.snapshot(
            &intermediates,
            &format!(
                "04_image_generator_{}.json",
                sanitize(self.stages.synthesizer.provider().provider_name())
            ),
            &generated,
        )
        .await;

        info!(
            "[{}] {} of {} scenes rendered in {:.2}s",
            task_id,
            generated.images.len(),
            phrases.phrases.len(),
            total_duration_ms(&timings) as f64 / 1000.0
        );
        Ok(())
    }

    async fn publish_background_only(&self, task_id: &str, white_bg: &Path) -> Result<()> {
        let extension = white_bg
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let target = self
            .outputs_root
            .join(format!("white_bg_{}.{}", task_id, extension));

        tokio::fs::create_dir_all(&self.outputs_root)
            .await
            .map_err(|e| PipelineError::file(&self.outputs_root, e))?;
        let bytes = tokio::fs::read(white_bg)
            .await
            .map_err(|e| PipelineError::file(white_bg, e))?;
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| PipelineError::file(&target, e))?;

        let mut update = TaskUpdate::new().image(self.resolver.public_url(&target));
        if self.inline_image_limit > 0 {
            update = update.image_inline(data_url(&bytes));
        }
        self.registry.update(task_id, update);
        info!("[{}] Background-only result at {}", task_id, target.display());
        Ok(())
    }

    fn task_dir(&self, product: &ProductInput) -> PathBuf {
        let provider = self.stages.synthesizer.provider();
        let product_id = product.product_id();
        let style = self.stages.phrases.style().to_string();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S%3f").to_string();

        let parts: [&str; 8] = [
            &product_id,
            self.stages.summarizer.model(),
            self.stages.refiner.model(),
            self.stages.phrases.model(),
            &style,
            provider.provider_name(),
            provider.model_name(),
            &timestamp,
        ];
        let name: Vec<String> = parts.iter().map(|part| sanitize(part)).collect();

        self.outputs_root.join(name.join("_"))
    }

    /// Stage snapshots are debugging aids; failing to write one is logged only.
    async fn snapshot<T: Serialize>(&self, dir: &Path, file_name: &str, value: &T) {
        if !self.save_intermediates {
            return;
        }

        let path = dir.join(file_name);
        if let Err(e) = write_json(dir, &path, value).await {
            warn!("Failed to save snapshot {}: {}", path.display(), e);
        }
    }
}

async fn write_json<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::file(dir, e))?;
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| PipelineError::file(path, e))
}

/// Replaces characters that are unsafe in a single path segment.
pub fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect()
}

pub fn data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptStyle;
    use crate::llm::ChatReply;
    use crate::models::TaskStatus;
    use crate::processors::testing::{
        Outcome, ScriptedChat, ScriptedProvider, png_bytes, write_test_image,
    };
    use crate::storage::DATA_MOUNT;
    use tempfile::TempDir;

    const SUMMARY: &str = r#"{"is_match": true, "mismatch_reason": "", "scene_count": 1,
        "scenes": [{"id": 1, "scene_name": "Desk", "description": "oak desk"}]}"#;
    const REFINED: &str = r#"```json
{"scenes": [
  {"id": 1, "scene_name": "Desk", "source": "optimized"},
  {"id": 2, "scene_name": "Garden", "source": "new"},
  {"id": 3, "scene_name": "Cafe", "source": "new"}
]}
```"#;
    const PHRASES: &str = r#"{"scenes": [
        {"scene_no": 1, "scene_description": "an oak desk"},
        {"scene_no": 2, "scene_description": "a garden bench"},
        {"scene_no": 3, "scene_description": "a cafe table"}]}"#;

    fn chat_script() -> Vec<ChatReply> {
        vec![
            ChatReply {
                content: Some(SUMMARY.to_string()),
                tool_arguments: None,
            },
            ChatReply {
                content: Some(REFINED.to_string()),
                tool_arguments: None,
            },
            ChatReply {
                content: None,
                tool_arguments: Some(PHRASES.to_string()),
            },
        ]
    }

    struct Fixture {
        temp: TempDir,
        registry: Arc<TaskRegistry>,
        orchestrator: PipelineOrchestrator,
        product: ProductInput,
    }

    fn fixture(chat: ScriptedChat, scene: ScriptedProvider, background: ScriptedProvider) -> Fixture {
        let temp = TempDir::new().unwrap();
        let sample_dir = temp.path().join("7");
        std::fs::create_dir_all(&sample_dir).unwrap();
        write_test_image(&sample_dir.join("main.jpg"));

        let chat: Arc<dyn ChatCompletion> = Arc::new(chat);
        let stages = PipelineStages {
            summarizer: VisualSummarizer::new(chat.clone(), "qwen-vl-plus", Duration::from_secs(5)),
            refiner: SceneRefiner::new(chat.clone(), "qwen-plus", Duration::from_secs(5)),
            phrases: PhraseGenerator::new(
                chat,
                "qwen-plus",
                Duration::from_secs(5),
                PromptStyle::Text,
                SourceQuota::default(),
            ),
            background: BackgroundRemover::new(Arc::new(background)),
            synthesizer: ImageSynthesizer::new(Arc::new(scene)),
        };

        let resolver = AssetPathResolver::new([
            (OUTPUTS_MOUNT, temp.path().join("outputs")),
            (DATA_MOUNT, temp.path().to_path_buf()),
        ]);
        let registry = Arc::new(TaskRegistry::new());
        let pipeline = Config::default_config().pipeline;
        let orchestrator =
            PipelineOrchestrator::new(stages, registry.clone(), resolver, &pipeline).unwrap();
        let product = ProductInput::new("Lamp", "LED", &sample_dir, sample_dir.join("main.jpg"));

        Fixture {
            temp,
            registry,
            orchestrator,
            product,
        }
    }

    fn task_dirs(outputs: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(outputs)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect()
    }

    #[tokio::test]
    async fn test_partial_synthesis_completes() {
        let f = fixture(
            ScriptedChat::new(chat_script()),
            ScriptedProvider::new(vec![
                Outcome::Image(png_bytes()),
                Outcome::Fail("HTTP 502".to_string()),
                Outcome::Image(png_bytes()),
            ]),
            ScriptedProvider::new(vec![]),
        );
        f.registry.create("t1");

        let record = f
            .orchestrator
            .run("t1", f.product.clone(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.phrases.len(), 3);
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.images_inline.len(), 2);
        assert!(record.images.iter().all(|url| url.starts_with("/outputs/7_qwen-vl-plus_")));
        assert!(record.images_inline[0].starts_with("data:image/png;base64,"));
        assert!(record.error.is_none());

        let dirs = task_dirs(&f.temp.path().join("outputs"));
        assert_eq!(dirs.len(), 1);
        let dir_name = dirs[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(dir_name.starts_with("7_qwen-vl-plus_qwen-plus_qwen-plus_text_scripted_fake-image-1_"));

        let intermediates = dirs[0].join("intermediates");
        for name in [
            "01_scene_summarizer_qwen-vl-plus.json",
            "02_scene_refiner_qwen-plus.json",
            "03_phrase_generator_qwen-plus_text.json",
            "04_image_generator_scripted.json",
        ] {
            assert!(intermediates.join(name).is_file(), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_inline_payloads_are_capped() {
        let f = fixture(
            ScriptedChat::new(chat_script()),
            ScriptedProvider::new(vec![]),
            ScriptedProvider::new(vec![]),
        );
        f.registry.create("t1");

        let record = f
            .orchestrator
            .run("t1", f.product.clone(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(record.images.len(), 3);
        assert_eq!(record.images_inline.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_error_marks_failed() {
        let mut script = chat_script();
        script.truncate(1);
        let f = fixture(
            ScriptedChat::new(script),
            ScriptedProvider::new(vec![]),
            ScriptedProvider::new(vec![]),
        );
        f.registry.create("t1");

        let record = f
            .orchestrator
            .run("t1", f.product.clone(), RunOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("no scripted reply left"));
        assert!(record.images.is_empty());

        // the summary snapshot written before the failure stays on disk
        let dirs = task_dirs(&f.temp.path().join("outputs"));
        assert!(
            dirs[0]
                .join("intermediates")
                .join("01_scene_summarizer_qwen-vl-plus.json")
                .is_file()
        );
    }

    #[tokio::test]
    async fn test_background_only() {
        let f = fixture(
            ScriptedChat::new(vec![]),
            ScriptedProvider::new(vec![]),
            ScriptedProvider::new(vec![Outcome::Image(png_bytes())]),
        );
        f.registry.create("t9");

        let options = RunOptions {
            need_background_removal: false,
            background_removal_only: true,
        };
        let record = f
            .orchestrator
            .run("t9", f.product.clone(), options)
            .await
            .unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.images, vec!["/outputs/white_bg_t9.png"]);
        assert_eq!(record.images_inline.len(), 1);
        assert!(f.temp.path().join("outputs").join("white_bg_t9.png").is_file());
        assert!(f.temp.path().join("7").join("white_bg_main.png").is_file());
    }

    #[tokio::test]
    async fn test_background_failure_is_hard() {
        let f = fixture(
            ScriptedChat::new(chat_script()),
            ScriptedProvider::new(vec![]),
            ScriptedProvider::new(vec![Outcome::Empty]),
        );
        f.registry.create("t1");

        let options = RunOptions {
            need_background_removal: true,
            background_removal_only: false,
        };
        let record = f
            .orchestrator
            .run("t1", f.product.clone(), options)
            .await
            .unwrap();

        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.phrases.is_empty());
    }

    #[test]
    fn test_unknown_provider_fails_construction() {
        let mut config = Config::default_config();
        config.llm.api_key = Some("llm-key".to_string());
        config.image.gemini_api_key = Some("img-key".to_string());
        config.image.default_provider = Some("midjourney".to_string());

        let err = PipelineStages::from_config(&config).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        config.image.default_provider = Some("grsai".to_string());
        assert!(PipelineStages::from_config(&config).is_ok());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("models/gemini:2.5 flash"), "models-gemini-2.5-flash");
        assert_eq!(sanitize("qwen-vl-plus"), "qwen-vl-plus");
    }
}
