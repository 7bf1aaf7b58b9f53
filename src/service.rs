// file: src/service.rs
// description: submit and poll entry points tying storage, catalog and pipeline together
// reference: background task execution with polled status

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{CatalogRecord, ProductInput, TaskRecord, TaskUpdate};
use crate::pipeline::{PipelineOrchestrator, RunOptions, TaskRegistry};
use crate::storage::{AssetDownloader, AssetPathResolver, DATA_MOUNT, OUTPUTS_MOUNT, ProductCatalog};
use crate::utils::Validator;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAIN_IMAGE: &str = "main.jpg";

/// Where the main product image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Path under the outputs mount, relative to it.
    Server(String),
    Inline(Vec<u8>),
    Remote(String),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub attributes: String,
    /// Base64 payload, optionally as a `data:` URL.
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Server path such as `/outputs/white_bg_x.png`.
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub gallery_images: Vec<String>,
    #[serde(default)]
    pub detail_images: Vec<String>,
    #[serde(default)]
    pub need_background_removal: bool,
    #[serde(default = "default_true")]
    pub persist_to_catalog: bool,
    #[serde(default)]
    pub background_removal_only: bool,
    #[serde(default)]
    pub reuse_index: Option<u64>,
}

impl SubmitRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persist_to_catalog: true,
            ..Default::default()
        }
    }

    /// Picks the image source: server path, then inline payload, then URL.
    pub fn image_source(&self) -> Result<ImageSource> {
        if let Some(path) = self.image_path.as_deref().filter(|p| !p.trim().is_empty()) {
            let relative = Validator::validate_server_path(path, OUTPUTS_MOUNT)?;
            return Ok(ImageSource::Server(relative.to_string()));
        }
        if let Some(payload) = self.image_base64.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(ImageSource::Inline(Validator::decode_inline_image(payload)?));
        }
        if let Some(url) = self.image_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let url = Validator::normalize_remote_url(url)
                .ok_or_else(|| PipelineError::Input(format!("Invalid URL format: {}", url)))?;
            return Ok(ImageSource::Remote(url));
        }
        Err(PipelineError::Input(
            "No image provided (base64, URL or path)".to_string(),
        ))
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            need_background_removal: self.need_background_removal,
            background_removal_only: self.background_removal_only,
        }
    }
}

#[derive(Clone)]
pub struct VisualEngine {
    orchestrator: Arc<PipelineOrchestrator>,
    catalog: Arc<ProductCatalog>,
    downloader: AssetDownloader,
    data_root: PathBuf,
    download_timeout: Duration,
    source_image_timeout: Duration,
}

impl VisualEngine {
    pub fn new(config: &Config, orchestrator: PipelineOrchestrator, catalog: ProductCatalog) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            catalog: Arc::new(catalog),
            downloader: AssetDownloader::new(),
            data_root: config.paths.data_root.clone(),
            download_timeout: Duration::from_secs(config.pipeline.download_timeout_secs),
            source_image_timeout: Duration::from_secs(config.pipeline.source_image_timeout_secs),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(TaskRegistry::new());
        let orchestrator = PipelineOrchestrator::from_config(config, registry)?;
        let catalog = ProductCatalog::new(config.catalog_path());
        Ok(Self::new(config, orchestrator, catalog))
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.orchestrator.registry()
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Catalog records read off the async runtime threads.
    pub async fn catalog_records(&self) -> Result<Vec<CatalogRecord>> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.records())
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    fn resolver(&self) -> &AssetPathResolver {
        self.orchestrator.resolver()
    }

    /// Validates the request, registers a task and starts it in the
    /// background. Returns the task id without waiting. Must be called
    /// inside a tokio runtime.
    pub fn submit(&self, request: SubmitRequest) -> Result<String> {
        let source = request.image_source()?;
        let task_id = Uuid::new_v4().to_string();

        self.registry().create(&task_id);
        info!("Task {} submitted for product {}", task_id, request.name);

        let engine = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let registry = Arc::clone(engine.registry());
            guard_panics(&registry, &id, engine.process(&id, request, source)).await;
        });

        Ok(task_id)
    }

    pub fn poll(&self, task_id: &str) -> Result<TaskRecord> {
        self.registry().get(task_id)
    }

    /// Runs the pipeline in the foreground for a product already in the
    /// catalog, reading its main image through the data mount.
    pub async fn run_record(&self, record: &CatalogRecord, options: RunOptions) -> Result<TaskRecord> {
        let main_image = self
            .resolver()
            .resolve(DATA_MOUNT, Path::new(&record.main_image))?;
        Validator::validate_image_file(&main_image)?;

        let sample_dir = self.data_root.join(record.index.to_string());
        let product = ProductInput::new(&record.name, &record.detail, sample_dir, main_image)
            .with_attributes(&record.attributes);

        let task_id = Uuid::new_v4().to_string();
        self.registry().create(&task_id);
        self.registry()
            .update(&task_id, TaskUpdate::new().product_index(record.index));
        self.orchestrator.run(&task_id, product, options).await
    }

    async fn process(&self, task_id: &str, request: SubmitRequest, source: ImageSource) {
        if let Err(e) = self.prepare_and_run(task_id, request, source).await {
            error!("Task {} failed before the pipeline ran: {}", task_id, e);
            self.registry().update(task_id, TaskUpdate::failed(e.to_string()));
        }
    }

    async fn prepare_and_run(
        &self,
        task_id: &str,
        request: SubmitRequest,
        source: ImageSource,
    ) -> Result<()> {
        let image = self.fetch_source(&source).await?;

        let main_image = if request.persist_to_catalog {
            self.materialize_catalog_product(task_id, &request, &image)
                .await?
        } else {
            let dir = self.data_root.join("temp").join(task_id);
            write_main_image(&dir, &image).await?
        };

        let sample_dir = main_image
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.data_root.clone());
        let product = ProductInput::new(&request.name, &request.detail, sample_dir, main_image)
            .with_attributes(&request.attributes);

        self.orchestrator
            .run(task_id, product, request.run_options())
            .await?;
        Ok(())
    }

    async fn fetch_source(&self, source: &ImageSource) -> Result<Vec<u8>> {
        match source {
            ImageSource::Inline(bytes) => Ok(bytes.clone()),
            ImageSource::Server(relative) => {
                let path = self.resolver().resolve(OUTPUTS_MOUNT, Path::new(relative))?;
                if !path.is_file() {
                    return Err(PipelineError::Input(format!(
                        "Image path not found: {}",
                        path.display()
                    )));
                }
                info!("Loading image from {}", path.display());
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| PipelineError::file(&path, e))
            }
            ImageSource::Remote(url) => {
                let (bytes, _) = self
                    .downloader
                    .fetch(url, self.source_image_timeout)
                    .await?;
                Ok(bytes)
            }
        }
    }

    async fn materialize_catalog_product(
        &self,
        task_id: &str,
        request: &SubmitRequest,
        image: &[u8],
    ) -> Result<PathBuf> {
        let mut record = CatalogRecord {
            index: request.reuse_index.unwrap_or(0),
            name: request.name.clone(),
            detail: request.detail.clone(),
            attributes: request.attributes.clone(),
            main_image: String::new(),
            sub_images: Vec::new(),
            detail_images: Vec::new(),
            task_id: task_id.to_string(),
        };

        let (index, main_image) = match request.reuse_index {
            Some(index) => {
                let dir = self.data_root.join(index.to_string());
                (index, write_main_image(&dir, image).await?)
            }
            None => {
                // The image is written while the index is held, so a failed
                // write never leaves a catalog record without its image.
                let catalog = self.catalog.clone();
                let data_root = self.data_root.clone();
                let bytes = image.to_vec();
                let placeholder = record.clone();
                let index = tokio::task::spawn_blocking(move || {
                    catalog.allocate_with(placeholder, |r| {
                        write_main_image_blocking(&data_root.join(r.index.to_string()), &bytes)?;
                        r.main_image = format!("{}/{}", r.index, MAIN_IMAGE);
                        Ok(())
                    })
                })
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))??;
                (index, self.data_root.join(index.to_string()).join(MAIN_IMAGE))
            }
        };
        record.index = index;
        self.registry()
            .update(task_id, TaskUpdate::new().product_index(index));

        let product_dir = self.data_root.join(index.to_string());

        let gallery = self
            .downloader
            .download_all(
                &request.gallery_images,
                &product_dir.join("sub_images"),
                "gallery",
                self.download_timeout,
            )
            .await;
        let details = self
            .downloader
            .download_all(
                &request.detail_images,
                &product_dir.join("detail"),
                "detail",
                self.download_timeout,
            )
            .await;

        record.main_image = self.data_relative(&main_image);
        record.sub_images = gallery.iter().map(|p| self.data_relative(p)).collect();
        record.detail_images = details.iter().map(|p| self.data_relative(p)).collect();

        let catalog = self.catalog.clone();
        match tokio::task::spawn_blocking(move || catalog.upsert(record)).await {
            Ok(Ok(outcome)) => info!("Catalog record {} saved ({:?})", index, outcome),
            Ok(Err(e)) => warn!("Failed to save catalog record {}: {}", index, e),
            Err(e) => warn!("Catalog write task failed for {}: {}", index, e),
        }

        Ok(main_image)
    }

    /// Catalog paths are stored relative to the data root with `/` separators.
    fn data_relative(&self, path: &Path) -> String {
        match self.resolver().relative_to(DATA_MOUNT, path) {
            Some(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            None => path.display().to_string(),
        }
    }
}

/// Runs `work` and marks the task FAILED if it panics, so a task never stays
/// PROCESSING after its worker is gone.
async fn guard_panics<F>(registry: &TaskRegistry, task_id: &str, work: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Task {} panicked: {}", task_id, message);
        registry.update(
            task_id,
            TaskUpdate::failed(format!("Internal error: {}", message)),
        );
    }
}

async fn write_main_image(dir: &Path, image: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::file(dir, e))?;
    let path = dir.join(MAIN_IMAGE);
    tokio::fs::write(&path, image)
        .await
        .map_err(|e| PipelineError::file(&path, e))?;
    Ok(path)
}

fn write_main_image_blocking(dir: &Path, image: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::file(dir, e))?;
    let path = dir.join(MAIN_IMAGE);
    std::fs::write(&path, image).map_err(|e| PipelineError::file(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptStyle;
    use crate::llm::{ChatCompletion, ChatReply};
    use crate::models::TaskStatus;
    use crate::pipeline::PipelineStages;
    use crate::processors::testing::{ScriptedChat, ScriptedProvider, png_bytes};
    use crate::processors::{
        BackgroundRemover, ImageSynthesizer, PhraseGenerator, SceneRefiner, SourceQuota,
        VisualSummarizer,
    };
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn scripted_replies() -> Vec<ChatReply> {
        vec![
            ChatReply {
                content: Some(
                    r#"{"is_match": true, "scenes": [{"id": 1, "scene_name": "Desk"}]}"#
                        .to_string(),
                ),
                tool_arguments: None,
            },
            ChatReply {
                content: Some(
                    r#"{"scenes": [{"id": 1, "scene_name": "Desk", "source": "optimized"},
                                   {"id": 2, "scene_name": "Garden", "source": "new"}]}"#
                        .to_string(),
                ),
                tool_arguments: None,
            },
            ChatReply {
                content: None,
                tool_arguments: Some(
                    r#"{"scenes": [{"scene_no": 1, "scene_description": "an oak desk"},
                                   {"scene_no": 2, "scene_description": "a garden bench"}]}"#
                        .to_string(),
                ),
            },
        ]
    }

    fn engine(temp: &TempDir, replies: Vec<ChatReply>) -> VisualEngine {
        let mut config = Config::default_config();
        config.paths.data_root = temp.path().to_path_buf();

        let chat: Arc<dyn ChatCompletion> = Arc::new(ScriptedChat::new(replies));
        let stages = PipelineStages {
            summarizer: VisualSummarizer::new(chat.clone(), "vl", Duration::from_secs(5)),
            refiner: SceneRefiner::new(chat.clone(), "txt", Duration::from_secs(5)),
            phrases: PhraseGenerator::new(
                chat,
                "txt",
                Duration::from_secs(5),
                PromptStyle::Text,
                SourceQuota::default(),
            ),
            background: BackgroundRemover::new(Arc::new(ScriptedProvider::new(vec![]))),
            synthesizer: ImageSynthesizer::new(Arc::new(ScriptedProvider::new(vec![]))),
        };
        let orchestrator = PipelineOrchestrator::new(
            stages,
            Arc::new(TaskRegistry::new()),
            AssetPathResolver::from_config(&config),
            &config.pipeline,
        )
        .unwrap();

        VisualEngine::new(&config, orchestrator, ProductCatalog::new(config.catalog_path()))
    }

    async fn wait_for_terminal(engine: &VisualEngine, task_id: &str) -> TaskRecord {
        for _ in 0..200 {
            let record = engine.poll(task_id).unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {} did not finish", task_id);
    }

    #[test]
    fn test_image_source_precedence() {
        let mut request = SubmitRequest::new("Lamp");
        assert!(matches!(request.image_source(), Err(PipelineError::Input(_))));

        request.image_url = Some("//cdn.example.com/a.jpg".to_string());
        assert_eq!(
            request.image_source().unwrap(),
            ImageSource::Remote("https://cdn.example.com/a.jpg".to_string())
        );

        request.image_base64 = Some(format!("data:image/png;base64,{}", BASE64.encode(b"img")));
        assert_eq!(request.image_source().unwrap(), ImageSource::Inline(b"img".to_vec()));

        request.image_path = Some("/outputs/white_bg_1.png".to_string());
        assert_eq!(
            request.image_source().unwrap(),
            ImageSource::Server("white_bg_1.png".to_string())
        );

        request.image_path = Some("/etc/passwd".to_string());
        assert_err!(request.image_source());
    }

    #[test]
    fn test_submit_request_defaults() {
        let request: SubmitRequest = serde_json::from_str(r#"{"name": "Lamp"}"#).unwrap();
        assert!(request.persist_to_catalog);
        assert!(!request.background_removal_only);
        assert!(SubmitRequest::new("Lamp").persist_to_catalog);
    }

    #[tokio::test]
    async fn test_submit_without_image_creates_no_task() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, vec![]);

        let err = engine.submit(SubmitRequest::new("Lamp")).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_poll_unknown_task() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, vec![]);
        assert!(matches!(engine.poll("nope"), Err(PipelineError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_persists_to_catalog() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, scripted_replies());

        let mut request = SubmitRequest::new("Lamp");
        request.detail = "LED".to_string();
        request.image_base64 = Some(BASE64.encode(png_bytes()));
        request.gallery_images = vec!["blob:skip-me".to_string()];

        let task_id = engine.submit(request).unwrap();
        let record = wait_for_terminal(&engine, &task_id).await;

        assert_eq!(record.status, TaskStatus::Completed, "{:?}", record.error);
        assert_eq!(record.product_index, Some(1));
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.phrases, vec!["an oak desk", "a garden bench"]);

        let saved = engine.catalog().get(1).unwrap();
        assert_eq!(saved.main_image, "1/main.jpg");
        assert_eq!(saved.task_id, task_id);
        assert!(saved.sub_images.is_empty());
        assert!(temp.path().join("1").join("main.jpg").is_file());
    }

    #[tokio::test]
    async fn test_submit_to_temp_dir() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, scripted_replies());

        let mut request = SubmitRequest::new("Lamp");
        request.persist_to_catalog = false;
        request.image_base64 = Some(BASE64.encode(png_bytes()));

        let task_id = assert_ok!(engine.submit(request));
        let record = wait_for_terminal(&engine, &task_id).await;

        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.product_index.is_none());
        assert!(temp.path().join("temp").join(&task_id).join("main.jpg").is_file());
        assert!(engine.catalog().records().is_empty());
    }

    #[tokio::test]
    async fn test_run_record_from_catalog() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, scripted_replies());

        let product_dir = temp.path().join("7");
        std::fs::create_dir_all(&product_dir).unwrap();
        std::fs::write(product_dir.join("main.jpg"), png_bytes()).unwrap();
        let record = CatalogRecord {
            index: 7,
            name: "Lamp".to_string(),
            detail: String::new(),
            attributes: String::new(),
            main_image: "7/main.jpg".to_string(),
            sub_images: vec![],
            detail_images: vec![],
            task_id: String::new(),
        };

        let result = engine.run_record(&record, RunOptions::default()).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.product_index, Some(7));

        let missing = CatalogRecord {
            main_image: "8/main.jpg".to_string(),
            ..record
        };
        assert!(matches!(
            engine.run_record(&missing, RunOptions::default()).await,
            Err(PipelineError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_unwritable_product_dir_keeps_catalog_clean() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, scripted_replies());
        std::fs::write(temp.path().join("1"), b"not a directory").unwrap();

        let mut request = SubmitRequest::new("Lamp");
        request.image_base64 = Some(BASE64.encode(png_bytes()));

        let task_id = engine.submit(request).unwrap();
        let record = wait_for_terminal(&engine, &task_id).await;

        assert_eq!(record.status, TaskStatus::Failed);
        assert!(engine.catalog_records().await.unwrap().is_empty());
        assert_eq!(engine.catalog().next_index(), 1);
    }

    #[tokio::test]
    async fn test_oversized_scene_ids_still_complete() {
        let temp = TempDir::new().unwrap();
        let mut replies = scripted_replies();
        replies[1].content = Some(
            r#"{"scenes": [{"id": 4294967295, "scene_name": "Desk", "source": "optimized"},
                           {"id": 4294967295, "scene_name": "Garden", "source": "new"}]}"#
                .to_string(),
        );
        let engine = engine(&temp, replies);

        let mut request = SubmitRequest::new("Lamp");
        request.persist_to_catalog = false;
        request.image_base64 = Some(BASE64.encode(png_bytes()));

        let task_id = engine.submit(request).unwrap();
        let record = wait_for_terminal(&engine, &task_id).await;

        assert_eq!(record.status, TaskStatus::Completed, "{:?}", record.error);
    }

    #[tokio::test]
    async fn test_panicking_worker_marks_task_failed() {
        let registry = TaskRegistry::new();
        registry.create("t1");

        guard_panics(&registry, "t1", async {
            panic!("stage exploded");
        })
        .await;

        let record = registry.get("t1").unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("stage exploded"));

        registry.create("t2");
        guard_panics(&registry, "t2", async {}).await;
        assert_eq!(registry.get("t2").unwrap().status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_missing_server_image_fails_task() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, vec![]);

        let mut request = SubmitRequest::new("Lamp");
        request.image_path = Some("/outputs/white_bg_missing.png".to_string());

        let task_id = engine.submit(request).unwrap();
        let record = wait_for_terminal(&engine, &task_id).await;

        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("not found"));
        assert!(!temp.path().join("1").exists());
    }
}
