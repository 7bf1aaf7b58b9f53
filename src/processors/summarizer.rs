// file: src/processors/summarizer.rs
// description: vision-model scene summary from the product's reference photos
// reference: https://help.aliyun.com/zh/model-studio/vision

use crate::error::{PipelineError, Result};
use crate::llm::{self, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::{ProductInput, SceneSummary};
use crate::processors::prompts;
use crate::utils::Validator;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, ImageReader};
use image::imageops::FilterType;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const THUMBNAIL_SIZE: u32 = 512;
const STAGE: &str = "scene summarizer";

pub struct VisualSummarizer {
    client: Arc<dyn ChatCompletion>,
    model: String,
    timeout: Duration,
}

impl VisualSummarizer {
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

    pub async fn process(&self, product: &ProductInput) -> Result<SceneSummary> {
        info!(
            "Summarizing product: {} (dir: {})",
            product.name,
            product.sample_dir.display()
        );

        let mut paths = sample_images(&product.sample_dir);
        if paths.is_empty() && product.current_image().is_file() {
            debug!("No sample images, using working image");
            paths.push(product.current_image().to_path_buf());
        }

        let images = encode_thumbnails(paths).await?;
        if images.is_empty() {
            warn!(
                "No valid images found for product {} at {}",
                product.name,
                product.sample_dir.display()
            );
        } else {
            info!("Loaded {} images for analysis", images.len());
        }

        let prompt = prompts::summarizer_prompt(product);
        debug!("Summarizer prompt (length={})", prompt.chars().count());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user_with_images(prompt, images)],
            tool: None,
            timeout: self.timeout,
        };

        let reply = self.client.complete(&request).await?;
        let content = reply
            .content
            .ok_or_else(|| PipelineError::parse(STAGE, "empty reply"))?;
        debug!("Raw summarizer reply: {}", Validator::truncate_text(&content, 500));

        let summary: SceneSummary = llm::parse_json_reply(STAGE, &content)?;
        if !summary.is_match {
            warn!(
                "Reference images do not match product {}: {}",
                product.name, summary.mismatch_reason
            );
        }
        Ok(summary)
    }
}

/// Image files directly inside `dir`, sorted by name.
pub fn sample_images(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| Validator::has_image_extension(p))
        .collect();
    paths.sort();
    paths
}

async fn encode_thumbnails(paths: Vec<PathBuf>) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .filter_map(|path| match encode_thumbnail(path) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Skipping image {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    })
    .await
    .map_err(|e| PipelineError::Io(std::io::Error::other(e)))
}

/// Square JPEG thumbnail as a `data:` URL. The format is sniffed from the
/// file contents since uploads are always stored as `main.jpg`.
pub fn encode_thumbnail(path: &Path) -> Result<String> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let resized = img
        .resize_exact(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
        .to_rgb8();

    let mut buffer = Cursor::new(Vec::new());
    resized.write_to(&mut buffer, ImageFormat::Jpeg)?;

    Ok(format!(
        "data:image/jpeg;base64,{}",
        BASE64.encode(buffer.into_inner())
    ))
}
