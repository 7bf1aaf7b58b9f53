// file: src/processors/background.rs
// description: white background product shot through an image provider
// reference: https://ai.google.dev/gemini-api/docs/image-generation#image-editing

use crate::error::{PipelineError, Result};
use crate::processors::{image_extension, prompts};
use crate::providers::{ImageSynthesis, ReferenceImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct BackgroundRemover {
    provider: Arc<dyn ImageSynthesis>,
}

impl BackgroundRemover {
    pub fn new(provider: Arc<dyn ImageSynthesis>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn ImageSynthesis {
        self.provider.as_ref()
    }

    /// Writes `white_bg_{stem}.{ext}` next to `image_path` and returns it.
    /// A provider answer without an image is an error.
    pub async fn process(&self, image_path: &Path) -> Result<PathBuf> {
        info!(
            "Generating white background for {} via {} ({})",
            image_path.display(),
            self.provider.provider_name(),
            self.provider.model_name()
        );

        let reference = ReferenceImage::from_path(image_path).await?;
        let bytes = self
            .provider
            .synthesize(prompts::WHITE_BACKGROUND_PROMPT, &reference)
            .await?
            .ok_or_else(|| {
                PipelineError::upstream(
                    self.provider.provider_name(),
                    "no image returned for white background",
                )
            })?;

        let output = white_background_path(image_path, image_extension(&bytes));
        tokio::fs::write(&output, &bytes)
            .await
            .map_err(|e| PipelineError::file(&output, e))?;

        info!("White background image saved to {}", output.display());
        Ok(output)
    }
}

pub fn white_background_path(image_path: &Path, extension: &str) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    image_path.with_file_name(format!("white_bg_{}.{}", stem, extension))
}
