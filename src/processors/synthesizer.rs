// file: src/processors/synthesizer.rs
// description: one provider call per scene phrase, with per-image progress callbacks
// reference: sequential generation with partial-failure tolerance

use crate::error::{PipelineError, Result};
use crate::models::{GeneratedImage, ImageGenerationResult, PhraseResult};
use crate::processors::image_extension;
use crate::providers::{ImageSynthesis, ReferenceImage};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives each image right after it is written, before the next phrase runs.
pub type ImageCallback<'a> = dyn FnMut(&GeneratedImage, &[u8]) + Send + 'a;

pub struct ImageSynthesizer {
    provider: Arc<dyn ImageSynthesis>,
}

impl ImageSynthesizer {
    pub fn new(provider: Arc<dyn ImageSynthesis>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn ImageSynthesis {
        self.provider.as_ref()
    }

    /// Phrases whose provider call fails or returns no image are left out of
    /// the result. Only an unreadable source image or an unwritable output
    /// directory fails the stage.
    pub async fn process(
        &self,
        file_prefix: &str,
        current_image: &Path,
        phrases: &PhraseResult,
        output_dir: &Path,
        on_image: &mut ImageCallback<'_>,
    ) -> Result<ImageGenerationResult> {
        let reference = ReferenceImage::from_path(current_image).await.map_err(|e| {
            PipelineError::Input(format!(
                "No valid source image at {}: {}",
                current_image.display(),
                e
            ))
        })?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| PipelineError::file(output_dir, e))?;

        let total = phrases.phrases.len();
        info!(
            "Generating {} images with {} ({})",
            total,
            self.provider.provider_name(),
            self.provider.model_name()
        );

        let mut result = ImageGenerationResult::default();
        let mut written = HashSet::new();

        for (i, phrase) in phrases.phrases.iter().enumerate() {
            let prompt = phrases.prompt_template.fill(&phrase.text);
            info!("[{}/{}] Processing scene {}", i + 1, total, phrase.scene_no);
            debug!("Full generation prompt: {}", prompt);

            let bytes = match self.provider.synthesize(&prompt, &reference).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!("Provider returned no image for scene {}", phrase.scene_no);
                    continue;
                }
                Err(e) => {
                    error!("Generation failed for scene {}: {}", phrase.scene_no, e);
                    continue;
                }
            };

            let extension = image_extension(&bytes);
            let mut path = output_dir.join(format!(
                "{}_scene{}.{}",
                file_prefix, phrase.scene_no, extension
            ));
            if !written.insert(path.clone()) {
                path = output_dir.join(format!(
                    "{}_scene{}_{}.{}",
                    file_prefix,
                    phrase.scene_no,
                    i + 1,
                    extension
                ));
                written.insert(path.clone());
            }
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| PipelineError::file(&path, e))?;
            info!("Saved scene {} to {}", phrase.scene_no, path.display());

            let image = GeneratedImage {
                scene_no: phrase.scene_no,
                path,
                prompt,
            };
            on_image(&image, &bytes);
            result.images.push(image);
        }

        info!("Generated {}/{} images", result.images.len(), total);
        Ok(result)
    }
}
