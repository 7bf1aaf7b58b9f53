// file: src/processors/mod.rs
// description: pipeline stage processors
// reference: internal module structure

pub mod background;
pub mod phrase;
pub mod prompts;
pub mod refiner;
pub mod summarizer;
pub mod synthesizer;

pub use background::BackgroundRemover;
pub use phrase::{PhraseGenerator, SourceQuota, select_scenes};
pub use refiner::SceneRefiner;
pub use summarizer::VisualSummarizer;
pub use synthesizer::{ImageCallback, ImageSynthesizer};

use image::ImageFormat;

/// File extension matching the encoded image, `png` when unknown.
pub fn image_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::WebP) => "webp",
        _ => "png",
    }
}
