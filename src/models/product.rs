// file: src/models/product.rs
// description: product input handed to the scene pipeline
// reference: internal data structures

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub attributes: String,
    /// Directory holding the product's reference photos.
    pub sample_dir: PathBuf,
    /// Working image for synthesis. Replaced only after background removal.
    pub image: PathBuf,
}

impl ProductInput {
    pub fn new(
        name: impl Into<String>,
        detail: impl Into<String>,
        sample_dir: impl Into<PathBuf>,
        image: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            detail: detail.into(),
            attributes: String::new(),
            sample_dir: sample_dir.into(),
            image: image.into(),
        }
    }

    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Identifier used in output names: the last component of the sample directory.
    pub fn product_id(&self) -> String {
        self.sample_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "product".to_string())
    }

    pub fn current_image(&self) -> &Path {
        &self.image
    }

    pub fn with_image(self, image: PathBuf) -> Self {
        Self { image, ..self }
    }
}
