// file: src/models/catalog.rs
// description: persisted product catalog record
// reference: internal data structures

use serde::{Deserialize, Serialize};

/// Indices at or above this value are legacy artifacts and never sequenced.
pub const LEGACY_INDEX_FLOOR: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub attributes: String,
    #[serde(rename = "image", default)]
    pub main_image: String,
    #[serde(rename = "sub_images", default)]
    pub sub_images: Vec<String>,
    #[serde(rename = "detail_images", default)]
    pub detail_images: Vec<String>,
    #[serde(default)]
    pub task_id: String,
}

impl CatalogRecord {
    pub fn is_legacy(&self) -> bool {
        self.index >= LEGACY_INDEX_FLOOR
    }
}
