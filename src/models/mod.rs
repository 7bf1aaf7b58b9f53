// file: src/models/mod.rs
// description: data models module exports
// reference: internal module structure

pub mod catalog;
pub mod phrase;
pub mod product;
pub mod scene;
pub mod task;

pub use catalog::{CatalogRecord, LEGACY_INDEX_FLOOR};
pub use phrase::{GeneratedImage, ImageGenerationResult, PhraseResult, ScenePhrase};
pub use product::ProductInput;
pub use scene::{RefinedScene, SceneItem, SceneSource, SceneSummary};
pub use task::{TaskRecord, TaskStatus, TaskUpdate};
