// file: src/lib.rs
// description: library entry point and public api exports
// reference: rust library patterns
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/readme.md"))]

pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod providers;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::{Config, ImageConfig, LlmConfig, PathsConfig, PhraseConfig, PipelineConfig, PromptStyle};
pub use error::{PipelineError, Result};
pub use llm::{ChatCompletion, OpenAiCompatClient};
pub use models::{CatalogRecord, ProductInput, TaskRecord, TaskStatus};
pub use pipeline::{
    BatchProgress, BatchStats, PipelineOrchestrator, PipelineStages, RunOptions, TaskProgress,
    TaskRegistry,
};
pub use providers::{ImageSynthesis, ProviderKind, ProviderRegistry};
pub use service::{ImageSource, SubmitRequest, VisualEngine};
pub use storage::{AssetPathResolver, ProductCatalog};
pub use utils::{PromptTemplate, StageTimer, Validator};
