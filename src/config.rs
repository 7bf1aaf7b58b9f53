// file: src/config.rs
// description: application configuration management with toml support
// reference: https://docs.rs/config

use crate::error::{PipelineError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub llm: LlmConfig,
    pub image: ImageConfig,
    pub phrase: PhraseConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    /// Generated images and per-task debug output, relative to `data_root` unless absolute.
    pub outputs_dir: PathBuf,
    /// Product catalog file, relative to `data_root` unless absolute.
    pub catalog_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub summarizer_model: String,
    pub refiner_model: String,
    pub phrase_model: String,
    pub timeout_secs: u64,
    pub vision_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageConfig {
    pub default_provider: Option<String>,
    pub scene_provider: Option<String>,
    pub scene_model: Option<String>,
    pub background_provider: Option<String>,
    pub background_model: Option<String>,
    /// Shared key used by any provider without its own `api_key`.
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl ImageConfig {
    pub fn provider_settings(&self, name: &str) -> ProviderSettings {
        self.providers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, settings)| settings.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    Text,
    Structured,
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptStyle::Text => write!(f, "text"),
            PromptStyle::Structured => write!(f, "structured"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhraseConfig {
    pub prompt_style: PromptStyle,
    /// Per-source scene quota, formatted as `source:count,source:count`.
    pub scene_sources: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub inline_image_limit: usize,
    pub download_timeout_secs: u64,
    pub source_image_timeout_secs: u64,
    pub save_intermediates: bool,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::from(Path::new("config/default.toml")));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VISUAL_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            paths: PathsConfig {
                data_root: PathBuf::from("./data"),
                outputs_dir: PathBuf::from("outputs"),
                catalog_file: PathBuf::from("products.json"),
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
                summarizer_model: "qwen-vl-plus".to_string(),
                refiner_model: "qwen-plus".to_string(),
                phrase_model: "qwen-plus".to_string(),
                timeout_secs: 60,
                vision_timeout_secs: 120,
            },
            image: ImageConfig {
                default_provider: Some("gemini".to_string()),
                scene_provider: None,
                scene_model: None,
                background_provider: None,
                background_model: None,
                gemini_api_key: None,
                providers: HashMap::new(),
            },
            phrase: PhraseConfig {
                prompt_style: PromptStyle::Text,
                scene_sources: "optimized:3,new:2".to_string(),
            },
            pipeline: PipelineConfig {
                inline_image_limit: 2,
                download_timeout_secs: 15,
                source_image_timeout_secs: 10,
                save_intermediates: true,
            },
        }
    }

    pub fn outputs_root(&self) -> PathBuf {
        self.paths.data_root.join(&self.paths.outputs_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.paths.data_root.join(&self.paths.catalog_file)
    }

    fn validate(&self) -> Result<()> {
        if self.llm.timeout_secs == 0 || self.llm.vision_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "llm timeouts must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.download_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.paths.data_root.as_os_str().is_empty() {
            return Err(PipelineError::Config("data_root must be set".to_string()));
        }

        Ok(())
    }
}
