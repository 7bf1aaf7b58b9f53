// file: src/providers/mod.rs
// description: image generation provider registry and synthesis trait
// reference: internal module structure

pub mod generate_content;
pub mod wire;

pub use generate_content::GenerateContentProvider;
pub use wire::Dialect;

use crate::config::ImageConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Source image handed to a provider alongside the prompt.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        let mime = image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "image/png".to_string());
        Self { bytes, mime }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::file(path, e))?;
        Ok(Self::new(bytes))
    }
}

#[async_trait]
pub trait ImageSynthesis: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// `Ok(None)` when the provider answered without an image.
    async fn synthesize(&self, prompt: &str, reference: &ReferenceImage) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    GoogApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    Grsai,
    Api147,
    DeerApi,
}

/// Static defaults for one provider kind.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    pub dialect: Dialect,
    pub auth: AuthStyle,
    pub timeout_secs: u64,
}

static PROVIDERS: [ProviderSpec; 4] = [
    ProviderSpec {
        kind: ProviderKind::Gemini,
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com",
        model: "gemini-2.5-flash-image",
        dialect: Dialect::CamelCase,
        auth: AuthStyle::GoogApiKey,
        timeout_secs: 120,
    },
    ProviderSpec {
        kind: ProviderKind::Grsai,
        name: "grsai",
        base_url: "https://grsai.dakka.com.cn",
        model: "nano-banana-fast",
        dialect: Dialect::CamelCase,
        auth: AuthStyle::Bearer,
        timeout_secs: 90,
    },
    ProviderSpec {
        kind: ProviderKind::Api147,
        name: "147api",
        base_url: "https://api.147api.com",
        model: "gemini-2.5-flash-image",
        dialect: Dialect::CamelCase,
        auth: AuthStyle::Bearer,
        timeout_secs: 90,
    },
    ProviderSpec {
        kind: ProviderKind::DeerApi,
        name: "deerapi",
        base_url: "https://api.deerapi.com",
        model: "gemini-2.5-flash-image",
        dialect: Dialect::SnakeCase,
        auth: AuthStyle::Bearer,
        timeout_secs: 120,
    },
];

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        PROVIDERS
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
            .map(|spec| spec.kind)
    }

    pub fn spec(self) -> &'static ProviderSpec {
        match self {
            ProviderKind::Gemini => &PROVIDERS[0],
            ProviderKind::Grsai => &PROVIDERS[1],
            ProviderKind::Api147 => &PROVIDERS[2],
            ProviderKind::DeerApi => &PROVIDERS[3],
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// List all registered provider names
pub fn available_providers() -> Vec<&'static str> {
    PROVIDERS.iter().map(|spec| spec.name).collect()
}

pub fn provider_specs() -> &'static [ProviderSpec] {
    &PROVIDERS
}

pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Picks the provider for a stage: the stage's own provider, else the
    /// configured default. Blank names count as unset.
    pub fn stage_provider<'a>(stage: Option<&'a str>, config: &'a ImageConfig) -> Result<&'a str> {
        let configured = |name: &&str| !name.trim().is_empty();
        stage
            .filter(configured)
            .or(config.default_provider.as_deref().filter(configured))
            .ok_or_else(|| PipelineError::Config("No image provider configured".to_string()))
    }

    /// Builds a ready adapter for `name`. Unknown names and missing API keys
    /// are configuration errors.
    pub fn resolve(
        name: &str,
        model_override: Option<&str>,
        config: &ImageConfig,
    ) -> Result<Arc<dyn ImageSynthesis>> {
        let kind = ProviderKind::from_name(name).ok_or_else(|| {
            PipelineError::Config(format!(
                "Unknown image provider '{}'. Available: {}",
                name,
                available_providers().join(", ")
            ))
        })?;
        let spec = kind.spec();
        let settings = config.provider_settings(spec.name);

        let model = model_override
            .map(str::to_string)
            .or(settings.model)
            .unwrap_or_else(|| spec.model.to_string());

        let api_key = settings
            .api_key
            .or_else(|| config.gemini_api_key.clone())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                PipelineError::Config(format!("No API key configured for provider '{}'", spec.name))
            })?;

        let base_url = settings
            .base_url
            .unwrap_or_else(|| spec.base_url.to_string());
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(spec.timeout_secs));

        Ok(Arc::new(GenerateContentProvider::new(
            kind, &base_url, model, api_key, timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProviderSettings};

    fn image_config() -> ImageConfig {
        let mut config = Config::default_config().image;
        config.gemini_api_key = Some("shared".to_string());
        config
    }

    #[test]
    fn test_lookup_case_insensitive() {
        assert_eq!(ProviderKind::from_name("DeerAPI"), Some(ProviderKind::DeerApi));
        assert_eq!(ProviderKind::from_name("147api"), Some(ProviderKind::Api147));
        assert_eq!(ProviderKind::from_name("midjourney"), None);
        assert_eq!(available_providers(), vec!["gemini", "grsai", "147api", "deerapi"]);
        for spec in provider_specs() {
            assert_eq!(spec.kind.spec().name, spec.name);
        }
    }

    #[test]
    fn test_unknown_provider_fails_at_resolution() {
        let err = ProviderRegistry::resolve("midjourney", None, &image_config())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("midjourney"));
    }

    #[test]
    fn test_model_precedence() {
        let mut config = image_config();
        config.providers.insert(
            "deerapi".to_string(),
            ProviderSettings {
                model: Some("gemini-3-pro-image".to_string()),
                ..Default::default()
            },
        );

        let configured = ProviderRegistry::resolve("deerapi", None, &config).unwrap();
        assert_eq!(configured.model_name(), "gemini-3-pro-image");

        let overridden = ProviderRegistry::resolve("deerapi", Some("custom"), &config).unwrap();
        assert_eq!(overridden.model_name(), "custom");

        let default = ProviderRegistry::resolve("grsai", None, &config).unwrap();
        assert_eq!(default.model_name(), "nano-banana-fast");
        assert_eq!(default.provider_name(), "grsai");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = Config::default_config().image;
        let err = ProviderRegistry::resolve("gemini", None, &config).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_stage_provider_precedence() {
        let mut config = image_config();
        assert_eq!(ProviderRegistry::stage_provider(Some("grsai"), &config).unwrap(), "grsai");
        assert_eq!(ProviderRegistry::stage_provider(None, &config).unwrap(), "gemini");
        assert_eq!(ProviderRegistry::stage_provider(Some(""), &config).unwrap(), "gemini");
        assert_eq!(ProviderRegistry::stage_provider(Some("  "), &config).unwrap(), "gemini");

        config.default_provider = Some(String::new());
        assert!(ProviderRegistry::stage_provider(Some(""), &config).is_err());

        config.default_provider = None;
        assert!(ProviderRegistry::stage_provider(None, &config).is_err());
    }

    #[test]
    fn test_reference_image_mime_detection() {
        let png_header = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(ReferenceImage::new(png_header).mime, "image/png");
        assert_eq!(ReferenceImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0]).mime, "image/jpeg");
    }
}
