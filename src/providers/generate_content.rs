// file: src/providers/generate_content.rs
// description: image synthesis adapter speaking the generateContent protocol over HTTP
// reference: https://ai.google.dev/gemini-api/docs/image-generation

use crate::error::{PipelineError, Result};
use crate::providers::wire::{self, Dialect};
use crate::providers::{AuthStyle, ImageSynthesis, ProviderKind, ReferenceImage};
use crate::utils::Validator;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct GenerateContentProvider {
    client: Client,
    kind: ProviderKind,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GenerateContentProvider {
    pub fn new(
        kind: ProviderKind,
        base_url: &str,
        model: String,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn dialect(&self) -> Dialect {
        self.kind.spec().dialect
    }
}

#[async_trait]
impl ImageSynthesis for GenerateContentProvider {
    fn provider_name(&self) -> &str {
        self.kind.name()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, prompt: &str, reference: &ReferenceImage) -> Result<Option<Vec<u8>>> {
        let url = self.endpoint();
        let body = wire::build_request(self.dialect(), prompt, &reference.bytes, &reference.mime);
        let service = format!("{} ({})", self.kind.name(), self.model);

        info!("Calling {}: {}", self.kind.name(), url);
        debug!("Request body: {}", wire::redact_for_log(&body));

        let request = self.client.post(&url).timeout(self.timeout).json(&body);
        let request = match self.kind.spec().auth {
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
            AuthStyle::GoogApiKey => request.header("x-goog-api-key", &self.api_key),
        };

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::upstream(&service, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::upstream(
                &service,
                format!(
                    "status {}: {}",
                    status,
                    Validator::truncate_text(&error_text, 500)
                ),
            ));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::parse(&service, format!("invalid response: {}", e)))?;

        let image = wire::parse_image_response(&data)?;
        if image.is_none() {
            warn!(
                "{} response did not contain image data: {}",
                service,
                wire::redact_for_log(&data)
            );
        }
        Ok(image)
    }
}
