// file: src/utils/validation.rs
// description: submission input validation utilities and helpers
// reference: input validation patterns

use crate::error::{PipelineError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::{Component, Path};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

pub struct Validator;

impl Validator {
    pub fn validate_url(url: &str) -> Result<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PipelineError::Input(format!("Invalid URL format: {}", url)));
        }
        Ok(())
    }

    /// Upgrades protocol-relative URLs to https. Returns `None` for anything
    /// that is not fetchable over http(s).
    pub fn normalize_remote_url(url: &str) -> Option<String> {
        let url = url.trim();
        if let Some(rest) = url.strip_prefix("//") {
            return Some(format!("https://{}", rest));
        }
        if Self::validate_url(url).is_ok() {
            return Some(url.to_string());
        }
        None
    }

    /// Decodes a base64 image payload, with or without a `data:` URL header.
    pub fn decode_inline_image(payload: &str) -> Result<Vec<u8>> {
        let data = match payload.split_once(',') {
            Some((_, data)) => data,
            None => payload,
        };

        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|e| PipelineError::Input(format!("Invalid base64 image payload: {}", e)))?;

        if bytes.is_empty() {
            return Err(PipelineError::Input("Inline image payload is empty".to_string()));
        }
        Ok(bytes)
    }

    /// Accepts `/outputs/<relative>` server paths and returns `<relative>`.
    pub fn validate_server_path<'a>(path: &'a str, mount: &str) -> Result<&'a str> {
        let trimmed = path.trim_start_matches('/');
        let relative = trimmed
            .strip_prefix(mount)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                PipelineError::Input(format!("Invalid image path format: {}", path))
            })?;

        let escapes = Path::new(relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(PipelineError::Input(format!(
                "Image path escapes the {} mount: {}",
                mount, path
            )));
        }

        Ok(relative)
    }

    pub fn validate_image_file(path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(PipelineError::Input(format!(
                "No valid image found at {}",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn has_image_extension(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn truncate_text(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
            None => text.to_string(),
        }
    }
}
