// file: src/providers/wire.rs
// description: generateContent request bodies and image extraction for both field-naming dialects
// reference: https://ai.google.dev/api/generate-content

use crate::error::{PipelineError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

const ELIDED: &str = "<base64 elided>";

/// Field naming used for inline image parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `inlineData` / `mimeType`
    CamelCase,
    /// `inline_data` / `mime_type`
    SnakeCase,
}

impl Dialect {
    fn inline_key(self) -> &'static str {
        match self {
            Dialect::CamelCase => "inlineData",
            Dialect::SnakeCase => "inline_data",
        }
    }

    fn mime_key(self) -> &'static str {
        match self {
            Dialect::CamelCase => "mimeType",
            Dialect::SnakeCase => "mime_type",
        }
    }
}

pub fn build_request(dialect: Dialect, prompt: &str, image: &[u8], mime: &str) -> Value {
    let mut inline = serde_json::Map::new();
    inline.insert(dialect.mime_key().to_string(), json!(mime));
    inline.insert("data".to_string(), json!(BASE64.encode(image)));

    let mut image_part = serde_json::Map::new();
    image_part.insert(dialect.inline_key().to_string(), Value::Object(inline));

    json!({
        "contents": [{
            "role": "user",
            "parts": [Value::Object(image_part), {"text": prompt}]
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"]
        }
    })
}

fn inline_of(part: &Value) -> Option<&Value> {
    part.get("inlineData").or_else(|| part.get("inline_data"))
}

/// First inline image in `candidates[0].content.parts`, accepting either
/// dialect per part. `Ok(None)` when the response carries no image.
pub fn parse_image_response(body: &Value) -> Result<Option<Vec<u8>>> {
    let parts = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array);

    let Some(parts) = parts else {
        return Ok(None);
    };

    for part in parts {
        let data = inline_of(part)
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty());

        if let Some(data) = data {
            let bytes = BASE64.decode(data.as_bytes()).map_err(|e| {
                PipelineError::parse("image response", format!("undecodable image data: {}", e))
            })?;
            return Ok(Some(bytes));
        }
    }

    Ok(None)
}

/// Copy of a request or response body with inline image data replaced, for logging.
pub fn redact_for_log(body: &Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let is_inline_data = (key == "data"
                        && value.as_str().is_some_and(|s| s.len() > 64))
                        || (key == "url"
                            && value.as_str().is_some_and(|s| s.starts_with("data:")));
                    if is_inline_data {
                        (key.clone(), json!(ELIDED))
                    } else {
                        (key.clone(), redact_for_log(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_for_log).collect()),
        other => other.clone(),
    }
}
