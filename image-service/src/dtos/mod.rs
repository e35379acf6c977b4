use serde::{Deserialize, Serialize};
use service_core::error::AppError;

pub const DEFAULT_IMAGE_COUNT: u32 = 1;
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

fn default_count() -> u32 {
    DEFAULT_IMAGE_COUNT
}

fn default_size() -> String {
    DEFAULT_IMAGE_SIZE.to_string()
}

/// Body of `POST /images/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_count")]
    pub n: u32,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    /// Reference images; present means "edit" instead of "generate".
    #[serde(default, alias = "image_url")]
    pub image_urls: Option<ReferenceImages>,
}

/// Body of `POST /images/generate/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamImageRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub partial_images: u32,
    #[serde(default, alias = "image_url")]
    pub image_urls: Option<ReferenceImages>,
}

/// One URL or a list of them. List entries are checked in [`into_urls`]
/// so a non-string entry gets a precise message.
///
/// [`into_urls`]: ReferenceImages::into_urls
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReferenceImages {
    Single(String),
    Many(Vec<serde_json::Value>),
}

impl ReferenceImages {
    /// Normalize to an ordered list of URLs.
    pub fn into_urls(self) -> Result<Vec<String>, AppError> {
        let urls = match self {
            ReferenceImages::Single(url) => vec![url],
            ReferenceImages::Many(values) => values
                .into_iter()
                .enumerate()
                .map(|(index, value)| match value {
                    serde_json::Value::String(url) => Ok(url),
                    other => Err(AppError::BadRequest(anyhow::anyhow!(
                        "'image_urls' entry {} must be a string, got {}",
                        index,
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        if urls.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "'image_urls' must not be empty"
            )));
        }

        Ok(urls)
    }
}

/// Reject absent or empty prompts.
pub fn require_prompt(prompt: Option<String>) -> Result<String, AppError> {
    match prompt {
        Some(prompt) if !prompt.is_empty() => Ok(prompt),
        _ => Err(AppError::BadRequest(anyhow::anyhow!("Missing 'prompt'"))),
    }
}

/// Response of `POST /images/generate`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ImagesResponse {
    pub images: Vec<String>,
}

/// One NDJSON line of `POST /images/generate/stream`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    Partial { b64: String },
    Final { b64: String },
    /// Sent once when the upstream fails after the response has started.
    Error { message: String },
}

impl StreamChunk {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamChunk::Partial { .. } => "partial",
            StreamChunk::Final { .. } => "final",
            StreamChunk::Error { .. } => "error",
        }
    }

    /// Serialize as a single newline-terminated JSON line.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
