//! Image provider abstractions and implementations.
//!
//! Handlers talk to the upstream image API only through [`ImageProvider`],
//! so the OpenAI client can be swapped for the mock in tests.

pub mod mock;
pub mod openai;
pub mod sse;

use async_trait::async_trait;
use serde::Deserialize;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Short label used for the provider error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::ApiError(_) => "api_error",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::NetworkError(_) => "network_error",
        }
    }
}

/// One entry of an upstream images response.
///
/// The API returns either inline base64 data or a hosted URL depending on the
/// model; anything else is kept as raw JSON so a single odd item never fails
/// the whole response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageItem {
    Base64 {
        b64_json: String,
        #[serde(default)]
        revised_prompt: Option<String>,
    },
    Url {
        url: String,
        #[serde(default)]
        revised_prompt: Option<String>,
    },
    Other(serde_json::Value),
}

impl ImageItem {
    pub fn base64(b64_json: impl Into<String>) -> Self {
        ImageItem::Base64 {
            b64_json: b64_json.into(),
            revised_prompt: None,
        }
    }

    /// The base64 payload, if this item carries a non-empty one. Items
    /// without it are skipped by callers, which can leave fewer images than
    /// requested.
    pub fn b64(&self) -> Option<&str> {
        match self {
            ImageItem::Base64 { b64_json, .. } if !b64_json.is_empty() => Some(b64_json),
            _ => None,
        }
    }
}

/// Parameters forwarded to the upstream generate and edit operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGenerationParams {
    pub prompt: String,
    pub n: u32,
    pub size: String,
    pub quality: Option<String>,
    pub background: Option<String>,
}

/// A reference image held in memory for multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Parameters for a streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub prompt: String,
    pub partial_images: u32,
    /// Reference images as `data:` URIs, in request order.
    pub reference_images: Vec<String>,
}

/// An image event relayed from the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageStreamEvent {
    Partial(String),
    Final(String),
}

/// Type alias for provider streams.
pub type ProviderStream =
    Pin<Box<dyn Stream<Item = Result<ImageStreamEvent, ProviderError>> + Send>>;

/// Trait for image generation backends (e.g., OpenAI).
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Generate images from a prompt.
    async fn generate(&self, params: &ImageGenerationParams)
        -> Result<Vec<ImageItem>, ProviderError>;

    /// Edit the given reference images according to the prompt.
    async fn edit(
        &self,
        params: &ImageGenerationParams,
        images: Vec<ImageFile>,
    ) -> Result<Vec<ImageItem>, ProviderError>;

    /// Open a streamed generation. Events arrive in upstream order.
    async fn generate_stream(&self, params: &StreamParams)
        -> Result<ProviderStream, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_item_variants_from_upstream_json() {
        let items: Vec<ImageItem> = serde_json::from_str(
            r#"[
                {"b64_json": "AAA"},
                {"url": "https://cdn.example.com/1.png", "revised_prompt": "a fox"},
                {"b64_json": null},
                {}
            ]"#,
        )
        .unwrap();

        assert_eq!(items[0], ImageItem::base64("AAA"));
        assert!(matches!(items[1], ImageItem::Url { .. }));
        assert!(matches!(items[2], ImageItem::Other(_)));
        assert!(matches!(items[3], ImageItem::Other(_)));
    }

    #[test]
    fn b64_is_only_exposed_for_inline_items() {
        let items = vec![
            ImageItem::base64("AAA"),
            ImageItem::Url {
                url: "https://cdn.example.com/1.png".to_string(),
                revised_prompt: None,
            },
            ImageItem::base64(""),
            ImageItem::Other(serde_json::json!({"foo": 1})),
        ];

        let payloads: Vec<&str> = items.iter().filter_map(ImageItem::b64).collect();
        assert_eq!(payloads, vec!["AAA"]);
    }
}
