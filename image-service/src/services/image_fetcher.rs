//! Image fetcher for reference images supplied by URL.
//!
//! Downloads are held in memory only. The same bytes can be turned into a
//! `data:` URI for inline embedding or into an [`ImageFile`] for multipart
//! upload.

use crate::services::metrics;
use crate::services::providers::ImageFile;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};

/// Deadline for a single download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// MIME type used when neither the response nor the URL says otherwise.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Error type for image downloads.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to fetch image {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Failed to fetch image {url}: HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// The URL that failed.
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transport { url, .. } | FetchError::Status { url, .. } => url,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport { .. } => "transport",
            FetchError::Status { .. } => "status",
        }
    }
}

/// A downloaded image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub url: String,
    pub mime_type: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FetchedImage {
    /// `data:<mime>;base64,<payload>`
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }

    pub fn into_file(self) -> ImageFile {
        ImageFile {
            file_name: self.file_name,
            mime_type: self.mime_type,
            bytes: self.bytes,
        }
    }
}

/// HTTP downloader for reference images.
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Download one image.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let start = Instant::now();
        let result = self.download(url).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::record_image_fetch(outcome, start.elapsed().as_secs_f64());

        match &result {
            Ok(image) => tracing::debug!(
                url = %url,
                mime_type = %image.mime_type,
                size = image.bytes.len(),
                "Fetched reference image"
            ),
            Err(e) => {
                metrics::record_image_fetch_error(e.kind());
                tracing::warn!(url = %url, error = %e, "Failed to fetch reference image");
            }
        }

        result
    }

    /// Download every URL concurrently. Images come back in URL order; on
    /// failure the error of the earliest failing URL is returned.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<FetchedImage>, FetchError> {
        join_all(urls.iter().map(|url| self.fetch(url)))
            .await
            .into_iter()
            .collect()
    }

    async fn download(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let mime_type = resolve_mime_type(content_type.as_deref(), url);
        let file_name = file_name_for(url, &mime_type);

        Ok(FetchedImage {
            url: url.to_string(),
            mime_type,
            file_name,
            bytes: bytes.to_vec(),
        })
    }
}

/// Content-Type header first, then the URL's extension, then `image/png`.
/// A generic `application/octet-stream` header counts as absent.
pub fn resolve_mime_type(content_type: Option<&str>, url: &str) -> String {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "application/octet-stream")
        .or_else(|| guess_mime_from_url(url).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

fn guess_mime_from_url(url: &str) -> Option<&'static str> {
    let segment = last_path_segment(url)?;
    let (_, extension) = segment.rsplit_once('.')?;

    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        "avif" => Some("image/avif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/tiff" => "tiff",
        "image/x-icon" => "ico",
        "image/avif" => "avif",
        "image/heic" => "heic",
        _ => "png",
    }
}

/// Last path segment of the URL, or `image.<ext>` when there is none.
pub fn file_name_for(url: &str, mime_type: &str) -> String {
    last_path_segment(url)
        .unwrap_or_else(|| format!("image.{}", extension_for_mime(mime_type)))
}
