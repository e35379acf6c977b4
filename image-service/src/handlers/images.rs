use crate::dtos::{
    require_prompt, GenerateImageRequest, ImagesResponse, StreamChunk, StreamImageRequest,
};
use crate::services::metrics;
use crate::services::providers::{
    ImageGenerationParams, ImageItem, ImageStreamEvent, ProviderError, StreamParams,
};
use crate::services::{FetchError, FetchedImage, ImageProvider};
use crate::startup::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use futures::{future, StreamExt};
use service_core::error::AppError;
use std::future::Future;
use std::time::Instant;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::BadGateway(err.to_string())
    }
}

fn status_of<T>(result: &Result<T, AppError>) -> u16 {
    match result {
        Ok(_) => 200,
        Err(AppError::BadRequest(_)) => 400,
        Err(AppError::BadGateway(_)) => 502,
        Err(AppError::ServiceUnavailable) => 503,
        Err(_) => 500,
    }
}

/// Time a provider call and count its failures.
async fn call_provider<T, F>(
    provider: &dyn ImageProvider,
    operation: &str,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_provider_latency(provider.name(), operation, start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        metrics::record_provider_error(provider.name(), e.kind());
        tracing::warn!(
            provider = provider.name(),
            operation,
            error = %e,
            "Image provider call failed"
        );
    }

    result
}

/// `POST /images/generate`: generate images, or edit reference images when
/// `image_urls` is given.
pub async fn generate_images(
    State(state): State<AppState>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<ImagesResponse>, AppError> {
    let result = generate(&state, payload).await;
    metrics::record_image_request("generate", status_of(&result));
    result.map(Json)
}

async fn generate(
    state: &AppState,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<ImagesResponse, AppError> {
    let Json(request) = payload?;
    let prompt = require_prompt(request.prompt)?;

    if request.n == 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "'n' must be at least 1"
        )));
    }

    let params = ImageGenerationParams {
        prompt,
        n: request.n,
        size: request.size,
        quality: request.quality,
        background: request.background,
    };

    let provider = state.provider.as_ref();

    let items = match request.image_urls {
        Some(source) => {
            let urls = source.into_urls()?;
            let images = state.fetcher.fetch_all(&urls).await?;
            let files = images.into_iter().map(FetchedImage::into_file).collect();

            tracing::info!(
                reference_count = urls.len(),
                n = params.n,
                "Editing reference images"
            );
            call_provider(provider, "edit", provider.edit(&params, files)).await?
        }
        None => {
            tracing::info!(n = params.n, size = %params.size, "Generating images");
            call_provider(provider, "generate", provider.generate(&params)).await?
        }
    };

    let images: Vec<String> = items
        .iter()
        .filter_map(ImageItem::b64)
        .map(str::to_string)
        .collect();

    if images.is_empty() {
        tracing::error!(
            item_count = items.len(),
            "Provider returned no base64 images"
        );
        return Err(AppError::InternalError(anyhow::anyhow!(
            "No images produced"
        )));
    }

    if images.len() < params.n as usize {
        tracing::debug!(
            requested = params.n,
            returned = images.len(),
            "Provider returned fewer images than requested"
        );
    }

    Ok(ImagesResponse { images })
}

/// `POST /images/generate/stream`: relay partial and final images as NDJSON.
pub async fn stream_images(
    State(state): State<AppState>,
    payload: Result<Json<StreamImageRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let result = stream(&state, payload).await;
    metrics::record_image_request("stream", status_of(&result));
    result
}

async fn stream(
    state: &AppState,
    payload: Result<Json<StreamImageRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let prompt = require_prompt(request.prompt)?;

    let reference_images: Vec<String> = match request.image_urls {
        Some(source) => {
            let urls = source.into_urls()?;
            state
                .fetcher
                .fetch_all(&urls)
                .await?
                .iter()
                .map(FetchedImage::to_data_uri)
                .collect()
        }
        None => Vec::new(),
    };

    let params = StreamParams {
        prompt,
        partial_images: request.partial_images,
        reference_images,
    };

    tracing::info!(
        partial_images = params.partial_images,
        reference_count = params.reference_images.len(),
        "Opening image stream"
    );

    let provider = state.provider.as_ref();
    let upstream = call_provider(provider, "stream", provider.generate_stream(&params)).await?;

    // The status is already sent once lines flow, so a mid-stream failure
    // becomes a final error line instead.
    let lines = upstream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let chunk = match item {
                Ok(ImageStreamEvent::Partial(b64)) => StreamChunk::Partial { b64 },
                Ok(ImageStreamEvent::Final(b64)) => StreamChunk::Final { b64 },
                Err(e) => {
                    *failed = true;
                    tracing::warn!(error = %e, "Image stream ended with upstream error");
                    StreamChunk::Error {
                        message: e.to_string(),
                    }
                }
            };
            future::ready(Some(chunk))
        })
        .map(|chunk| {
            metrics::record_stream_chunk(chunk.kind());
            chunk.to_ndjson_line()
        });

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(NDJSON_CONTENT_TYPE),
        )],
        Body::from_stream(lines),
    )
        .into_response())
}
